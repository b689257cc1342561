//! Per-class admission control — one token bucket per priority, guarding
//! ingress before a packet ever reaches the scheduler.

use std::sync::Mutex;

use tracing::debug;

use crate::codec::Priority;
use crate::token_bucket::{TokenBucket, TokenBucketConfig};

/// Construction parameters for one priority class's bucket.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ClassLimit {
    pub rate: f64,
    pub burst: f64,
}

impl ClassLimit {
    pub const fn new(rate: f64, burst: f64) -> Self {
        ClassLimit { rate, burst }
    }
}

/// Admission-controller configuration: one [`ClassLimit`] per class, plus the
/// CRITICAL bypass used by test fixtures.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct AdmissionConfig {
    pub critical: ClassLimit,
    pub high: ClassLimit,
    pub medium: ClassLimit,
    pub low: ClassLimit,
    /// When `false`, CRITICAL packets are admitted unconditionally (no token
    /// consumed) — a test-only escape hatch.
    pub enable_critical_limit: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            critical: ClassLimit::new(50.0, 20.0),
            high: ClassLimit::new(200.0, 50.0),
            medium: ClassLimit::new(500.0, 100.0),
            low: ClassLimit::new(1000.0, 200.0),
            enable_critical_limit: true,
        }
    }
}

impl AdmissionConfig {
    fn limit_for(&self, priority: Priority) -> ClassLimit {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AdmissionClassStats {
    pub admitted: u64,
    pub rejected: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AdmissionStats {
    pub critical: AdmissionClassStats,
    pub high: AdmissionClassStats,
    pub medium: AdmissionClassStats,
    pub low: AdmissionClassStats,
}

impl AdmissionStats {
    pub fn for_priority(&self, priority: Priority) -> AdmissionClassStats {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// Per-class token buckets guarding ingress. `admit` consumes one token of
/// the packet's class; rejections are final — the caller does not retry or
/// implicitly queue.
pub struct AdmissionController {
    config: AdmissionConfig,
    critical: TokenBucket,
    high: TokenBucket,
    medium: TokenBucket,
    low: TokenBucket,
    stats: Mutex<AdmissionStats>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        AdmissionController {
            critical: TokenBucket::new(TokenBucketConfig::new(
                config.critical.rate,
                config.critical.burst,
            )),
            high: TokenBucket::new(TokenBucketConfig::new(config.high.rate, config.high.burst)),
            medium: TokenBucket::new(TokenBucketConfig::new(
                config.medium.rate,
                config.medium.burst,
            )),
            low: TokenBucket::new(TokenBucketConfig::new(config.low.rate, config.low.burst)),
            stats: Mutex::new(AdmissionStats::default()),
            config,
        }
    }

    fn bucket_for(&self, priority: Priority) -> &TokenBucket {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    /// Consume one token of `priority`'s class. CRITICAL bypasses the bucket
    /// entirely when `enable_critical_limit` is `false`.
    pub fn admit(&self, priority: Priority) -> bool {
        let admitted = if priority == Priority::Critical && !self.config.enable_critical_limit {
            true
        } else {
            self.bucket_for(priority).consume(1.0)
        };

        let mut stats = self.stats.lock().unwrap();
        let class_stats = match priority {
            Priority::Critical => &mut stats.critical,
            Priority::High => &mut stats.high,
            Priority::Medium => &mut stats.medium,
            Priority::Low => &mut stats.low,
        };
        if admitted {
            class_stats.admitted += 1;
        } else {
            class_stats.rejected += 1;
            debug!(?priority, rejected_total = class_stats.rejected, "admission rejected");
        }
        admitted
    }

    pub fn stats(&self) -> AdmissionStats {
        *self.stats.lock().unwrap()
    }

    pub fn config(&self) -> AdmissionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_within_burst_then_rejects() {
        let config = AdmissionConfig {
            critical: ClassLimit::new(0.0, 2.0),
            ..AdmissionConfig::default()
        };
        let ac = AdmissionController::new(config);
        assert!(ac.admit(Priority::Critical));
        assert!(ac.admit(Priority::Critical));
        assert!(!ac.admit(Priority::Critical));
        assert_eq!(ac.stats().critical.admitted, 2);
        assert_eq!(ac.stats().critical.rejected, 1);
    }

    #[test]
    fn critical_bypass_when_limit_disabled() {
        let config = AdmissionConfig {
            critical: ClassLimit::new(0.0, 0.0),
            enable_critical_limit: false,
            ..AdmissionConfig::default()
        };
        let ac = AdmissionController::new(config);
        for _ in 0..100 {
            assert!(ac.admit(Priority::Critical));
        }
    }

    #[test]
    fn classes_are_independent() {
        let config = AdmissionConfig {
            critical: ClassLimit::new(0.0, 1.0),
            high: ClassLimit::new(0.0, 1.0),
            ..AdmissionConfig::default()
        };
        let ac = AdmissionController::new(config);
        assert!(ac.admit(Priority::Critical));
        assert!(!ac.admit(Priority::Critical));
        // HIGH bucket is untouched by CRITICAL's exhaustion.
        assert!(ac.admit(Priority::High));
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = AdmissionConfig::default();
        assert_eq!(config.critical.rate, 50.0);
        assert_eq!(config.critical.burst, 20.0);
        assert_eq!(config.high.rate, 200.0);
        assert_eq!(config.high.burst, 50.0);
        assert_eq!(config.medium.rate, 500.0);
        assert_eq!(config.medium.burst, 100.0);
        assert_eq!(config.low.rate, 1000.0);
        assert_eq!(config.low.burst, 200.0);
    }
}
