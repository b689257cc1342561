//! AIMD congestion control over a pacing token bucket.
//!
//! Additive-increase-multiplicative-decrease rate adaptation: the pacing
//! bucket is rebuilt every time the advisory rate changes so callers always
//! pace against the current `rate`.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::clock;
use crate::token_bucket::{TokenBucket, TokenBucketConfig};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CongestionConfig {
    pub initial_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    /// Additive increase step, applied every 10 acks while not congested.
    pub additive_increase: f64,
    /// Multiplicative decrease factor applied on a lossy window.
    pub multiplicative_decrease: f64,
    /// Loss ratio above which a window is considered lossy.
    pub loss_threshold: f64,
    /// Minimum time between successive decreases.
    pub cooldown_ms: i64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        CongestionConfig {
            initial_rate: 500.0,
            min_rate: 50.0,
            max_rate: 5000.0,
            additive_increase: 10.0,
            multiplicative_decrease: 0.5,
            loss_threshold: 0.02,
            cooldown_ms: 500,
        }
    }
}

fn pacing_bucket_for_rate(rate: f64) -> TokenBucket {
    TokenBucket::new(TokenBucketConfig::new(rate, (rate / 10.0).max(10.0)))
}

struct Inner {
    rate: f64,
    congested: bool,
    last_change_ms: i64,
    window_sent: u64,
    window_lost: u64,
    acks_since_increase: u64,
    pacing: TokenBucket,
}

/// AIMD congestion controller guarding a pacing token bucket.
pub struct CongestionController {
    config: CongestionConfig,
    inner: Mutex<Inner>,
}

impl CongestionController {
    pub fn new(config: CongestionConfig) -> Self {
        let pacing = pacing_bucket_for_rate(config.initial_rate);
        CongestionController {
            inner: Mutex::new(Inner {
                rate: config.initial_rate,
                congested: false,
                last_change_ms: clock::now_ms(),
                window_sent: 0,
                window_lost: 0,
                acks_since_increase: 0,
                pacing,
            }),
            config,
        }
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().unwrap().rate
    }

    pub fn is_congested(&self) -> bool {
        self.inner.lock().unwrap().congested
    }

    /// Non-blocking pacing check: attempts to take one token now.
    pub fn can_send(&self) -> bool {
        self.inner.lock().unwrap().pacing.consume(1.0)
    }

    /// Paced acquisition: blocks (in steps of at most 10ms) until a token is
    /// available or `max_wait_ms` elapses.
    pub fn wait_for_token(&self, max_wait_ms: u64) -> bool {
        // The bucket may be swapped out mid-wait by a rate change; re-fetch
        // each attempt rather than holding the lock across the sleep.
        let deadline = clock::now_ms() + max_wait_ms as i64;
        loop {
            if self.can_send() {
                return true;
            }
            let remaining = deadline - clock::now_ms();
            if remaining <= 0 {
                return false;
            }
            std::thread::sleep(std::time::Duration::from_millis(remaining.min(10) as u64));
        }
    }

    pub fn on_packet_sent(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.window_sent += 1;
    }

    /// Every 10 acks accumulated while not congested, additively increase the
    /// rate by [`CongestionConfig::additive_increase`].
    pub fn on_ack_received(&self, n: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.acks_since_increase += n;
        while inner.acks_since_increase >= 10 {
            inner.acks_since_increase -= 10;
            if !inner.congested {
                inner.rate = (inner.rate + self.config.additive_increase).min(self.config.max_rate);
                inner.pacing = pacing_bucket_for_rate(inner.rate);
            }
        }
    }

    /// Report `n` losses in the current window, then evaluate the one-second
    /// sliding window: if the loss ratio exceeds the threshold and the
    /// cooldown has elapsed, apply a multiplicative decrease and set
    /// congested; otherwise clear congested. The window counters reset after
    /// every evaluation.
    pub fn on_loss_detected(&self, n: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.window_lost += n;

        let now = clock::now_ms();
        let loss_ratio = if inner.window_sent > 0 {
            inner.window_lost as f64 / inner.window_sent as f64
        } else {
            0.0
        };
        let cooldown_elapsed = now - inner.last_change_ms >= self.config.cooldown_ms;

        if loss_ratio > self.config.loss_threshold && cooldown_elapsed {
            inner.rate = (inner.rate * (1.0 - self.config.multiplicative_decrease))
                .max(self.config.min_rate);
            inner.congested = true;
            inner.last_change_ms = now;
            inner.pacing = pacing_bucket_for_rate(inner.rate);
            warn!(loss_ratio, new_rate = inner.rate, "lossy window, backing off");
        } else if inner.congested {
            inner.congested = false;
            info!(rate = inner.rate, "loss window clean, congestion cleared");
        }

        inner.window_sent = 0;
        inner.window_lost = 0;
    }

    /// Aggressive multiplicative decrease on an outright timeout:
    /// `r := max(min_rate, r * (1 - 1.5 * MD))`.
    pub fn on_timeout(&self) {
        let mut inner = self.inner.lock().unwrap();
        let factor = 1.0 - 1.5 * self.config.multiplicative_decrease;
        inner.rate = (inner.rate * factor).max(self.config.min_rate);
        inner.congested = true;
        inner.last_change_ms = clock::now_ms();
        inner.pacing = pacing_bucket_for_rate(inner.rate);
        warn!(new_rate = inner.rate, "send timeout, applying steep backoff");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_configured_initial_rate() {
        let cc = CongestionController::new(CongestionConfig::default());
        assert_eq!(cc.rate(), 500.0);
        assert!(!cc.is_congested());
    }

    #[test]
    fn lossy_window_halves_rate_and_sets_congested() {
        let cc = CongestionController::new(CongestionConfig::default());
        for _ in 0..100 {
            cc.on_packet_sent();
        }
        cc.on_loss_detected(10); // 10% loss > 2% threshold
        assert_eq!(cc.rate(), 250.0);
        assert!(cc.is_congested());
    }

    #[test]
    fn clean_window_clears_congested() {
        let cc = CongestionController::new(CongestionConfig::default());
        for _ in 0..100 {
            cc.on_packet_sent();
        }
        cc.on_loss_detected(10);
        assert!(cc.is_congested());

        // Allow cooldown to pass so a subsequent decrease isn't suppressed,
        // then report a loss-free window.
        std::thread::sleep(std::time::Duration::from_millis(5));
        for _ in 0..100 {
            cc.on_packet_sent();
        }
        cc.on_loss_detected(0);
        assert!(!cc.is_congested());
    }

    #[test]
    fn additive_increase_only_while_uncongested() {
        let cc = CongestionController::new(CongestionConfig::default());
        // Clear congestion first (loss-free window).
        cc.on_packet_sent();
        cc.on_loss_detected(0);
        assert!(!cc.is_congested());

        let before = cc.rate();
        cc.on_ack_received(10);
        assert_eq!(cc.rate(), before + 10.0);

        cc.on_ack_received(5); // partial batch, no increase yet
        assert_eq!(cc.rate(), before + 10.0);
        cc.on_ack_received(5); // completes the next batch of 10
        assert_eq!(cc.rate(), before + 20.0);
    }

    #[test]
    fn congested_state_suppresses_additive_increase() {
        let cc = CongestionController::new(CongestionConfig::default());
        for _ in 0..100 {
            cc.on_packet_sent();
        }
        cc.on_loss_detected(10);
        assert!(cc.is_congested());
        let rate = cc.rate();
        cc.on_ack_received(10);
        assert_eq!(cc.rate(), rate, "no increase while congested");
    }

    #[test]
    fn rate_clamped_to_min_and_max() {
        let config = CongestionConfig {
            initial_rate: 55.0,
            min_rate: 50.0,
            max_rate: 60.0,
            ..CongestionConfig::default()
        };
        let cc = CongestionController::new(config);

        for _ in 0..20 {
            cc.on_timeout();
        }
        assert!(cc.rate() >= 50.0);

        cc.on_packet_sent();
        cc.on_loss_detected(0);
        for _ in 0..50 {
            cc.on_ack_received(10);
        }
        assert!(cc.rate() <= 60.0);
    }

    #[test]
    fn on_timeout_applies_steeper_decrease_than_loss_window() {
        let cc = CongestionController::new(CongestionConfig::default());
        cc.on_timeout();
        // r = 500 * (1 - 1.5*0.5) = 500 * 0.25 = 125
        assert_eq!(cc.rate(), 125.0);
        assert!(cc.is_congested());
    }

    #[test]
    fn can_send_respects_pacing_bucket_burst() {
        let config = CongestionConfig {
            initial_rate: 10.0,
            ..CongestionConfig::default()
        };
        let cc = CongestionController::new(config);
        // burst = max(10, 10/10) = 10
        for _ in 0..10 {
            assert!(cc.can_send());
        }
        assert!(!cc.can_send());
    }

    #[test]
    fn zero_sent_window_does_not_spuriously_decrease() {
        let cc = CongestionController::new(CongestionConfig::default());
        cc.on_loss_detected(5); // no packets sent — ratio treated as 0
        assert_eq!(cc.rate(), 500.0);
        assert!(!cc.is_congested());
    }
}
