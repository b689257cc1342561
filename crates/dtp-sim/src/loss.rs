//! Receive-path loss injection for synthetic runs.
//!
//! Applied by the harness as a decision made *before* a datagram reaches
//! [`dtp_transport::receiver::Receiver`] — functionally indistinguishable
//! from loss in transit, which is all a deadline-aware transport needs to
//! exercise its drop-and-recover paths deterministically.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::config::LossModel;

/// Stateful loss decision, seeded for reproducibility across runs.
pub struct LossInjector {
    model: LossModel,
    rng: StdRng,
    in_burst: bool,
    burst_ends_at_ms: i64,
}

impl LossInjector {
    pub fn new(model: LossModel, seed: u64) -> Self {
        LossInjector {
            model,
            rng: StdRng::seed_from_u64(seed),
            in_burst: false,
            burst_ends_at_ms: 0,
        }
    }

    /// `true` means drop this datagram. `now_ms` only matters for the bursty
    /// model, which tracks burst windows against the caller's clock.
    pub fn should_drop(&mut self, now_ms: i64) -> bool {
        match self.model {
            LossModel::None => false,
            LossModel::Uniform { rate } => self.rng.random::<f64>() < rate,
            LossModel::Bursty { rate, burst_duration_ms } => {
                if self.in_burst {
                    if now_ms >= self.burst_ends_at_ms {
                        self.in_burst = false;
                    } else {
                        return true;
                    }
                }
                if self.rng.random::<f64>() < rate {
                    self.in_burst = true;
                    self.burst_ends_at_ms = now_ms + burst_duration_ms as i64;
                    return true;
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_drops() {
        let mut inj = LossInjector::new(LossModel::None, 1);
        for t in 0..1000 {
            assert!(!inj.should_drop(t));
        }
    }

    #[test]
    fn uniform_is_deterministic_for_a_given_seed() {
        let mut a = LossInjector::new(LossModel::Uniform { rate: 0.3 }, 42);
        let mut b = LossInjector::new(LossModel::Uniform { rate: 0.3 }, 42);
        let decisions_a: Vec<bool> = (0..200).map(|t| a.should_drop(t)).collect();
        let decisions_b: Vec<bool> = (0..200).map(|t| b.should_drop(t)).collect();
        assert_eq!(decisions_a, decisions_b);
    }

    #[test]
    fn bursty_holds_drops_for_the_configured_window() {
        let mut inj = LossInjector::new(
            LossModel::Bursty { rate: 1.0, burst_duration_ms: 500 },
            7,
        );
        assert!(inj.should_drop(0), "rate 1.0 always starts a burst");
        assert!(inj.should_drop(100), "still inside the burst window");
        assert!(inj.should_drop(499));
        // Burst window has elapsed; a fresh roll at rate 1.0 starts another.
        assert!(inj.should_drop(500));
    }
}
