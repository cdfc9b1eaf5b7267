//! Pure reprice decision function shared by both executor variants.

use std::time::Duration;

use crate::error::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepricePolicyConfig {
    pub min_reprice_threshold_pct: f64,
    pub elapsed_override: Option<Duration>,
}

impl Default for RepricePolicyConfig {
    fn default() -> Self {
        Self {
            min_reprice_threshold_pct: 0.0,
            elapsed_override: None,
        }
    }
}

impl RepricePolicyConfig {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.min_reprice_threshold_pct < 0.0 {
            return Err(ExecutionError::ConfigInvalid(
                "min_reprice_threshold_pct must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RepriceDecision {
    Reprice(f64),
    Suppress(f64),
    ElapsedOverride(f64),
}

/// Evaluated in order: equal prices suppress outright, then an elapsed
/// override bypasses the threshold, then the threshold itself gates on the
/// magnitude of the change.
pub fn decide(
    current: f64,
    best: f64,
    elapsed: Duration,
    cfg: &RepricePolicyConfig,
) -> RepriceDecision {
    if current == best {
        return RepriceDecision::Suppress(0.0);
    }

    let change_pct = (best - current).abs() / current;

    if let Some(override_after) = cfg.elapsed_override {
        if elapsed >= override_after {
            return RepriceDecision::ElapsedOverride(best);
        }
    }

    if change_pct < cfg.min_reprice_threshold_pct {
        return RepriceDecision::Suppress(change_pct);
    }

    RepriceDecision::Reprice(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_price_suppresses() {
        let cfg = RepricePolicyConfig::default();
        let decision = decide(43200.0, 43200.0, Duration::from_secs(0), &cfg);
        assert_eq!(decision, RepriceDecision::Suppress(0.0));
    }

    #[test]
    fn small_change_below_threshold_suppresses() {
        let cfg = RepricePolicyConfig {
            min_reprice_threshold_pct: 0.001,
            elapsed_override: None,
        };
        let decision = decide(43200.00, 43200.20, Duration::from_secs(0), &cfg);
        match decision {
            RepriceDecision::Suppress(actual) => {
                assert!((actual - 0.00000463).abs() < 0.000001);
            }
            other => panic!("expected suppress, got {other:?}"),
        }
    }

    #[test]
    fn large_change_above_threshold_reprices() {
        let cfg = RepricePolicyConfig {
            min_reprice_threshold_pct: 0.001,
            elapsed_override: None,
        };
        let decision = decide(43200.00, 43140.00, Duration::from_secs(0), &cfg);
        assert_eq!(decision, RepriceDecision::Reprice(43140.00));
    }

    #[test]
    fn elapsed_override_bypasses_threshold() {
        let cfg = RepricePolicyConfig {
            min_reprice_threshold_pct: 0.5,
            elapsed_override: Some(Duration::from_secs(30)),
        };
        let decision = decide(100.0, 100.01, Duration::from_secs(31), &cfg);
        assert_eq!(decision, RepriceDecision::ElapsedOverride(100.01));
    }

    #[test]
    fn zero_threshold_reprices_on_any_change() {
        let cfg = RepricePolicyConfig::default();
        let decision = decide(100.0, 100.0001, Duration::from_secs(0), &cfg);
        assert_eq!(decision, RepriceDecision::Reprice(100.0001));
    }
}
