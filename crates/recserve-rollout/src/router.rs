//! Routing decisions: which version serves a given user.

use std::fmt;

use serde::Serialize;

use crate::strategy::{RolloutConfig, Strategy};

/// Experiment variant attached to a routing decision for analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Variant {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "canary")]
    Canary,
    #[serde(rename = "shadow")]
    Shadow,
}

impl Variant {
    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::Canary => "canary",
            Self::Shadow => "shadow",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of routing one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Version whose result is returned to the caller.
    pub served_version: String,
    /// Variant of the served call, if the request is part of an experiment.
    pub variant: Option<Variant>,
    /// Set when a background shadow call should be made.
    pub is_shadow: bool,
    /// Version to invoke in the background, labelled [`Variant::Shadow`].
    pub shadow_version: Option<String>,
}

impl RoutingDecision {
    fn serve(version: &str, variant: Option<Variant>) -> Self {
        Self {
            served_version: version.to_string(),
            variant,
            is_shadow: false,
            shadow_version: None,
        }
    }

    pub fn variant_label(&self) -> Option<&'static str> {
        self.variant.as_ref().map(Variant::label)
    }
}

/// Decide which version serves `user_id` under `config`.
///
/// Pure and infallible. Strategies that need a canary version fall back to
/// fixed routing when none is configured.
pub fn route(config: &RolloutConfig, user_id: u64) -> RoutingDecision {
    let primary = config.primary_version();
    let canary = match config.canary_version() {
        Some(canary) => canary,
        None => return RoutingDecision::serve(primary, None),
    };

    match config.strategy() {
        Strategy::Fixed => RoutingDecision::serve(primary, None),
        Strategy::Canary => {
            let bucket = (user_id % 100) as f64;
            if bucket < config.canary_percentage() {
                RoutingDecision::serve(canary, Some(Variant::Canary))
            } else {
                RoutingDecision::serve(primary, None)
            }
        }
        Strategy::AbTest => {
            if user_id % 2 == 0 {
                RoutingDecision::serve(canary, Some(Variant::B))
            } else {
                RoutingDecision::serve(primary, Some(Variant::A))
            }
        }
        Strategy::Shadow => RoutingDecision {
            served_version: primary.to_string(),
            variant: None,
            is_shadow: true,
            shadow_version: Some(canary.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RolloutUpdate;

    fn canary(pct: f64) -> RolloutConfig {
        RolloutConfig::new("v1")
            .with_strategy(Strategy::Canary)
            .with_canary("v2", pct)
    }

    fn fixed_decision(version: &str) -> RoutingDecision {
        RoutingDecision {
            served_version: version.to_string(),
            variant: None,
            is_shadow: false,
            shadow_version: None,
        }
    }

    #[test]
    fn route_is_deterministic() {
        for cfg in [
            canary(37.0),
            RolloutConfig::new("v1")
                .with_strategy(Strategy::AbTest)
                .with_canary("v2", 0.0),
        ] {
            for user_id in [0, 1, 36, 37, 12_345, u64::MAX] {
                let first = route(&cfg, user_id);
                for _ in 0..10 {
                    assert_eq!(route(&cfg, user_id), first);
                }
            }
        }
    }

    #[test]
    fn fixed_always_serves_primary() {
        let cfg = RolloutConfig::new("v1").with_canary("v2", 100.0);
        for user_id in 0..1000 {
            assert_eq!(route(&cfg, user_id), fixed_decision("v1"));
        }
    }

    #[test]
    fn canary_zero_percent_is_fixed() {
        let cfg = canary(0.0);
        for user_id in 0..1000 {
            assert_eq!(route(&cfg, user_id), fixed_decision("v1"));
        }
    }

    #[test]
    fn canary_hundred_percent_is_all_canary() {
        let cfg = canary(100.0);
        for user_id in 0..1000 {
            let decision = route(&cfg, user_id);
            assert_eq!(decision.served_version, "v2");
            assert_eq!(decision.variant, Some(Variant::Canary));
        }
    }

    #[test]
    fn canary_fraction_is_exact_over_one_bucket_cycle() {
        for pct in [1u64, 10, 33, 50, 99] {
            let cfg = canary(pct as f64);
            let routed = (0..100)
                .filter(|&user_id| route(&cfg, user_id).served_version == "v2")
                .count() as u64;
            assert_eq!(routed, pct, "percentage {pct}");
        }
    }

    #[test]
    fn canary_fractional_percentage_rounds_up_bucket() {
        // Buckets 0..=10 satisfy `b < 10.5`.
        let cfg = canary(10.5);
        let routed = (0..100)
            .filter(|&user_id| route(&cfg, user_id).served_version == "v2")
            .count();
        assert_eq!(routed, 11);
    }

    #[test]
    fn canary_scenario_from_runbook() {
        let cfg = canary(10.0);

        let d = route(&cfg, 5);
        assert_eq!(d.served_version, "v2");
        assert_eq!(d.variant_label(), Some("canary"));

        let d = route(&cfg, 55);
        assert_eq!(d.served_version, "v1");
        assert_eq!(d.variant_label(), None);
    }

    #[test]
    fn ab_test_splits_on_parity() {
        let cfg = RolloutConfig::new("v1")
            .with_strategy(Strategy::AbTest)
            .with_canary("v2", 0.0);

        let d = route(&cfg, 10);
        assert_eq!(d.served_version, "v2");
        assert_eq!(d.variant, Some(Variant::B));

        let d = route(&cfg, 11);
        assert_eq!(d.served_version, "v1");
        assert_eq!(d.variant, Some(Variant::A));

        let start = 4_321u64;
        let b = (start..start + 1000)
            .filter(|&id| route(&cfg, id).variant == Some(Variant::B))
            .count();
        assert_eq!(b, 500);

        for id in start..start + 1000 {
            let expected = if id % 2 == 0 { Variant::B } else { Variant::A };
            assert_eq!(route(&cfg, id).variant, Some(expected));
        }
    }

    #[test]
    fn ab_test_ignores_canary_percentage() {
        let cfg = RolloutConfig::new("v1")
            .with_strategy(Strategy::AbTest)
            .with_canary("v2", 0.0);
        assert_eq!(route(&cfg, 2).served_version, "v2");
    }

    #[test]
    fn shadow_serves_primary_and_requests_background_call() {
        let cfg = RolloutConfig::new("v1")
            .with_strategy(Strategy::Shadow)
            .with_canary("v2", 0.0);

        for user_id in 0..100 {
            let d = route(&cfg, user_id);
            assert_eq!(d.served_version, "v1");
            assert_eq!(d.variant, None);
            assert!(d.is_shadow);
            assert_eq!(d.shadow_version.as_deref(), Some("v2"));
        }
    }

    #[test]
    fn missing_canary_degrades_to_fixed() {
        for strategy in [Strategy::Canary, Strategy::AbTest, Strategy::Shadow] {
            let mut cfg = RolloutConfig::new("v1");
            cfg.apply(&RolloutUpdate {
                strategy: Some(strategy.to_string()),
                canary_percentage: Some(100.0),
                ..Default::default()
            })
            .unwrap();

            for user_id in 0..1000 {
                assert_eq!(route(&cfg, user_id), fixed_decision("v1"), "{strategy}");
            }
        }
    }

    #[test]
    fn variant_labels() {
        assert_eq!(Variant::A.label(), "A");
        assert_eq!(Variant::B.label(), "B");
        assert_eq!(Variant::Canary.to_string(), "canary");
        assert_eq!(serde_json::to_string(&Variant::Shadow).unwrap(), "\"shadow\"");
    }
}
