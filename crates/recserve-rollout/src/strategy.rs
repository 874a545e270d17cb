//! Rollout strategies and the live rollout configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RolloutError, RolloutResult};

/// How traffic is split between the primary and canary versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// All traffic to the primary version. Default.
    #[default]
    Fixed,
    /// `user_id % 100 < canary_percentage` goes to the canary version.
    Canary,
    /// Even user ids to the canary (B), odd to the primary (A).
    AbTest,
    /// Primary serves; the canary is invoked in the background and discarded.
    Shadow,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Canary => "canary",
            Self::AbTest => "ab_test",
            Self::Shadow => "shadow",
        }
    }

    /// Whether this strategy needs a canary version to do anything.
    pub fn uses_canary(&self) -> bool {
        !matches!(self, Self::Fixed)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RolloutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "canary" => Ok(Self::Canary),
            "ab_test" => Ok(Self::AbTest),
            "shadow" => Ok(Self::Shadow),
            _ => Err(RolloutError::InvalidStrategy(s.to_string())),
        }
    }
}

/// The live rollout configuration.
///
/// `canary_percentage` is clamped to `[0, 100]` on every write, so fields
/// are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RolloutConfig {
    strategy: Strategy,
    primary_version: String,
    canary_version: Option<String>,
    canary_percentage: f64,
    environment: String,
}

impl RolloutConfig {
    /// A fixed-strategy config serving `primary_version` in `production`.
    pub fn new(primary_version: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::Fixed,
            primary_version: primary_version.into(),
            canary_version: None,
            canary_percentage: 0.0,
            environment: "production".to_string(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_canary(mut self, version: impl Into<String>, percentage: f64) -> Self {
        self.canary_version = Some(version.into());
        self.canary_percentage = clamp_percentage(percentage);
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn primary_version(&self) -> &str {
        &self.primary_version
    }

    pub fn canary_version(&self) -> Option<&str> {
        self.canary_version.as_deref()
    }

    pub fn canary_percentage(&self) -> f64 {
        self.canary_percentage
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn set_primary_version(&mut self, version: impl Into<String>) {
        self.primary_version = version.into();
    }

    /// The strategy actually in force: anything needing a canary version
    /// degrades to [`Strategy::Fixed`] when none is set.
    pub fn effective_strategy(&self) -> Strategy {
        if self.strategy.uses_canary() && self.canary_version.is_none() {
            Strategy::Fixed
        } else {
            self.strategy
        }
    }

    /// Merge a partial update. Fields the update leaves out are unchanged.
    ///
    /// The strategy is parsed before anything is written, so an invalid
    /// strategy leaves the whole config untouched.
    pub fn apply(&mut self, update: &RolloutUpdate) -> RolloutResult<()> {
        let strategy = update
            .strategy
            .as_deref()
            .map(Strategy::from_str)
            .transpose()?;

        if let Some(strategy) = strategy {
            self.strategy = strategy;
        }
        if let Some(version) = &update.canary_version {
            let version = version.trim();
            self.canary_version = (!version.is_empty()).then(|| version.to_string());
        }
        if let Some(pct) = update.canary_percentage {
            self.canary_percentage = clamp_percentage(pct);
        }
        Ok(())
    }
}

/// Operator-supplied partial rollout update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutUpdate {
    #[serde(default)]
    pub strategy: Option<String>,
    /// An empty string clears the canary version.
    #[serde(default)]
    pub canary_version: Option<String>,
    #[serde(default)]
    pub canary_percentage: Option<f64>,
}

fn clamp_percentage(pct: f64) -> f64 {
    if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) }
}
