//! Engine configuration

use crate::clock::{Clock, FixedOffsetClock, SystemClock};
use crate::error::EvolveError;
use crate::types::DEFAULT_DAILY_GOAL;
use serde::{Deserialize, Serialize};

/// Largest supported UTC offset, in minutes
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Settings for one [`EvolutionProcessor`](crate::engine::EvolutionProcessor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Step goal for days that have no record yet
    pub daily_goal: u32,
    /// Fixed offset used to decide "today"; the device time zone when unset
    pub utc_offset_minutes: Option<i32>,
    /// Whether phases above 2 are accessible
    pub premium: bool,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            daily_goal: DEFAULT_DAILY_GOAL,
            utc_offset_minutes: None,
            premium: false,
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> Result<(), EvolveError> {
        if self.daily_goal == 0 {
            return Err(EvolveError::InvalidGoal(0));
        }
        if let Some(minutes) = self.utc_offset_minutes {
            if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
                return Err(EvolveError::InvalidConfig(format!(
                    "utc_offset_minutes {} is outside +/-{}",
                    minutes, MAX_UTC_OFFSET_MINUTES
                )));
            }
        }
        Ok(())
    }

    /// Wall clock matching this configuration
    pub fn clock(&self) -> Box<dyn Clock> {
        match self.utc_offset_minutes.and_then(FixedOffsetClock::from_minutes) {
            Some(clock) => Box::new(clock),
            None => Box::new(SystemClock),
        }
    }

    /// Load and validate a configuration from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, EvolveError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, EvolveError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = EvolutionConfig::from_json("{}").unwrap();
        assert_eq!(config, EvolutionConfig::default());
        assert_eq!(config.daily_goal, 7_500);
        assert!(!config.premium);
    }

    #[test]
    fn test_rejects_zero_goal() {
        let err = EvolutionConfig::from_json(r#"{"daily_goal": 0}"#).unwrap_err();
        assert!(matches!(err, EvolveError::InvalidGoal(0)));
    }

    #[test]
    fn test_rejects_wild_offset() {
        let err = EvolutionConfig::from_json(r#"{"utc_offset_minutes": 5000}"#).unwrap_err();
        assert!(matches!(err, EvolveError::InvalidConfig(_)));
    }

    #[test]
    fn test_partial_json() {
        let config =
            EvolutionConfig::from_json(r#"{"daily_goal": 10000, "utc_offset_minutes": -300}"#).unwrap();
        assert_eq!(config.daily_goal, 10_000);
        assert_eq!(config.utc_offset_minutes, Some(-300));
        assert!(!config.premium);
    }
}
