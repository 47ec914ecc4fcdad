//! Run configuration loaded from TOML
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! initial_capital = 10000.0
//!
//! [detector]
//! containment_tolerance = 0.0
//! max_wait = 3          # 0 waits without limit
//!
//! [backtest]
//! risk_reward_ratio = 2.0
//! trade_size = 1.0
//! same_bar = "StopFirst"
//! end_of_data = "Discard"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    backtest::BacktestConfig, detectors::InsideBarDetector, BacktestError, Result, SetupDetector,
    SweepParams,
};

/// Everything one backtest run needs besides the bars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Starting equity for metrics
    pub initial_capital: f64,
    pub detector: InsideBarDetector,
    pub backtest: BacktestConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            detector: InsideBarDetector::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        debug!(path = %path.display(), ?config, "loaded run config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidConfig(format!(
                "initial_capital must be positive and finite, got {}",
                self.initial_capital
            )));
        }
        self.detector.validate_config()?;
        self.backtest.validate()
    }

    /// Detector and simulator settings as one sweep entry
    pub fn sweep_params(&self) -> SweepParams {
        SweepParams {
            detector: self.detector,
            backtest: self.backtest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{EndOfData, SameBarPolicy};

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(RunConfig::from_toml_str("").unwrap(), RunConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = RunConfig::from_toml_str(
            r#"
            initial_capital = 5000.0

            [detector]
            max_wait = 5

            [backtest]
            risk_reward_ratio = 1.5
            same_bar = "TargetFirst"
            end_of_data = "CloseAtLast"
            "#,
        )
        .unwrap();

        assert_eq!(config.initial_capital, 5000.0);
        assert_eq!(config.detector.max_wait.map(|p| p.get()), Some(5));
        assert_eq!(config.detector.containment_tolerance.get(), 0.0);
        assert_eq!(config.backtest.risk_reward_ratio, 1.5);
        assert_eq!(config.backtest.trade_size, 1.0);
        assert_eq!(config.backtest.same_bar, SameBarPolicy::TargetFirst);
        assert_eq!(config.backtest.end_of_data, EndOfData::CloseAtLast);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            RunConfig::from_toml_str("initial_capital = -1.0"),
            Err(BacktestError::InvalidConfig(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("[backtest]\nrisk_reward_ratio = 0.0"),
            Err(BacktestError::InvalidConfig(_))
        ));
        // Validated newtypes reject during deserialization
        assert!(matches!(
            RunConfig::from_toml_str("[detector]\ncontainment_tolerance = 1.5"),
            Err(BacktestError::Toml(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("[detector]\nmax_wait = -1"),
            Err(BacktestError::Toml(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(matches!(
            RunConfig::from_toml_str("capital = 1.0"),
            Err(BacktestError::Toml(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("[backtest]\nrisk_reward = 3.0"),
            Err(BacktestError::Toml(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("[detector]\ntolerance = 0.05"),
            Err(BacktestError::Toml(_))
        ));
    }

    #[test]
    fn test_zero_max_wait_is_unbounded() {
        let config = RunConfig::from_toml_str("[detector]\nmax_wait = 0").unwrap();
        assert_eq!(config.detector.max_wait, None);
    }

    #[test]
    fn test_unbounded_wait_round_trips() {
        let config = RunConfig {
            detector: InsideBarDetector::default().unbounded(),
            ..RunConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("max_wait = 0"), "{text}");
        assert_eq!(RunConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = RunConfig {
            initial_capital: 2500.0,
            detector: InsideBarDetector {
                containment_tolerance: crate::Ratio::new(0.05).unwrap(),
                ..InsideBarDetector::default()
            },
            ..RunConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(RunConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            RunConfig::load("/nonexistent/insidebar.toml"),
            Err(BacktestError::Io(_))
        ));
    }
}
