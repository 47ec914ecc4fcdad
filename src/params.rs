//! Parameter metadata for detectors and the simulator
//!
//! This module provides metadata about tunable parameters, enabling:
//! - Grid search over detector and risk settings
//! - Parameter documentation
//!
//! # Example
//!
//! ```rust
//! use insidebar::prelude::*;
//!
//! for param in InsideBarDetector::param_meta() {
//!   println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let detectors: Vec<InsideBarDetector> = param_grid().unwrap();
//! assert_eq!(detectors.len(), 3 * 5);
//! ```

use std::collections::HashMap;

use crate::{BacktestError, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Ratio value (0.0..=1.0)
  Ratio,
  /// Period value (positive integer)
  Period,
  /// Positive real value
  Real,
}

/// Metadata for a single parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "risk_reward_ratio")
  pub name: &'static str,
  /// Parameter type
  pub param_type: ParamType,
  /// Default value
  pub default: f64,
  /// Range for optimization: (min, max, step)
  pub range: (f64, f64, f64),
  /// Human-readable description
  pub description: &'static str,
}

impl ParamMeta {
  /// Create a new ParamMeta for a Ratio parameter
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  /// Create a new ParamMeta for a Period parameter
  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  /// Create a new ParamMeta for a positive real parameter
  pub const fn real(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Real, default, range, description }
  }

  /// Generate all values for grid search
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    // Index-based to avoid accumulating step rounding error
    let count = ((max - min) / step + 1e-9).floor() as usize + 1;
    (0..count).map(|i| min + step * i as f64).collect()
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(BacktestError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(BacktestError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
      ParamType::Real => {
        if !value.is_finite() || value <= 0.0 {
          return Err(BacktestError::InvalidValue("Value must be positive and finite"));
        }
        Ok(())
      },
    }
  }
}

// ============================================================
// PARAMETERIZED TRAIT
// ============================================================

/// Trait for components that support parameterization
///
/// Implementing this trait enables:
/// - Discovery of available parameters
/// - Creation of instances with custom parameter values
/// - Grid search via [`param_grid`]
pub trait Parameterized: Sized {
  /// Returns metadata for all tunable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates an instance with parameters from a HashMap
  ///
  /// Missing parameters use their default values.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

  /// Current values, keyed like [`Parameterized::param_meta`]
  fn current_params(&self) -> HashMap<&'static str, f64>;

  /// Short identifier used in sweep reports
  fn name() -> &'static str;
}

/// Every combination of the grids in `P::param_meta()`, in row-major order
/// (the last parameter varies fastest).
pub fn param_grid<P: Parameterized>() -> Result<Vec<P>> {
  let metas = P::param_meta();
  let grids: Vec<Vec<f64>> = metas.iter().map(ParamMeta::generate_grid).collect();

  let mut combos: Vec<HashMap<&str, f64>> = vec![HashMap::new()];
  for (meta, grid) in metas.iter().zip(&grids) {
    combos = combos
      .into_iter()
      .flat_map(|combo| {
        grid.iter().map(move |&v| {
          let mut next = combo.clone();
          next.insert(meta.name, v);
          next
        })
      })
      .collect();
  }

  combos.iter().map(P::with_params).collect()
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  Period::new(value as usize)
}

/// Helper to get a positive, finite real from params with default fallback
pub fn get_real(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<f64> {
  let value = params.get(key).copied().unwrap_or(default);
  if !value.is_finite() || value <= 0.0 {
    return Err(BacktestError::InvalidConfig(format!(
      "{key} must be positive and finite, got {value}"
    )));
  }
  Ok(value)
}

// ============================================================
// TESTS
// ============================================================
