//! Configuration structures for training
//!
//! This module provides the JSON configuration of the quasi-Newton optimizer
//! and its learning-rate algorithm. Every field has a default, so a file only
//! needs the settings it changes.

use serde::Deserialize;
use std::fs;

use crate::error::{Error, Result};
use crate::optimizers::{InverseHessianApproximationMethod, LearningRateMethod};

/// Configuration for quasi-Newton training
///
/// Method names are the variant names of the corresponding enums:
///
/// - **inverse_hessian_approximation_method**: `"DFP"` or `"BFGS"` (default)
/// - **learning_rate_method**: `"GoldenSection"` or `"BrentMethod"` (default)
///
/// When `threads` is set the optimizer runs its linear algebra on a dedicated
/// pool of that size.
///
/// # Example
///
/// ```json
/// {
///   "inverse_hessian_approximation_method": "BFGS",
///   "learning_rate_method": "BrentMethod",
///   "loss_goal": 0.001,
///   "maximum_epochs_number": 500,
///   "display": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuasiNewtonConfig {
    /// Inverse Hessian update formula: "DFP" or "BFGS"
    pub inverse_hessian_approximation_method: String,

    /// Bracket reduction in the line search: "GoldenSection" or "BrentMethod"
    pub learning_rate_method: String,

    /// Line search stops when the bracket is this small relative to its middle point
    pub learning_rate_tolerance: f64,

    /// Line search stops when the loss improves by less than this
    pub loss_tolerance: f64,

    /// Initial step of the first line search
    pub first_learning_rate: f64,

    /// Training stops once the loss reaches this value
    pub loss_goal: f64,

    /// A loss decrease at or below this value counts as a failure
    pub minimum_loss_decrease: f64,

    /// Consecutive decrease failures tolerated before stopping
    pub maximum_loss_decrease_failures: usize,

    /// Consecutive selection error increases tolerated before stopping
    pub maximum_selection_failures: usize,

    /// Maximum number of epochs
    pub maximum_epochs_number: usize,

    /// Maximum training time in seconds
    pub maximum_time: f64,

    /// Emit per-epoch progress events
    pub display: bool,

    /// Worker threads for the optimizer device (sequential when absent)
    pub threads: Option<usize>,
}

impl Default for QuasiNewtonConfig {
    fn default() -> Self {
        Self {
            inverse_hessian_approximation_method: InverseHessianApproximationMethod::default()
                .name()
                .to_string(),
            learning_rate_method: LearningRateMethod::default().name().to_string(),
            learning_rate_tolerance: 1e-3,
            loss_tolerance: 1e-12,
            first_learning_rate: 0.01,
            loss_goal: 0.0,
            minimum_loss_decrease: 0.0,
            maximum_loss_decrease_failures: 0,
            maximum_selection_failures: 1_000_000,
            maximum_epochs_number: 1000,
            maximum_time: 3600.0,
            display: false,
            threads: None,
        }
    }
}

/// Loads a quasi-Newton configuration from a JSON file.
///
/// Reads the file at `path`, deserializes its JSON contents into a
/// `QuasiNewtonConfig` and validates it.
///
/// # Returns
///
/// `Ok(QuasiNewtonConfig)` on success, or an error if the file cannot be read,
/// the JSON is invalid, or a value is out of range.
///
/// # Examples
///
/// ```no_run
/// use rust_quasi_newton::config::load_config;
///
/// let cfg = load_config("config/quasi_newton_bfgs.json").unwrap();
/// assert_eq!(cfg.inverse_hessian_approximation_method, "BFGS");
/// ```
pub fn load_config(path: &str) -> Result<QuasiNewtonConfig> {
    let contents = fs::read_to_string(path)?;
    let config: QuasiNewtonConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &QuasiNewtonConfig) -> Result<()> {
    config
        .inverse_hessian_approximation_method
        .parse::<InverseHessianApproximationMethod>()
        .map_err(|err| Error::InvalidConfig(err.to_string()))?;

    config
        .learning_rate_method
        .parse::<LearningRateMethod>()
        .map_err(|err| Error::InvalidConfig(err.to_string()))?;

    let non_negative = [
        ("learning_rate_tolerance", config.learning_rate_tolerance),
        ("loss_tolerance", config.loss_tolerance),
        ("minimum_loss_decrease", config.minimum_loss_decrease),
        ("maximum_time", config.maximum_time),
    ];
    for (name, value) in non_negative {
        if !(value >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "{} must be non-negative",
                name
            )));
        }
    }

    if !(config.first_learning_rate > 0.0) {
        return Err(Error::InvalidConfig(
            "first_learning_rate must be positive".to_string(),
        ));
    }

    if config.threads == Some(0) {
        return Err(Error::InvalidConfig(
            "threads must be at least 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: QuasiNewtonConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, QuasiNewtonConfig::default());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_method_is_invalid() {
        let config = QuasiNewtonConfig {
            inverse_hessian_approximation_method: "SR1".to_string(),
            ..QuasiNewtonConfig::default()
        };
        assert!(matches!(validate_config(&config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_negative_tolerance_is_invalid() {
        let config = QuasiNewtonConfig {
            loss_tolerance: -1.0,
            ..QuasiNewtonConfig::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("loss_tolerance"));
    }
}
