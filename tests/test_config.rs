//! Tests for configuration parsing
//!
//! This file tests the config module including:
//! - Loading the sample config files
//! - Defaults for missing fields
//! - Handling invalid JSON, unknown method names and out-of-range values
//! - Handling missing files
//! - Applying a config to the quasi-Newton optimizer

use rust_quasi_newton::config::{load_config, QuasiNewtonConfig};
use rust_quasi_newton::loss::SumSquaredError;
use rust_quasi_newton::optimizers::{
    InverseHessianApproximationMethod, LearningRateMethod, QuasiNewtonMethod,
};
use rust_quasi_newton::Error;
use std::fs;
use tempfile::TempDir;

// Writes `contents` to a file inside `dir` and returns its path.
fn write_config(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Valid Config Loading Tests
// ============================================================================

mod valid_config_tests {
    use super::*;

    #[test]
    fn test_load_bfgs_config() {
        let config =
            load_config("config/quasi_newton_bfgs.json").expect("Failed to load BFGS config");

        assert_eq!(config.inverse_hessian_approximation_method, "BFGS");
        assert_eq!(config.learning_rate_method, "BrentMethod");
        assert_eq!(config.maximum_epochs_number, 1000);
        assert!(config.display);
        assert_eq!(config.threads, None);
    }

    #[test]
    fn test_load_dfp_config() {
        let config =
            load_config("config/quasi_newton_dfp.json").expect("Failed to load DFP config");

        assert_eq!(config.inverse_hessian_approximation_method, "DFP");
        assert_eq!(config.learning_rate_method, "GoldenSection");
        assert_eq!(config.loss_goal, 0.001);
        assert_eq!(config.maximum_loss_decrease_failures, 5);
        assert_eq!(config.threads, Some(2));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "partial.json", r#"{ "maximum_epochs_number": 25 }"#);
        let config = load_config(&path).unwrap();

        assert_eq!(config.maximum_epochs_number, 25);
        assert_eq!(config.inverse_hessian_approximation_method, "BFGS");
        assert_eq!(config.first_learning_rate, 0.01);
        assert_eq!(config.maximum_selection_failures, 1_000_000);
        assert_eq!(config.maximum_time, 3600.0);
    }
}

// ============================================================================
// Error Handling Tests
// ============================================================================

mod error_handling_tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = load_config("nonexistent_config.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_invalid_json_syntax() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "invalid.json",
            r#"{
  "inverse_hessian_approximation_method": "DFP",
  "maximum_epochs_number": 3
  // Missing closing brace
"#,
        );
        assert!(matches!(load_config(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_wrong_field_type() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "wrong_type.json", r#"{ "maximum_epochs_number": "many" }"#);
        assert!(matches!(load_config(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_unknown_method_names() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "unknown_hessian.json",
            r#"{ "inverse_hessian_approximation_method": "SR1" }"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("SR1"));

        let path = write_config(
            &dir,
            "unknown_learning_rate.json",
            r#"{ "learning_rate_method": "Bisection" }"#,
        );
        assert!(matches!(load_config(&path), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_out_of_range_values() {
        let dir = TempDir::new().unwrap();
        for (name, contents) in [
            ("tolerance.json", r#"{ "learning_rate_tolerance": -0.1 }"#),
            ("time.json", r#"{ "maximum_time": -1.0 }"#),
            ("rate.json", r#"{ "first_learning_rate": 0.0 }"#),
            ("threads.json", r#"{ "threads": 0 }"#),
        ] {
            let path = write_config(&dir, name, contents);
            assert!(
                matches!(load_config(&path), Err(Error::InvalidConfig(_))),
                "{} should be rejected",
                name
            );
        }
    }
}

// ============================================================================
// Optimizer Configuration Tests
// ============================================================================

mod apply_config_tests {
    use super::*;

    #[test]
    fn test_apply_config_to_optimizer() {
        let config = load_config("config/quasi_newton_dfp.json").unwrap();
        let mut optimizer = QuasiNewtonMethod::<SumSquaredError>::default();
        optimizer.apply_config(&config).unwrap();

        assert_eq!(
            optimizer.inverse_hessian_approximation_method(),
            InverseHessianApproximationMethod::DFP
        );
        assert_eq!(
            optimizer.learning_rate_algorithm().method(),
            LearningRateMethod::GoldenSection
        );
        assert_eq!(optimizer.learning_rate_algorithm().learning_rate_tolerance(), 0.0001);
        assert_eq!(optimizer.loss_goal(), 0.001);
        assert_eq!(optimizer.maximum_loss_decrease_failures(), 5);
        assert_eq!(optimizer.maximum_epochs_number(), 500);
        assert_eq!(optimizer.device().threads(), 2);
    }

    #[test]
    fn test_apply_default_config_matches_default_optimizer() {
        let mut optimizer = QuasiNewtonMethod::<SumSquaredError>::default();
        optimizer.set_maximum_epochs_number(7);
        optimizer.apply_config(&QuasiNewtonConfig::default()).unwrap();

        let fresh = QuasiNewtonMethod::<SumSquaredError>::default();
        assert_eq!(optimizer.maximum_epochs_number(), fresh.maximum_epochs_number());
        assert_eq!(optimizer.first_learning_rate(), fresh.first_learning_rate());
        assert_eq!(optimizer.maximum_time(), fresh.maximum_time());
        assert!(!optimizer.device().is_parallel());
    }
}
