//! Optimization algorithms for training neural network parameters
//!
//! This module provides the [`OptimizationAlgorithm`] trait, the stopping
//! conditions shared by every training loop and the [`TrainingResults`]
//! record a run produces.
//!
//! # Overview
//!
//! An optimization algorithm repeatedly asks a [`LossIndex`](crate::loss::LossIndex)
//! for the loss and its gradient, chooses a training direction, searches a
//! learning rate along it and moves the parameters. Training ends on the first
//! stopping condition that holds.
//!
//! # Available Algorithms
//!
//! - Quasi-Newton: DFP or BFGS inverse-Hessian approximation with a line search
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use rust_quasi_newton::layers::{ActivationFunction, PerceptronLayer};
//! use rust_quasi_newton::loss::SumSquaredError;
//! use rust_quasi_newton::network::NeuralNetwork;
//! use rust_quasi_newton::optimizers::{OptimizationAlgorithm, QuasiNewtonMethod};
//! use rust_quasi_newton::utils::SimpleRng;
//!
//! let mut rng = SimpleRng::new(7);
//! let layer = PerceptronLayer::new(1, 1, ActivationFunction::Linear, &mut rng);
//! let network = NeuralNetwork::new(vec![layer.into()]).unwrap();
//! let loss = SumSquaredError::new(network, array![[1.0], [2.0]], array![[2.0], [4.0]]).unwrap();
//!
//! let mut optimizer = QuasiNewtonMethod::new(loss);
//! optimizer.set_maximum_epochs_number(50);
//! let results = optimizer.perform_training().unwrap();
//! assert!(results.final_training_error() < 1e-6);
//! ```

use std::fmt;
use std::time::Duration;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod learning_rate;
pub mod quasi_newton;

pub use learning_rate::{LearningRateAlgorithm, LearningRateMethod};
pub use quasi_newton::{InverseHessianApproximationMethod, QuasiNewtonData, QuasiNewtonMethod};

/// Reason a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoppingCondition {
    LossGoal,
    MinimumLossDecrease,
    MaximumEpochsNumber,
    MaximumTime,
    MaximumSelectionErrorIncreases,
    ZeroLearningRate,
}

impl StoppingCondition {
    pub fn name(&self) -> &'static str {
        match self {
            StoppingCondition::LossGoal => "LossGoal",
            StoppingCondition::MinimumLossDecrease => "MinimumLossDecrease",
            StoppingCondition::MaximumEpochsNumber => "MaximumEpochsNumber",
            StoppingCondition::MaximumTime => "MaximumTime",
            StoppingCondition::MaximumSelectionErrorIncreases => "MaximumSelectionErrorIncreases",
            StoppingCondition::ZeroLearningRate => "ZeroLearningRate",
        }
    }

    /// True when training reached a target rather than a resource limit.
    pub fn is_convergence(&self) -> bool {
        matches!(
            self,
            StoppingCondition::LossGoal | StoppingCondition::MinimumLossDecrease
        )
    }
}

impl fmt::Display for StoppingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingResults {
    pub stopping_condition: StoppingCondition,
    /// Index of the last epoch evaluated.
    pub epochs_number: usize,
    /// Training loss at every evaluated epoch.
    pub training_error_history: Vec<f64>,
    /// Selection error at every evaluated epoch, empty without selection samples.
    pub selection_error_history: Vec<f64>,
    pub elapsed_time: Duration,
    pub final_parameters: Array1<f64>,
}

impl TrainingResults {
    pub fn final_training_error(&self) -> f64 {
        self.training_error_history
            .last()
            .copied()
            .unwrap_or(f64::NAN)
    }

    pub fn final_selection_error(&self) -> Option<f64> {
        self.selection_error_history.last().copied()
    }
}

/// Core trait for training algorithms.
///
/// An algorithm owns the loss index it minimizes. Calling
/// [`perform_training`](OptimizationAlgorithm::perform_training) runs epochs
/// until a [`StoppingCondition`] holds and leaves the loss index at the final
/// parameters.
pub trait OptimizationAlgorithm {
    /// Trains the attached loss index.
    ///
    /// # Errors
    ///
    /// [`Error::MissingLossIndex`](crate::error::Error::MissingLossIndex) when
    /// nothing is attached, or any shape error raised by the loss index.
    fn perform_training(&mut self) -> Result<TrainingResults>;

    /// Identifier written to saved models.
    fn write_optimization_algorithm_type(&self) -> &'static str;

    /// Name/value pairs describing the current settings.
    fn to_string_matrix(&self) -> Vec<(String, String)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_conditions() {
        assert!(StoppingCondition::LossGoal.is_convergence());
        assert!(StoppingCondition::MinimumLossDecrease.is_convergence());
        assert!(!StoppingCondition::MaximumTime.is_convergence());
        assert!(!StoppingCondition::ZeroLearningRate.is_convergence());
    }

    #[test]
    fn test_final_errors() {
        let results = TrainingResults {
            stopping_condition: StoppingCondition::MaximumEpochsNumber,
            epochs_number: 2,
            training_error_history: vec![3.0, 2.0, 1.0],
            selection_error_history: Vec::new(),
            elapsed_time: Duration::from_millis(5),
            final_parameters: Array1::zeros(2),
        };
        assert_eq!(results.final_training_error(), 1.0);
        assert_eq!(results.final_selection_error(), None);
        assert_eq!(results.stopping_condition.to_string(), "MaximumEpochsNumber");
    }
}
