//! Quasi-Newton training
//!
//! Builds an approximation of the inverse Hessian of the loss from successive
//! parameter and gradient differences (DFP or BFGS), so every epoch costs one
//! gradient evaluation plus a line search, never a second derivative.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::QuasiNewtonConfig;
use crate::error::{Error, Result};
use crate::loss::LossIndex;
use crate::optimizers::learning_rate::LearningRateAlgorithm;
use crate::optimizers::{OptimizationAlgorithm, StoppingCondition, TrainingResults};
use crate::utils::tensor::{self, NUMERIC_LIMITS_MIN};
use crate::utils::Device;

/// Update formula for the inverse Hessian approximation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InverseHessianApproximationMethod {
    /// Davidon-Fletcher-Powell
    DFP,
    /// Broyden-Fletcher-Goldfarb-Shanno
    #[default]
    BFGS,
}

impl InverseHessianApproximationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            InverseHessianApproximationMethod::DFP => "DFP",
            InverseHessianApproximationMethod::BFGS => "BFGS",
        }
    }
}

impl fmt::Display for InverseHessianApproximationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InverseHessianApproximationMethod {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "DFP" => Ok(InverseHessianApproximationMethod::DFP),
            "BFGS" => Ok(InverseHessianApproximationMethod::BFGS),
            other => Err(Error::UnknownInverseHessianMethod(other.to_string())),
        }
    }
}

/// Per-run optimizer state, owned by the training loop.
#[derive(Debug, Clone, PartialEq)]
pub struct QuasiNewtonData {
    pub old_parameters: Array1<f64>,
    pub parameters_difference: Array1<f64>,
    pub old_gradient: Array1<f64>,
    pub gradient_difference: Array1<f64>,
    pub inverse_hessian: Array2<f64>,
    pub old_inverse_hessian: Array2<f64>,
    pub training_direction: Array1<f64>,
    pub training_slope: f64,
    pub learning_rate: f64,
    pub old_learning_rate: f64,
    pub epoch: usize,
}

impl QuasiNewtonData {
    /// Zeroed state with an identity inverse Hessian.
    pub fn new(parameters_number: usize) -> Self {
        Self {
            old_parameters: Array1::zeros(parameters_number),
            parameters_difference: Array1::zeros(parameters_number),
            old_gradient: Array1::zeros(parameters_number),
            gradient_difference: Array1::zeros(parameters_number),
            inverse_hessian: Array2::eye(parameters_number),
            old_inverse_hessian: Array2::eye(parameters_number),
            training_direction: Array1::zeros(parameters_number),
            training_slope: 0.0,
            learning_rate: 0.0,
            old_learning_rate: 0.0,
            epoch: 0,
        }
    }
}

/// Quasi-Newton optimization algorithm.
///
/// Owns the loss index it trains. Every setting has a default, restored by
/// [`set_default`](QuasiNewtonMethod::set_default):
///
/// | Setting | Default |
/// |---|---|
/// | inverse Hessian method | BFGS |
/// | first learning rate | 0.01 |
/// | loss goal | 0 |
/// | minimum loss decrease | 0 |
/// | maximum loss decrease failures | 0 |
/// | maximum selection failures | 1 000 000 |
/// | maximum epochs | 1000 |
/// | maximum time | 3600 s |
#[derive(Debug, Clone)]
pub struct QuasiNewtonMethod<L> {
    loss_index: Option<L>,
    inverse_hessian_approximation_method: InverseHessianApproximationMethod,
    learning_rate_algorithm: LearningRateAlgorithm,
    first_learning_rate: f64,
    loss_goal: f64,
    minimum_loss_decrease: f64,
    maximum_loss_decrease_failures: usize,
    maximum_selection_failures: usize,
    maximum_epochs_number: usize,
    maximum_time: f64,
    display: bool,
    device: Device,
}

impl<L> Default for QuasiNewtonMethod<L> {
    fn default() -> Self {
        Self {
            loss_index: None,
            inverse_hessian_approximation_method: InverseHessianApproximationMethod::default(),
            learning_rate_algorithm: LearningRateAlgorithm::default(),
            first_learning_rate: 0.01,
            loss_goal: 0.0,
            minimum_loss_decrease: 0.0,
            maximum_loss_decrease_failures: 0,
            maximum_selection_failures: 1_000_000,
            maximum_epochs_number: 1000,
            maximum_time: 3600.0,
            display: false,
            device: Device::default(),
        }
    }
}

impl<L> QuasiNewtonMethod<L> {
    pub fn new(loss_index: L) -> Self {
        Self {
            loss_index: Some(loss_index),
            ..Self::default()
        }
    }

    /// Restores every setting to its default, keeping the loss index and device.
    pub fn set_default(&mut self) {
        let loss_index = self.loss_index.take();
        let device = self.device.clone();
        *self = Self {
            loss_index,
            device,
            ..Self::default()
        };
    }

    pub fn loss_index(&self) -> Option<&L> {
        self.loss_index.as_ref()
    }

    pub fn loss_index_mut(&mut self) -> Option<&mut L> {
        self.loss_index.as_mut()
    }

    pub fn set_loss_index(&mut self, loss_index: L) {
        self.loss_index = Some(loss_index);
    }

    pub fn take_loss_index(&mut self) -> Option<L> {
        self.loss_index.take()
    }

    pub fn inverse_hessian_approximation_method(&self) -> InverseHessianApproximationMethod {
        self.inverse_hessian_approximation_method
    }

    pub fn set_inverse_hessian_approximation_method(
        &mut self,
        method: InverseHessianApproximationMethod,
    ) {
        self.inverse_hessian_approximation_method = method;
    }

    /// Sets the method from `"DFP"` or `"BFGS"`.
    pub fn set_inverse_hessian_approximation_method_name(&mut self, name: &str) -> Result<()> {
        self.inverse_hessian_approximation_method = name.parse()?;
        Ok(())
    }

    pub fn learning_rate_algorithm(&self) -> &LearningRateAlgorithm {
        &self.learning_rate_algorithm
    }

    pub fn learning_rate_algorithm_mut(&mut self) -> &mut LearningRateAlgorithm {
        &mut self.learning_rate_algorithm
    }

    pub fn first_learning_rate(&self) -> f64 {
        self.first_learning_rate
    }

    pub fn set_first_learning_rate(&mut self, first_learning_rate: f64) {
        self.first_learning_rate = first_learning_rate;
    }

    pub fn loss_goal(&self) -> f64 {
        self.loss_goal
    }

    pub fn set_loss_goal(&mut self, loss_goal: f64) {
        self.loss_goal = loss_goal;
    }

    pub fn minimum_loss_decrease(&self) -> f64 {
        self.minimum_loss_decrease
    }

    pub fn set_minimum_loss_decrease(&mut self, minimum_loss_decrease: f64) {
        self.minimum_loss_decrease = minimum_loss_decrease;
    }

    pub fn maximum_loss_decrease_failures(&self) -> usize {
        self.maximum_loss_decrease_failures
    }

    /// Consecutive epochs tolerated with a decrease at or below the minimum.
    pub fn set_maximum_loss_decrease_failures(&mut self, failures: usize) {
        self.maximum_loss_decrease_failures = failures;
    }

    pub fn maximum_selection_failures(&self) -> usize {
        self.maximum_selection_failures
    }

    pub fn set_maximum_selection_failures(&mut self, failures: usize) {
        self.maximum_selection_failures = failures;
    }

    pub fn maximum_epochs_number(&self) -> usize {
        self.maximum_epochs_number
    }

    pub fn set_maximum_epochs_number(&mut self, maximum_epochs_number: usize) {
        self.maximum_epochs_number = maximum_epochs_number;
    }

    /// Maximum training time in seconds.
    pub fn maximum_time(&self) -> f64 {
        self.maximum_time
    }

    pub fn set_maximum_time(&mut self, maximum_time: f64) {
        self.maximum_time = maximum_time;
    }

    pub fn display(&self) -> bool {
        self.display
    }

    /// Emits a `debug!` event per epoch when set.
    pub fn set_display(&mut self, display: bool) {
        self.display = display;
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    /// Applies a loaded configuration. A `threads` entry replaces the device.
    pub fn apply_config(&mut self, config: &QuasiNewtonConfig) -> Result<()> {
        self.inverse_hessian_approximation_method =
            config.inverse_hessian_approximation_method.parse()?;
        self.learning_rate_algorithm
            .set_method(config.learning_rate_method.parse()?);
        self.learning_rate_algorithm
            .set_learning_rate_tolerance(config.learning_rate_tolerance);
        self.learning_rate_algorithm
            .set_loss_tolerance(config.loss_tolerance);
        self.first_learning_rate = config.first_learning_rate;
        self.loss_goal = config.loss_goal;
        self.minimum_loss_decrease = config.minimum_loss_decrease;
        self.maximum_loss_decrease_failures = config.maximum_loss_decrease_failures;
        self.maximum_selection_failures = config.maximum_selection_failures;
        self.maximum_epochs_number = config.maximum_epochs_number;
        self.maximum_time = config.maximum_time;
        self.display = config.display;
        if let Some(threads) = config.threads {
            self.device = Device::with_threads(threads)?;
        }
        Ok(())
    }

    /// Outer product `u ⊗ v` on the optimizer's device.
    pub fn kronecker_product(&self, u: &ArrayView1<f64>, v: &ArrayView1<f64>) -> Array2<f64> {
        if self.device.is_parallel() {
            self.device.outer(u, v)
        } else {
            tensor::kronecker_product(u, v)
        }
    }

    /// DFP update of `inverse_hessian`, or `None` when a denominator vanishes.
    pub fn calculate_dfp_inverse_hessian(
        &self,
        parameters_difference: &ArrayView1<f64>,
        gradient_difference: &ArrayView1<f64>,
        inverse_hessian: &ArrayView2<f64>,
    ) -> Result<Option<Array2<f64>>> {
        check_update_shapes(parameters_difference, gradient_difference, inverse_hessian)?;
        let parameters_dot_gradient = parameters_difference.dot(gradient_difference);
        let hessian_dot_gradient = self.device.matvec(inverse_hessian, gradient_difference)?;
        let gradient_hessian_gradient = gradient_difference.dot(&hessian_dot_gradient);

        if !(parameters_dot_gradient.abs() >= NUMERIC_LIMITS_MIN)
            || !(gradient_hessian_gradient.abs() >= NUMERIC_LIMITS_MIN)
        {
            return Ok(None);
        }

        let mut updated = inverse_hessian.to_owned();
        updated.scaled_add(
            1.0 / parameters_dot_gradient,
            &self.kronecker_product(parameters_difference, parameters_difference),
        );
        updated.scaled_add(
            -1.0 / gradient_hessian_gradient,
            &self.kronecker_product(&hessian_dot_gradient.view(), &hessian_dot_gradient.view()),
        );
        Ok(Some(updated))
    }

    /// BFGS update of `inverse_hessian`, or `None` when `Δp·Δg` vanishes.
    pub fn calculate_bfgs_inverse_hessian(
        &self,
        parameters_difference: &ArrayView1<f64>,
        gradient_difference: &ArrayView1<f64>,
        inverse_hessian: &ArrayView2<f64>,
    ) -> Result<Option<Array2<f64>>> {
        check_update_shapes(parameters_difference, gradient_difference, inverse_hessian)?;
        let parameters_dot_gradient = parameters_difference.dot(gradient_difference);
        if !(parameters_dot_gradient.abs() >= NUMERIC_LIMITS_MIN) {
            return Ok(None);
        }

        let hessian_dot_gradient = self.device.matvec(inverse_hessian, gradient_difference)?;
        let gradient_hessian_gradient = gradient_difference.dot(&hessian_dot_gradient);

        let mut cross = self.kronecker_product(&hessian_dot_gradient.view(), parameters_difference);
        cross += &self.kronecker_product(parameters_difference, &hessian_dot_gradient.view());

        let mut updated = inverse_hessian.to_owned();
        updated.scaled_add(
            (1.0 + gradient_hessian_gradient / parameters_dot_gradient) / parameters_dot_gradient,
            &self.kronecker_product(parameters_difference, parameters_difference),
        );
        updated.scaled_add(-1.0 / parameters_dot_gradient, &cross);
        Ok(Some(updated))
    }

    /// Next inverse Hessian approximation.
    ///
    /// Falls back to the identity when either difference is zero, a
    /// denominator vanishes, or the update is not finite.
    pub fn calculate_inverse_hessian_approximation(
        &self,
        parameters_difference: &ArrayView1<f64>,
        gradient_difference: &ArrayView1<f64>,
        old_inverse_hessian: &ArrayView2<f64>,
    ) -> Result<Array2<f64>> {
        check_update_shapes(parameters_difference, gradient_difference, old_inverse_hessian)?;
        let parameters_number = parameters_difference.len();

        if tensor::is_zero(parameters_difference) || tensor::is_zero(gradient_difference) {
            return Ok(Array2::eye(parameters_number));
        }

        let updated = match self.inverse_hessian_approximation_method {
            InverseHessianApproximationMethod::DFP => self.calculate_dfp_inverse_hessian(
                parameters_difference,
                gradient_difference,
                old_inverse_hessian,
            )?,
            InverseHessianApproximationMethod::BFGS => self.calculate_bfgs_inverse_hessian(
                parameters_difference,
                gradient_difference,
                old_inverse_hessian,
            )?,
        };

        Ok(match updated {
            Some(inverse_hessian) if inverse_hessian.iter().all(|value| value.is_finite()) => {
                inverse_hessian
            }
            Some(_) => {
                warn!(
                    method = %self.inverse_hessian_approximation_method,
                    "non-finite inverse hessian approximation, resetting to identity"
                );
                Array2::eye(parameters_number)
            }
            None => Array2::eye(parameters_number),
        })
    }

    fn check_stopping_condition(
        &self,
        epoch: usize,
        loss: f64,
        loss_decrease_failures: usize,
        elapsed_time: Duration,
        selection_failures: usize,
        learning_rate: f64,
    ) -> Option<StoppingCondition> {
        if loss <= self.loss_goal {
            Some(StoppingCondition::LossGoal)
        } else if epoch > 0 && loss_decrease_failures > self.maximum_loss_decrease_failures {
            Some(StoppingCondition::MinimumLossDecrease)
        } else if epoch >= self.maximum_epochs_number {
            Some(StoppingCondition::MaximumEpochsNumber)
        } else if elapsed_time.as_secs_f64() >= self.maximum_time {
            Some(StoppingCondition::MaximumTime)
        } else if selection_failures >= self.maximum_selection_failures {
            Some(StoppingCondition::MaximumSelectionErrorIncreases)
        } else if epoch > 0 && learning_rate == 0.0 {
            Some(StoppingCondition::ZeroLearningRate)
        } else {
            None
        }
    }
}

impl<L: LossIndex> QuasiNewtonMethod<L> {
    /// Trains `loss_index` with the current settings.
    ///
    /// [`perform_training`](OptimizationAlgorithm::perform_training) calls this
    /// on the attached loss index.
    pub fn train_with(&self, loss_index: &mut L) -> Result<TrainingResults> {
        let start = Instant::now();

        let mut parameters = loss_index.parameters();
        let mut data = QuasiNewtonData::new(parameters.len());

        let mut training_error_history = Vec::new();
        let mut selection_error_history = Vec::new();
        let mut previous_loss = f64::INFINITY;
        let mut previous_selection_error: Option<f64> = None;
        let mut loss_decrease_failures = 0;
        let mut selection_failures = 0;

        let mut stopping_condition = StoppingCondition::MaximumEpochsNumber;
        let mut epochs_number = 0;

        for epoch in 0..=self.maximum_epochs_number {
            data.epoch = epoch;
            epochs_number = epoch;

            let (loss, gradient) = loss_index.loss_and_gradient(&parameters.view())?;
            tensor::check_size(&gradient.view(), parameters.len(), "loss index gradient")?;
            training_error_history.push(loss);

            let selection_error = loss_index.selection_error(&parameters.view())?;
            if let Some(error) = selection_error {
                match previous_selection_error {
                    Some(previous) if error > previous => selection_failures += 1,
                    _ => selection_failures = 0,
                }
                selection_error_history.push(error);
                previous_selection_error = Some(error);
            }

            if epoch > 0 && previous_loss - loss <= self.minimum_loss_decrease {
                loss_decrease_failures += 1;
            } else {
                loss_decrease_failures = 0;
            }
            previous_loss = loss;

            if self.display {
                debug!(
                    epoch,
                    loss,
                    learning_rate = data.learning_rate,
                    selection_error = ?selection_error,
                    "quasi-newton epoch"
                );
            }

            if let Some(condition) = self.check_stopping_condition(
                epoch,
                loss,
                loss_decrease_failures,
                start.elapsed(),
                selection_failures,
                data.learning_rate,
            ) {
                info!(epoch, loss, stopping_condition = %condition, "training finished");
                stopping_condition = condition;
                break;
            }

            self.update_parameters(loss_index, &mut parameters, loss, &gradient, &mut data)?;
        }

        loss_index.set_parameters(&parameters.view())?;

        Ok(TrainingResults {
            stopping_condition,
            epochs_number,
            training_error_history,
            selection_error_history,
            elapsed_time: start.elapsed(),
            final_parameters: parameters,
        })
    }

    fn update_parameters(
        &self,
        loss_index: &mut L,
        parameters: &mut Array1<f64>,
        loss: f64,
        gradient: &Array1<f64>,
        data: &mut QuasiNewtonData,
    ) -> Result<()> {
        let parameters_number = parameters.len();

        if data.epoch == 0 {
            data.inverse_hessian = Array2::eye(parameters_number);
        } else {
            data.parameters_difference = &*parameters - &data.old_parameters;
            data.gradient_difference = gradient - &data.old_gradient;
            let updated = self.calculate_inverse_hessian_approximation(
                &data.parameters_difference.view(),
                &data.gradient_difference.view(),
                &data.inverse_hessian.view(),
            )?;
            data.old_inverse_hessian = std::mem::replace(&mut data.inverse_hessian, updated);
        }

        let mut learning_rate = 0.0;
        let mut direction = Array1::zeros(parameters_number);
        let mut slope = 0.0;

        // a stationary point has no direction to search
        if !tensor::is_zero(&gradient.view()) {
            direction = -self
                .device
                .matvec(&data.inverse_hessian.view(), &gradient.view())?;
            slope = gradient.dot(&direction);

            if !(slope < 0.0) {
                warn!(
                    epoch = data.epoch,
                    slope, "not a descent direction, resetting inverse hessian"
                );
                data.inverse_hessian = Array2::eye(parameters_number);
                direction = gradient.mapv(|value| -value);
                slope = gradient.dot(&direction);
            }

            let initial_learning_rate = if data.epoch == 0 || data.learning_rate == 0.0 {
                self.first_learning_rate
            } else {
                data.learning_rate
            };

            (learning_rate, _) = self.learning_rate_algorithm.calculate_directional_point(
                loss_index,
                &parameters.view(),
                loss,
                &direction.view(),
                initial_learning_rate,
            )?;

            if learning_rate == 0.0 && data.epoch > 0 {
                data.inverse_hessian = Array2::eye(parameters_number);
                direction = gradient.mapv(|value| -value);
                slope = gradient.dot(&direction);
                (learning_rate, _) = self.learning_rate_algorithm.calculate_directional_point(
                    loss_index,
                    &parameters.view(),
                    loss,
                    &direction.view(),
                    self.first_learning_rate,
                )?;
            }
        }

        data.old_parameters.assign(&*parameters);
        data.old_gradient.assign(gradient);
        data.old_learning_rate = data.learning_rate;
        data.learning_rate = learning_rate;
        data.training_slope = slope;
        data.training_direction = direction;

        if learning_rate > 0.0 {
            parameters.scaled_add(learning_rate, &data.training_direction);
        }

        Ok(())
    }
}

// Both differences and the inverse Hessian must share the parameter count.
fn check_update_shapes(
    parameters_difference: &ArrayView1<f64>,
    gradient_difference: &ArrayView1<f64>,
    inverse_hessian: &ArrayView2<f64>,
) -> Result<()> {
    let parameters_number = parameters_difference.len();
    tensor::check_size(gradient_difference, parameters_number, "gradient difference")?;
    tensor::check_dimensions(
        inverse_hessian,
        parameters_number,
        parameters_number,
        "inverse hessian",
    )
}

impl<L: LossIndex> OptimizationAlgorithm for QuasiNewtonMethod<L> {
    fn perform_training(&mut self) -> Result<TrainingResults> {
        let mut loss_index = self.loss_index.take().ok_or(Error::MissingLossIndex)?;
        let results = self.train_with(&mut loss_index);
        self.loss_index = Some(loss_index);
        results
    }

    fn write_optimization_algorithm_type(&self) -> &'static str {
        "QUASI_NEWTON_METHOD"
    }

    fn to_string_matrix(&self) -> Vec<(String, String)> {
        vec![
            (
                "Inverse hessian approximation method".to_string(),
                self.inverse_hessian_approximation_method.to_string(),
            ),
            (
                "Learning rate method".to_string(),
                self.learning_rate_algorithm.method().to_string(),
            ),
            (
                "Learning rate tolerance".to_string(),
                self.learning_rate_algorithm.learning_rate_tolerance().to_string(),
            ),
            (
                "First learning rate".to_string(),
                self.first_learning_rate.to_string(),
            ),
            ("Loss goal".to_string(), self.loss_goal.to_string()),
            (
                "Minimum loss decrease".to_string(),
                self.minimum_loss_decrease.to_string(),
            ),
            (
                "Maximum loss decrease failures".to_string(),
                self.maximum_loss_decrease_failures.to_string(),
            ),
            (
                "Maximum selection error increases".to_string(),
                self.maximum_selection_failures.to_string(),
            ),
            (
                "Maximum epochs number".to_string(),
                self.maximum_epochs_number.to_string(),
            ),
            ("Maximum time".to_string(), self.maximum_time.to_string()),
            ("Display".to_string(), self.display.to_string()),
            ("Threads".to_string(), self.device.threads().to_string()),
        ]
    }
}
