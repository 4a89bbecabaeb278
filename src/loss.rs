//! Loss index
//!
//! [`LossIndex`] is the boundary between optimizers and the network: it
//! evaluates the loss for trial parameter vectors, produces the full-network
//! gradient and, for Gauss-Newton style optimizers, the per-sample squared
//! errors and their Jacobian.
//!
//! [`SumSquaredError`] is the sum (or mean) of squared output errors over a
//! training batch, with optional L1 or L2 regularization of the parameters.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::network::{
    NetworkBackPropagation, NetworkBackPropagationLm, NetworkForwardPropagation, NeuralNetwork,
};
use crate::utils::tensor;

/// Objective function consumed by optimization algorithms.
pub trait LossIndex {
    fn parameters_number(&self) -> usize;

    /// Current network parameters.
    fn parameters(&self) -> Array1<f64>;

    /// Writes `parameters` into the network.
    fn set_parameters(&mut self, parameters: &ArrayView1<f64>) -> Result<()>;

    /// Loss at a trial parameter vector. The network keeps its parameters.
    fn loss(&mut self, parameters: &ArrayView1<f64>) -> Result<f64>;

    /// Loss and gradient at `parameters`, which become the network parameters.
    fn loss_and_gradient(&mut self, parameters: &ArrayView1<f64>) -> Result<(f64, Array1<f64>)>;

    /// Per-sample errors `e` such that `Σ e² ` is the unregularized loss.
    fn squared_errors(&mut self, parameters: &ArrayView1<f64>) -> Result<Array1<f64>>;

    /// Jacobian of [`LossIndex::squared_errors`] (samples × parameters).
    fn squared_errors_jacobian(&mut self, parameters: &ArrayView1<f64>) -> Result<Array2<f64>>;

    /// Error on the selection samples, `None` when there are none.
    fn selection_error(&mut self, parameters: &ArrayView1<f64>) -> Result<Option<f64>>;
}

/// Scaling applied to the summed squared errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorNormalization {
    #[default]
    Sum,
    /// Divide by the number of samples.
    Mean,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regularization {
    #[default]
    None,
    L1,
    L2,
}

impl Regularization {
    pub fn name(&self) -> &'static str {
        match self {
            Regularization::None => "None",
            Regularization::L1 => "L1",
            Regularization::L2 => "L2",
        }
    }
}

impl fmt::Display for Regularization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Regularization {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "None" => Ok(Regularization::None),
            "L1" => Ok(Regularization::L1),
            "L2" => Ok(Regularization::L2),
            other => Err(Error::InvalidConfig(format!(
                "unknown regularization method '{}'",
                other
            ))),
        }
    }
}

/// Sum squared error of a network over a fixed batch.
///
/// Owns the network and the forward/backward buffers for the training batch,
/// so repeated evaluations reuse the same scratch space.
///
/// # Example
///
/// ```
/// use rust_quasi_newton::layers::{ActivationFunction, PerceptronLayer};
/// use rust_quasi_newton::loss::{LossIndex, SumSquaredError};
/// use rust_quasi_newton::network::NeuralNetwork;
/// use rust_quasi_newton::utils::SimpleRng;
/// use ndarray::array;
///
/// let mut layer = PerceptronLayer::new(1, 1, ActivationFunction::Linear, &mut SimpleRng::new(1));
/// layer.set_parameters_constant(0.0);
/// let network = NeuralNetwork::new(vec![layer.into()]).unwrap();
/// let mut loss = SumSquaredError::new(network, array![[1.0], [2.0]], array![[1.0], [1.0]]).unwrap();
/// assert_eq!(loss.loss(&array![0.0, 1.0].view()).unwrap(), 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct SumSquaredError {
    network: NeuralNetwork,
    inputs: Array2<f64>,
    targets: Array2<f64>,
    selection: Option<SelectionSamples>,
    normalization: ErrorNormalization,
    regularization: Regularization,
    regularization_weight: f64,
    forward: NetworkForwardPropagation,
    back: NetworkBackPropagation,
    back_lm: Option<NetworkBackPropagationLm>,
}

#[derive(Debug, Clone)]
struct SelectionSamples {
    inputs: Array2<f64>,
    targets: Array2<f64>,
    forward: NetworkForwardPropagation,
}

impl SumSquaredError {
    /// Binds a network to its training samples.
    ///
    /// # Errors
    ///
    /// Dimension mismatch when the inputs or targets do not fit the network or
    /// when their sample counts differ.
    pub fn new(network: NeuralNetwork, inputs: Array2<f64>, targets: Array2<f64>) -> Result<Self> {
        check_samples(&network, &inputs, &targets, "training samples")?;
        let batch_samples_number = inputs.nrows();
        let forward = NetworkForwardPropagation::new(&network, batch_samples_number);
        let back = NetworkBackPropagation::new(&network, batch_samples_number);
        Ok(Self {
            network,
            inputs,
            targets,
            selection: None,
            normalization: ErrorNormalization::Sum,
            regularization: Regularization::None,
            regularization_weight: 0.01,
            forward,
            back,
            back_lm: None,
        })
    }

    /// Adds selection samples used for early stopping.
    pub fn with_selection(mut self, inputs: Array2<f64>, targets: Array2<f64>) -> Result<Self> {
        check_samples(&self.network, &inputs, &targets, "selection samples")?;
        let forward = NetworkForwardPropagation::new(&self.network, inputs.nrows());
        self.selection = Some(SelectionSamples {
            inputs,
            targets,
            forward,
        });
        Ok(self)
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    pub fn into_network(self) -> NeuralNetwork {
        self.network
    }

    pub fn normalization(&self) -> ErrorNormalization {
        self.normalization
    }

    pub fn set_normalization(&mut self, normalization: ErrorNormalization) {
        self.normalization = normalization;
    }

    pub fn regularization(&self) -> Regularization {
        self.regularization
    }

    pub fn regularization_weight(&self) -> f64 {
        self.regularization_weight
    }

    pub fn set_regularization(&mut self, regularization: Regularization, weight: f64) {
        self.regularization = regularization;
        self.regularization_weight = weight;
    }

    fn coefficient(&self, samples_number: usize) -> f64 {
        match self.normalization {
            ErrorNormalization::Sum => 1.0,
            ErrorNormalization::Mean if samples_number > 0 => 1.0 / samples_number as f64,
            ErrorNormalization::Mean => 1.0,
        }
    }

    fn regularization_term(&self, parameters: &ArrayView1<f64>) -> f64 {
        let device = self.network.device();
        match self.regularization {
            Regularization::None => 0.0,
            Regularization::L1 => self.regularization_weight * tensor::l1_norm(device, parameters),
            Regularization::L2 => self.regularization_weight * tensor::l2_norm(device, parameters),
        }
    }

    fn regularization_gradient(&self, parameters: &ArrayView1<f64>) -> Option<Array1<f64>> {
        let device = self.network.device();
        let gradient = match self.regularization {
            Regularization::None => return None,
            Regularization::L1 => tensor::l1_norm_gradient(parameters),
            Regularization::L2 => tensor::l2_norm_gradient(device, parameters),
        };
        Some(gradient * self.regularization_weight)
    }

    fn training_outputs(&self) -> Result<&Array2<f64>> {
        self.forward
            .outputs()
            .ok_or_else(|| Error::InvalidNetwork("network has no layers".into()))
    }

    // coefficient · Σ (y − t)²
    fn sum_squared_error(&self, outputs: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        let coefficient = self.coefficient(outputs.nrows());
        let mut sum = 0.0;
        Zip::from(outputs)
            .and(targets)
            .for_each(|&y, &t| sum += (y - t) * (y - t));
        coefficient * sum
    }
}

impl LossIndex for SumSquaredError {
    fn parameters_number(&self) -> usize {
        self.network.parameters_number()
    }

    fn parameters(&self) -> Array1<f64> {
        self.network.get_parameters()
    }

    fn set_parameters(&mut self, parameters: &ArrayView1<f64>) -> Result<()> {
        self.network.set_parameters(parameters)
    }

    fn loss(&mut self, parameters: &ArrayView1<f64>) -> Result<f64> {
        self.network
            .forward_propagate(&self.inputs.view(), Some(parameters), &mut self.forward)?;
        let error = self.sum_squared_error(self.training_outputs()?, &self.targets);
        Ok(error + self.regularization_term(parameters))
    }

    fn loss_and_gradient(&mut self, parameters: &ArrayView1<f64>) -> Result<(f64, Array1<f64>)> {
        self.network.set_parameters(parameters)?;
        self.network
            .forward_propagate(&self.inputs.view(), None, &mut self.forward)?;

        let outputs = self.training_outputs()?;
        let error = self.sum_squared_error(outputs, &self.targets);
        let coefficient = self.coefficient(outputs.nrows());
        let output_delta = (outputs - &self.targets) * (2.0 * coefficient);

        let delta = self
            .back
            .output_delta_mut()
            .ok_or_else(|| Error::InvalidNetwork("network has no layers".into()))?;
        delta.assign(&output_delta);

        self.network
            .calculate_hidden_deltas(&self.forward, &mut self.back)?;
        let mut gradient =
            self.network
                .calculate_error_gradient(&self.inputs.view(), &self.forward, &mut self.back)?;

        if let Some(regularization_gradient) = self.regularization_gradient(parameters) {
            gradient += &regularization_gradient;
        }
        let loss = error + self.regularization_term(parameters);
        debug!(loss, "loss and gradient evaluated");
        Ok((loss, gradient))
    }

    fn squared_errors(&mut self, parameters: &ArrayView1<f64>) -> Result<Array1<f64>> {
        self.network
            .forward_propagate(&self.inputs.view(), Some(parameters), &mut self.forward)?;
        let outputs = self.training_outputs()?;
        let coefficient = self.coefficient(outputs.nrows());
        Ok(sample_errors(outputs, &self.targets, coefficient))
    }

    fn squared_errors_jacobian(&mut self, parameters: &ArrayView1<f64>) -> Result<Array2<f64>> {
        self.network.set_parameters(parameters)?;
        self.network
            .forward_propagate(&self.inputs.view(), None, &mut self.forward)?;

        let outputs = self.training_outputs()?;
        let coefficient = self.coefficient(outputs.nrows());
        let errors = sample_errors(outputs, &self.targets, coefficient);

        // d e_s / d y_so = coefficient · (y − t) / e_s
        let mut output_delta = (outputs - &self.targets) * coefficient;
        for (mut row, &error) in output_delta.rows_mut().into_iter().zip(errors.iter()) {
            if error == 0.0 {
                row.fill(0.0);
            } else {
                row /= error;
            }
        }

        let batch_samples_number = self.inputs.nrows();
        let network = &self.network;
        let back = self
            .back_lm
            .get_or_insert_with(|| NetworkBackPropagationLm::new(network, batch_samples_number));
        let delta = back
            .output_delta_mut()
            .ok_or_else(|| Error::InvalidNetwork("network has no layers".into()))?;
        delta.assign(&output_delta);

        network.calculate_hidden_deltas_lm(&self.forward, back)?;
        network.calculate_squared_errors_jacobian(&self.inputs.view(), &self.forward, back)
    }

    fn selection_error(&mut self, parameters: &ArrayView1<f64>) -> Result<Option<f64>> {
        let Some(selection) = self.selection.as_mut() else {
            return Ok(None);
        };
        self.network
            .forward_propagate(&selection.inputs.view(), Some(parameters), &mut selection.forward)?;

        let Some(selection) = self.selection.as_ref() else {
            return Ok(None);
        };
        let outputs = selection
            .forward
            .outputs()
            .ok_or_else(|| Error::InvalidNetwork("network has no layers".into()))?;
        Ok(Some(self.sum_squared_error(outputs, &selection.targets)))
    }
}

/// `e_s = sqrt(coefficient · Σ_o (y − t)²)` for every sample.
fn sample_errors(outputs: &Array2<f64>, targets: &Array2<f64>, coefficient: f64) -> Array1<f64> {
    Zip::from(outputs.rows())
        .and(targets.rows())
        .map_collect(|y, t| {
            let squared: f64 = y.iter().zip(t.iter()).map(|(y, t)| (y - t) * (y - t)).sum();
            (coefficient * squared).sqrt()
        })
}

fn check_samples(
    network: &NeuralNetwork,
    inputs: &Array2<f64>,
    targets: &Array2<f64>,
    context: &str,
) -> Result<()> {
    if inputs.ncols() != network.inputs_number() {
        return Err(Error::dimension(
            format!("{} inputs", context),
            format!("{} columns", network.inputs_number()),
            format!("{} columns", inputs.ncols()),
        ));
    }
    if targets.ncols() != network.outputs_number() {
        return Err(Error::dimension(
            format!("{} targets", context),
            format!("{} columns", network.outputs_number()),
            format!("{} columns", targets.ncols()),
        ));
    }
    if inputs.nrows() != targets.nrows() {
        return Err(Error::dimension(
            format!("{} rows", context),
            format!("{} samples", inputs.nrows()),
            format!("{} samples", targets.nrows()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ActivationFunction, PerceptronLayer};
    use crate::utils::SimpleRng;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn linear_loss() -> SumSquaredError {
        let mut layer = PerceptronLayer::new(1, 1, ActivationFunction::Linear, &mut SimpleRng::new(1));
        layer.set_parameters_constant(0.0);
        let network = NeuralNetwork::new(vec![layer.into()]).unwrap();
        SumSquaredError::new(network, array![[1.0], [2.0]], array![[1.0], [1.0]]).unwrap()
    }

    #[test]
    fn test_rejects_mismatched_targets() {
        let layer = PerceptronLayer::new(2, 1, ActivationFunction::Linear, &mut SimpleRng::new(1));
        let network = NeuralNetwork::new(vec![layer.into()]).unwrap();
        let err = SumSquaredError::new(network, Array2::zeros((3, 2)), Array2::zeros((3, 2))).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    #[test]
    fn test_trial_loss_does_not_move_parameters() {
        let mut loss = linear_loss();
        let before = loss.parameters();
        let value = loss.loss(&array![1.0, 1.0].view()).unwrap();
        // outputs 2 and 3 against targets 1 and 1
        assert_abs_diff_eq!(value, 1.0 + 4.0);
        assert_eq!(loss.parameters(), before);
    }

    #[test]
    fn test_mean_normalization() {
        let mut loss = linear_loss();
        loss.set_normalization(ErrorNormalization::Mean);
        let value = loss.loss(&array![1.0, 1.0].view()).unwrap();
        assert_abs_diff_eq!(value, 2.5);
    }

    #[test]
    fn test_linear_gradient_closed_form() {
        let mut loss = linear_loss();
        // y = b + w x, residuals r = [b + w - 1, b + 2w - 1]
        let (value, gradient) = loss.loss_and_gradient(&array![0.5, 0.5].view()).unwrap();
        assert_abs_diff_eq!(value, 0.0 + 0.25);
        assert_abs_diff_eq!(gradient[0], 2.0 * (0.0 + 0.5), epsilon = 1e-12);
        assert_abs_diff_eq!(gradient[1], 2.0 * (0.0 + 0.5 * 2.0), epsilon = 1e-12);
        assert_eq!(loss.parameters(), array![0.5, 0.5]);
    }

    #[test]
    fn test_l2_regularization_adds_norm() {
        let mut loss = linear_loss();
        loss.set_regularization(Regularization::L2, 0.5);
        let value = loss.loss(&array![0.0, 1.0].view()).unwrap();
        // errors 0 and 1, norm 1
        assert_abs_diff_eq!(value, 1.0 + 0.5);
        assert_eq!("L1".parse::<Regularization>().unwrap(), Regularization::L1);
    }

    #[test]
    fn test_squared_errors_sum_to_loss() {
        let mut loss = linear_loss();
        let parameters = array![0.3, -0.2];
        let errors = loss.squared_errors(&parameters.view()).unwrap();
        let value = loss.loss(&parameters.view()).unwrap();
        assert_abs_diff_eq!(errors.mapv(|e| e * e).sum(), value, epsilon = 1e-12);
    }

    #[test]
    fn test_selection_error_absent_and_present() {
        let mut loss = linear_loss();
        let parameters = array![0.0, 1.0];
        assert_eq!(loss.selection_error(&parameters.view()).unwrap(), None);

        let mut loss = linear_loss()
            .with_selection(array![[3.0]], array![[1.0]])
            .unwrap();
        assert_eq!(loss.selection_error(&parameters.view()).unwrap(), Some(4.0));
    }

    #[test]
    fn test_selection_error_follows_normalization() {
        let parameters = array![0.0, 1.0];
        let mut loss = linear_loss()
            .with_selection(array![[3.0], [1.0]], array![[1.0], [1.0]])
            .unwrap();
        assert_eq!(loss.selection_error(&parameters.view()).unwrap(), Some(4.0));

        loss.set_normalization(ErrorNormalization::Mean);
        assert_eq!(loss.selection_error(&parameters.view()).unwrap(), Some(2.0));
    }
}
