//! Layer trait definition for neural network layers
//!
//! This module defines the parameter and inference interface shared by every
//! layer kind. Training passes are kind-specific and live on the concrete
//! layers, because each kind fills its own propagation buffers.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::Result;

/// Core trait for neural network layers.
///
/// Parameters are exchanged as a flat vector laid out as all biases followed
/// by all synaptic weights in column-major order (inputs vary fastest within
/// each neuron's column).
///
/// # Example
///
/// ```
/// use rust_quasi_newton::layers::{ActivationFunction, Layer, PerceptronLayer};
/// use rust_quasi_newton::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut layer = PerceptronLayer::new(3, 2, ActivationFunction::Linear, &mut rng);
/// let parameters = layer.get_parameters();
/// assert_eq!(parameters.len(), layer.parameters_number());
/// layer.set_parameters(&parameters.view(), 0).unwrap();
/// ```
pub trait Layer {
    /// Get the layer name.
    fn name(&self) -> &str;

    /// Number of input features per sample.
    fn inputs_number(&self) -> usize;

    /// Number of neurons (output features per sample).
    fn neurons_number(&self) -> usize;

    /// Total count of biases and synaptic weights.
    fn parameters_number(&self) -> usize {
        self.neurons_number() + self.inputs_number() * self.neurons_number()
    }

    /// Flattened parameter vector.
    fn get_parameters(&self) -> Array1<f64>;

    /// Reads this layer's parameters from `parameters` starting at `index`.
    ///
    /// # Arguments
    ///
    /// * `parameters` - Flat vector holding at least `index + parameters_number()` values
    /// * `index` - Offset of this layer's first bias
    ///
    /// # Errors
    ///
    /// Returns a dimension mismatch if the vector is too short.
    fn set_parameters(&mut self, parameters: &ArrayView1<f64>, index: usize) -> Result<()>;

    /// Inference pass: combinations then activations, no derivatives kept.
    fn calculate_outputs(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>>;
}
