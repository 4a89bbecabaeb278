//! Perceptron (fully connected) layer
//!
//! A perceptron layer computes `combinations = inputs × weights + biases` and
//! applies an elementwise [`ActivationFunction`]. On the training path it also
//! stores activation derivatives, propagates the error delta from the next
//! layer, and produces its parameter gradient or its block of the
//! Levenberg-Marquardt squared-errors Jacobian.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::error::{Error, Result};
use crate::layers::activation::ActivationFunction;
use crate::layers::dense;
use crate::layers::propagation::{
    check_batch, NextLayer, PerceptronBackPropagation, PerceptronBackPropagationLm,
    PerceptronForwardPropagation,
};
use crate::layers::Layer;
use crate::utils::{Device, SimpleRng};

/// Fully connected layer with an elementwise activation.
///
/// # Fields
///
/// * `biases` - One bias per neuron
/// * `synaptic_weights` - Weight matrix (inputs × neurons)
/// * `activation_function` - Activation applied to every combination
/// * `device` - Execution context for contractions and elementwise maps
///
/// # Example
///
/// ```
/// use rust_quasi_newton::layers::{ActivationFunction, Layer, PerceptronLayer};
/// use rust_quasi_newton::utils::SimpleRng;
/// use ndarray::array;
///
/// let mut layer = PerceptronLayer::new(1, 1, ActivationFunction::Linear, &mut SimpleRng::new(1));
/// layer.set_biases_constant(0.0);
/// layer.set_synaptic_weights_constant(1.0);
/// let outputs = layer.calculate_outputs(&array![[2.5]].view()).unwrap();
/// assert_eq!(outputs, array![[2.5]]);
/// ```
#[derive(Debug, Clone)]
pub struct PerceptronLayer {
    name: String,
    biases: Array1<f64>,
    synaptic_weights: Array2<f64>,
    activation_function: ActivationFunction,
    device: Device,
}

impl PerceptronLayer {
    /// Create a new layer with parameters sampled uniformly in `[-0.2, 0.2]`.
    ///
    /// # Arguments
    ///
    /// * `inputs_number` - Number of input features
    /// * `neurons_number` - Number of neurons
    /// * `activation_function` - Activation applied to the combinations
    /// * `rng` - Random number generator for parameter initialization
    pub fn new(
        inputs_number: usize,
        neurons_number: usize,
        activation_function: ActivationFunction,
        rng: &mut SimpleRng,
    ) -> Self {
        let (biases, synaptic_weights) =
            dense::random_parameters(inputs_number, neurons_number, rng);
        Self {
            name: "perceptron_layer".to_string(),
            biases,
            synaptic_weights,
            activation_function,
            device: Device::default(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn activation_function(&self) -> ActivationFunction {
        self.activation_function
    }

    pub fn set_activation_function(&mut self, activation_function: ActivationFunction) {
        self.activation_function = activation_function;
    }

    /// Sets the activation from its textual name (e.g. `"HyperbolicTangent"`).
    pub fn set_activation_function_name(&mut self, name: &str) -> Result<()> {
        self.activation_function = name.parse()?;
        Ok(())
    }

    /// Resizes the weight matrix and re-initializes every parameter randomly.
    pub fn set_inputs_number(&mut self, inputs_number: usize, rng: &mut SimpleRng) {
        let neurons_number = self.neurons_number();
        (self.biases, self.synaptic_weights) =
            dense::random_parameters(inputs_number, neurons_number, rng);
    }

    /// Resizes biases and weights and re-initializes every parameter randomly.
    pub fn set_neurons_number(&mut self, neurons_number: usize, rng: &mut SimpleRng) {
        let inputs_number = self.inputs_number();
        (self.biases, self.synaptic_weights) =
            dense::random_parameters(inputs_number, neurons_number, rng);
    }

    pub fn biases_number(&self) -> usize {
        self.biases.len()
    }

    pub fn synaptic_weights_number(&self) -> usize {
        self.synaptic_weights.len()
    }

    pub fn biases(&self) -> &Array1<f64> {
        &self.biases
    }

    pub fn synaptic_weights(&self) -> &Array2<f64> {
        &self.synaptic_weights
    }

    /// Biases read from this layer's parameter block.
    pub fn biases_from(&self, parameters: &ArrayView1<f64>) -> Result<Array1<f64>> {
        dense::biases_from(parameters, self.neurons_number())
    }

    /// Synaptic weights read from this layer's parameter block.
    pub fn synaptic_weights_from(&self, parameters: &ArrayView1<f64>) -> Result<Array2<f64>> {
        dense::synaptic_weights_from(parameters, self.inputs_number(), self.neurons_number())
    }

    pub fn set_biases(&mut self, biases: Array1<f64>) -> Result<()> {
        if biases.len() != self.neurons_number() {
            return Err(Error::dimension(
                "set_biases",
                self.neurons_number(),
                biases.len(),
            ));
        }
        self.biases = biases;
        Ok(())
    }

    pub fn set_synaptic_weights(&mut self, synaptic_weights: Array2<f64>) -> Result<()> {
        if synaptic_weights.dim() != self.synaptic_weights.dim() {
            return Err(Error::dimension(
                "set_synaptic_weights",
                format!("{}x{}", self.inputs_number(), self.neurons_number()),
                format!("{}x{}", synaptic_weights.nrows(), synaptic_weights.ncols()),
            ));
        }
        self.synaptic_weights = synaptic_weights;
        Ok(())
    }

    pub fn set_biases_constant(&mut self, value: f64) {
        self.biases.fill(value);
    }

    pub fn set_synaptic_weights_constant(&mut self, value: f64) {
        self.synaptic_weights.fill(value);
    }

    pub fn set_parameters_constant(&mut self, value: f64) {
        self.set_biases_constant(value);
        self.set_synaptic_weights_constant(value);
    }

    /// Redraws every parameter uniformly in `[-0.2, 0.2]`.
    pub fn set_parameters_random(&mut self, rng: &mut SimpleRng) {
        (self.biases, self.synaptic_weights) =
            dense::random_parameters(self.inputs_number(), self.neurons_number(), rng);
    }

    /// Combinations for explicit parameters (batch × neurons).
    pub fn calculate_combinations(
        &self,
        inputs: &ArrayView2<f64>,
        biases: &ArrayView1<f64>,
        synaptic_weights: &ArrayView2<f64>,
    ) -> Result<Array2<f64>> {
        dense::calculate_combinations(&self.device, inputs, biases, synaptic_weights)
    }

    pub fn calculate_activations(
        &self,
        combinations: &ArrayView2<f64>,
        activations: &mut Array2<f64>,
    ) -> Result<()> {
        check_same_dim(combinations.dim(), activations.dim(), "activations")?;
        let function = self.activation_function;
        self.device
            .map_into(combinations, activations, move |c| function.activate(c));
        Ok(())
    }

    /// Activations and their derivatives in a single pass.
    pub fn calculate_activations_derivatives(
        &self,
        combinations: &ArrayView2<f64>,
        activations: &mut Array2<f64>,
        activations_derivatives: &mut Array2<f64>,
    ) -> Result<()> {
        check_same_dim(combinations.dim(), activations.dim(), "activations")?;
        check_same_dim(
            combinations.dim(),
            activations_derivatives.dim(),
            "activations derivatives",
        )?;
        let function = self.activation_function;
        self.device.map_pair_into(
            combinations,
            activations,
            activations_derivatives,
            move |c| function.activate_with_derivative(c),
        );
        Ok(())
    }

    /// Training forward pass with the layer's own parameters.
    pub fn forward_propagate(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &mut PerceptronForwardPropagation,
    ) -> Result<()> {
        self.forward_propagate_parameters(
            inputs,
            &self.biases.view(),
            &self.synaptic_weights.view(),
            forward,
        )
    }

    /// Training forward pass with a candidate parameter block.
    ///
    /// `parameters` is reinterpreted as `[biases, weights column-major]`; the
    /// layer's stored parameters are left untouched.
    pub fn forward_propagate_with_parameters(
        &self,
        inputs: &ArrayView2<f64>,
        parameters: &ArrayView1<f64>,
        forward: &mut PerceptronForwardPropagation,
    ) -> Result<()> {
        let biases = self.biases_from(parameters)?;
        let synaptic_weights = self.synaptic_weights_from(parameters)?;
        self.forward_propagate_parameters(inputs, &biases.view(), &synaptic_weights.view(), forward)
    }

    fn forward_propagate_parameters(
        &self,
        inputs: &ArrayView2<f64>,
        biases: &ArrayView1<f64>,
        synaptic_weights: &ArrayView2<f64>,
        forward: &mut PerceptronForwardPropagation,
    ) -> Result<()> {
        check_batch(&forward.combinations, inputs.nrows(), "perceptron forward propagation")?;
        let combinations = self.calculate_combinations(inputs, biases, synaptic_weights)?;
        check_same_dim(
            combinations.dim(),
            forward.combinations.dim(),
            "perceptron forward propagation",
        )?;
        forward.combinations.assign(&combinations);
        self.calculate_activations_derivatives(
            &combinations.view(),
            &mut forward.activations,
            &mut forward.activations_derivatives,
        )
    }

    /// Delta of this hidden layer from the layer that follows it.
    pub fn calculate_hidden_delta(
        &self,
        next: &NextLayer<'_>,
        back: &mut PerceptronBackPropagation,
    ) -> Result<()> {
        self.calculate_delta_into(next, &mut back.delta)
    }

    /// Same delta propagation for the Levenberg-Marquardt buffers.
    pub fn calculate_hidden_delta_lm(
        &self,
        next: &NextLayer<'_>,
        back: &mut PerceptronBackPropagationLm,
    ) -> Result<()> {
        self.calculate_delta_into(next, &mut back.delta)
    }

    fn calculate_delta_into(&self, next: &NextLayer<'_>, delta: &mut Array2<f64>) -> Result<()> {
        let next_synaptic_weights = next.synaptic_weights();
        if next_synaptic_weights.nrows() != self.neurons_number() {
            return Err(Error::dimension(
                "next layer inputs",
                self.neurons_number(),
                next_synaptic_weights.nrows(),
            ));
        }
        if next.delta().ncols() != next.neurons_number() {
            return Err(Error::dimension(
                "next layer delta",
                format!("{} columns", next.neurons_number()),
                format!("{} columns", next.delta().ncols()),
            ));
        }

        let error_combinations = match *next {
            NextLayer::Perceptron {
                delta: next_delta,
                activations_derivatives,
                ..
            }
            | NextLayer::ProbabilisticBinary {
                delta: next_delta,
                activations_derivatives,
                ..
            }
            | NextLayer::ProbabilisticMulticlassOther {
                delta: next_delta,
                activations_derivatives,
                ..
            } => {
                check_same_dim(
                    activations_derivatives.dim(),
                    next_delta.dim(),
                    "next layer derivatives",
                )?;
                self.device.hadamard(&next_delta, &activations_derivatives)
            }
            NextLayer::ProbabilisticMulticlassSoftmax {
                delta: next_delta,
                activations_derivatives,
                ..
            } => softmax_error_combinations(&next_delta, &activations_derivatives)?,
        };

        let hidden_delta = self
            .device
            .matmul(&error_combinations.view(), &next_synaptic_weights.t())?;
        check_same_dim(hidden_delta.dim(), delta.dim(), "hidden delta")?;
        delta.assign(&hidden_delta);
        Ok(())
    }

    /// Bias and weight gradients from the delta stored in `back`.
    pub fn calculate_error_gradient(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &PerceptronForwardPropagation,
        back: &mut PerceptronBackPropagation,
    ) -> Result<()> {
        let error_combinations = self.error_combinations(forward, &back.delta)?;
        dense::calculate_parameters_gradient(
            &self.device,
            inputs,
            &error_combinations.view(),
            &mut back.biases_derivatives,
            &mut back.synaptic_weights_derivatives,
        )
    }

    /// Copies this layer's gradient into the network gradient at `index`.
    pub fn insert_gradient(
        &self,
        back: &PerceptronBackPropagation,
        index: usize,
        gradient: &mut Array1<f64>,
    ) -> Result<()> {
        dense::insert_parameters_gradient(
            &back.biases_derivatives,
            &back.synaptic_weights_derivatives,
            index,
            gradient,
        )
    }

    /// Per-sample Jacobian of the squared errors with respect to this layer's parameters.
    pub fn calculate_squared_errors_jacobian_lm(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &PerceptronForwardPropagation,
        back: &mut PerceptronBackPropagationLm,
    ) -> Result<()> {
        if inputs.ncols() != self.inputs_number() {
            return Err(Error::dimension(
                "squared errors jacobian inputs",
                format!("{} columns", self.inputs_number()),
                format!("{} columns", inputs.ncols()),
            ));
        }
        let error_combinations = self.error_combinations(forward, &back.delta)?;
        dense::calculate_squared_errors_jacobian(
            inputs,
            &error_combinations.view(),
            &mut back.squared_errors_jacobian,
        )
    }

    /// Copies this layer's Jacobian block into the network Jacobian at column `index`.
    pub fn insert_squared_errors_jacobian_lm(
        &self,
        back: &PerceptronBackPropagationLm,
        index: usize,
        jacobian: &mut Array2<f64>,
    ) -> Result<()> {
        dense::insert_squared_errors_jacobian(&back.squared_errors_jacobian, index, jacobian)
    }

    // delta ⊙ activation derivative
    fn error_combinations(
        &self,
        forward: &PerceptronForwardPropagation,
        delta: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        check_same_dim(
            forward.activations_derivatives.dim(),
            delta.dim(),
            "delta and activation derivatives",
        )?;
        Ok(self
            .device
            .hadamard(&delta.view(), &forward.activations_derivatives.view()))
    }
}

impl Layer for PerceptronLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs_number(&self) -> usize {
        self.synaptic_weights.nrows()
    }

    fn neurons_number(&self) -> usize {
        self.biases.len()
    }

    fn get_parameters(&self) -> Array1<f64> {
        dense::flatten_parameters(&self.biases, &self.synaptic_weights)
    }

    fn set_parameters(&mut self, parameters: &ArrayView1<f64>, index: usize) -> Result<()> {
        let end = index + self.parameters_number();
        if parameters.len() < end {
            return Err(Error::dimension(
                "perceptron set_parameters",
                format!("at least {} parameters", end),
                parameters.len(),
            ));
        }
        let block = parameters.slice(s![index..end]);
        self.biases = self.biases_from(&block)?;
        self.synaptic_weights = self.synaptic_weights_from(&block)?;
        Ok(())
    }

    fn calculate_outputs(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let combinations =
            self.calculate_combinations(inputs, &self.biases.view(), &self.synaptic_weights.view())?;
        let mut outputs = Array2::zeros(combinations.raw_dim());
        self.calculate_activations(&combinations.view(), &mut outputs)?;
        Ok(outputs)
    }
}

/// `errorCombinations[s] = delta[s]ᵀ · J[s]` for a softmax layer.
pub(crate) fn softmax_error_combinations(
    delta: &ArrayView2<f64>,
    jacobian: &ArrayView3<f64>,
) -> Result<Array2<f64>> {
    let (batch_samples_number, neurons_number) = delta.dim();
    let (jacobian_samples, rows, columns) = jacobian.dim();
    if jacobian_samples != batch_samples_number {
        return Err(Error::dimension(
            "softmax jacobian samples",
            batch_samples_number,
            jacobian_samples,
        ));
    }
    if rows != neurons_number {
        return Err(Error::dimension(
            "softmax jacobian rows",
            neurons_number,
            rows,
        ));
    }
    if columns != neurons_number {
        return Err(Error::dimension(
            "softmax jacobian columns",
            neurons_number,
            columns,
        ));
    }

    let mut error_combinations = Array2::zeros((batch_samples_number, neurons_number));
    for (sample, mut row) in error_combinations.rows_mut().into_iter().enumerate() {
        row.assign(&delta.row(sample).dot(&jacobian.index_axis(Axis(0), sample)));
    }
    Ok(error_combinations)
}

pub(crate) fn check_same_dim(
    actual: (usize, usize),
    expected: (usize, usize),
    context: &str,
) -> Result<()> {
    if actual != expected {
        return Err(Error::dimension(
            context,
            format!("{}x{}", expected.0, expected.1),
            format!("{}x{}", actual.0, actual.1),
        ));
    }
    Ok(())
}
