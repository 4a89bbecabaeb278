//! Feed-forward neural network
//!
//! A [`NeuralNetwork`] chains perceptron layers, optionally closed by a single
//! probabilistic output layer. It owns the network-wide parameter layout (the
//! concatenation of every layer's `[biases, weights column-major]` block in
//! layer order) and drives whole-network forward passes, hidden delta
//! propagation, gradient assembly and Levenberg-Marquardt Jacobian assembly.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::error::{Error, Result};
use crate::layers::propagation::{
    LayerBackPropagation, LayerBackPropagationLm, LayerForwardPropagation, NextLayer,
    PerceptronBackPropagation, PerceptronBackPropagationLm, PerceptronForwardPropagation,
    ProbabilisticBackPropagation, ProbabilisticBackPropagationLm, ProbabilisticForwardPropagation,
};
use crate::layers::{Layer, PerceptronLayer, ProbabilisticLayer};
use crate::utils::{Device, SimpleRng};

/// A layer of the network.
#[derive(Debug, Clone)]
pub enum NetworkLayer {
    Perceptron(PerceptronLayer),
    Probabilistic(ProbabilisticLayer),
}

impl NetworkLayer {
    pub fn as_layer(&self) -> &dyn Layer {
        match self {
            NetworkLayer::Perceptron(layer) => layer,
            NetworkLayer::Probabilistic(layer) => layer,
        }
    }

    pub fn as_layer_mut(&mut self) -> &mut dyn Layer {
        match self {
            NetworkLayer::Perceptron(layer) => layer,
            NetworkLayer::Probabilistic(layer) => layer,
        }
    }

    fn set_device(&mut self, device: Device) {
        match self {
            NetworkLayer::Perceptron(layer) => layer.set_device(device),
            NetworkLayer::Probabilistic(layer) => layer.set_device(device),
        }
    }

    fn new_forward_propagation(&self, batch_samples_number: usize) -> LayerForwardPropagation {
        match self {
            NetworkLayer::Perceptron(layer) => LayerForwardPropagation::Perceptron(
                PerceptronForwardPropagation::new(batch_samples_number, layer.neurons_number()),
            ),
            NetworkLayer::Probabilistic(layer) => {
                LayerForwardPropagation::Probabilistic(ProbabilisticForwardPropagation::new(
                    batch_samples_number,
                    layer.neurons_number(),
                    layer.uses_jacobian(),
                ))
            }
        }
    }

    fn new_back_propagation(&self, batch_samples_number: usize) -> LayerBackPropagation {
        let (inputs, neurons) = (self.as_layer().inputs_number(), self.as_layer().neurons_number());
        match self {
            NetworkLayer::Perceptron(_) => LayerBackPropagation::Perceptron(
                PerceptronBackPropagation::new(batch_samples_number, inputs, neurons),
            ),
            NetworkLayer::Probabilistic(_) => LayerBackPropagation::Probabilistic(
                ProbabilisticBackPropagation::new(batch_samples_number, inputs, neurons),
            ),
        }
    }

    fn new_back_propagation_lm(&self, batch_samples_number: usize) -> LayerBackPropagationLm {
        let layer = self.as_layer();
        let (neurons, parameters) = (layer.neurons_number(), layer.parameters_number());
        match self {
            NetworkLayer::Perceptron(_) => LayerBackPropagationLm::Perceptron(
                PerceptronBackPropagationLm::new(batch_samples_number, neurons, parameters),
            ),
            NetworkLayer::Probabilistic(_) => LayerBackPropagationLm::Probabilistic(
                ProbabilisticBackPropagationLm::new(batch_samples_number, neurons, parameters),
            ),
        }
    }

    fn forward_propagate(
        &self,
        inputs: &ArrayView2<f64>,
        parameters: Option<&ArrayView1<f64>>,
        forward: &mut LayerForwardPropagation,
    ) -> Result<()> {
        match (self, forward, parameters) {
            (NetworkLayer::Perceptron(layer), LayerForwardPropagation::Perceptron(forward), None) => {
                layer.forward_propagate(inputs, forward)
            }
            (
                NetworkLayer::Perceptron(layer),
                LayerForwardPropagation::Perceptron(forward),
                Some(parameters),
            ) => layer.forward_propagate_with_parameters(inputs, parameters, forward),
            (
                NetworkLayer::Probabilistic(layer),
                LayerForwardPropagation::Probabilistic(forward),
                None,
            ) => layer.forward_propagate(inputs, forward),
            (
                NetworkLayer::Probabilistic(layer),
                LayerForwardPropagation::Probabilistic(forward),
                Some(parameters),
            ) => layer.forward_propagate_with_parameters(inputs, parameters, forward),
            _ => Err(mismatched_buffer("forward propagation")),
        }
    }

    /// This layer as the successor of a hidden perceptron.
    fn as_next_layer<'a>(
        &'a self,
        forward: &'a LayerForwardPropagation,
        delta: &'a Array2<f64>,
    ) -> Result<NextLayer<'a>> {
        match (self, forward) {
            (NetworkLayer::Perceptron(layer), LayerForwardPropagation::Perceptron(forward)) => {
                Ok(NextLayer::Perceptron {
                    synaptic_weights: layer.synaptic_weights().view(),
                    delta: delta.view(),
                    activations_derivatives: forward.activations_derivatives.view(),
                })
            }
            (NetworkLayer::Probabilistic(layer), LayerForwardPropagation::Probabilistic(forward)) => {
                Ok(layer.as_next_layer(forward, delta))
            }
            _ => Err(mismatched_buffer("next layer")),
        }
    }
}

impl From<PerceptronLayer> for NetworkLayer {
    fn from(layer: PerceptronLayer) -> Self {
        NetworkLayer::Perceptron(layer)
    }
}

impl From<ProbabilisticLayer> for NetworkLayer {
    fn from(layer: ProbabilisticLayer) -> Self {
        NetworkLayer::Probabilistic(layer)
    }
}

fn mismatched_buffer(context: &str) -> Error {
    Error::dimension(context, "buffer of the layer's kind", "buffer of another kind")
}

/// Forward buffers for every layer of a network, for one batch size.
#[derive(Debug, Clone)]
pub struct NetworkForwardPropagation {
    pub layers: Vec<LayerForwardPropagation>,
}

impl NetworkForwardPropagation {
    pub fn new(network: &NeuralNetwork, batch_samples_number: usize) -> Self {
        Self {
            layers: network
                .layers
                .iter()
                .map(|layer| layer.new_forward_propagation(batch_samples_number))
                .collect(),
        }
    }

    pub fn batch_samples_number(&self) -> usize {
        self.layers
            .first()
            .map_or(0, LayerForwardPropagation::batch_samples_number)
    }

    /// Activations of the last layer.
    pub fn outputs(&self) -> Option<&Array2<f64>> {
        self.layers.last().map(LayerForwardPropagation::activations)
    }
}

/// Backward buffers for every layer of a network.
#[derive(Debug, Clone)]
pub struct NetworkBackPropagation {
    pub layers: Vec<LayerBackPropagation>,
}

impl NetworkBackPropagation {
    pub fn new(network: &NeuralNetwork, batch_samples_number: usize) -> Self {
        Self {
            layers: network
                .layers
                .iter()
                .map(|layer| layer.new_back_propagation(batch_samples_number))
                .collect(),
        }
    }

    /// Delta of the output layer, written by the loss.
    pub fn output_delta_mut(&mut self) -> Option<&mut Array2<f64>> {
        self.layers.last_mut().map(LayerBackPropagation::delta_mut)
    }
}

/// Levenberg-Marquardt backward buffers for every layer of a network.
#[derive(Debug, Clone)]
pub struct NetworkBackPropagationLm {
    pub layers: Vec<LayerBackPropagationLm>,
}

impl NetworkBackPropagationLm {
    pub fn new(network: &NeuralNetwork, batch_samples_number: usize) -> Self {
        Self {
            layers: network
                .layers
                .iter()
                .map(|layer| layer.new_back_propagation_lm(batch_samples_number))
                .collect(),
        }
    }

    pub fn output_delta_mut(&mut self) -> Option<&mut Array2<f64>> {
        self.layers.last_mut().map(LayerBackPropagationLm::delta_mut)
    }
}

/// Ordered chain of layers.
///
/// # Example
///
/// ```
/// use rust_quasi_newton::layers::{ActivationFunction, PerceptronLayer};
/// use rust_quasi_newton::network::NeuralNetwork;
/// use rust_quasi_newton::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(7);
/// let network = NeuralNetwork::new(vec![
///     PerceptronLayer::new(2, 3, ActivationFunction::HyperbolicTangent, &mut rng).into(),
///     PerceptronLayer::new(3, 1, ActivationFunction::Linear, &mut rng).into(),
/// ])
/// .unwrap();
/// assert_eq!(network.parameters_number(), 3 + 6 + 1 + 3);
/// ```
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    layers: Vec<NetworkLayer>,
    device: Device,
}

impl NeuralNetwork {
    /// Builds a network after checking that consecutive layers fit together.
    ///
    /// # Errors
    ///
    /// `InvalidNetwork` when the network is empty, when a layer's input count
    /// differs from the previous layer's neuron count, or when a probabilistic
    /// layer is not the last one.
    pub fn new(layers: Vec<NetworkLayer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidNetwork("a network needs at least one layer".into()));
        }
        for (i, pair) in layers.windows(2).enumerate() {
            if matches!(pair[0], NetworkLayer::Probabilistic(_)) {
                return Err(Error::InvalidNetwork(format!(
                    "probabilistic layer {} must be the last layer",
                    i
                )));
            }
            let (previous, next) = (pair[0].as_layer(), pair[1].as_layer());
            if next.inputs_number() != previous.neurons_number() {
                return Err(Error::InvalidNetwork(format!(
                    "layer {} expects {} inputs but layer {} has {} neurons",
                    i + 1,
                    next.inputs_number(),
                    i,
                    previous.neurons_number()
                )));
            }
        }
        debug!(layers = layers.len(), "neural network built");
        Ok(Self {
            layers,
            device: Device::default(),
        })
    }

    pub fn layers(&self) -> &[NetworkLayer] {
        &self.layers
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut NetworkLayer> {
        self.layers.get_mut(index)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Shares `device` with every layer.
    pub fn set_device(&mut self, device: Device) {
        for layer in &mut self.layers {
            layer.set_device(device.clone());
        }
        self.device = device;
    }

    pub fn inputs_number(&self) -> usize {
        self.layers
            .first()
            .map_or(0, |layer| layer.as_layer().inputs_number())
    }

    pub fn outputs_number(&self) -> usize {
        self.layers
            .last()
            .map_or(0, |layer| layer.as_layer().neurons_number())
    }

    pub fn layers_parameters_numbers(&self) -> Vec<usize> {
        self.layers
            .iter()
            .map(|layer| layer.as_layer().parameters_number())
            .collect()
    }

    pub fn parameters_number(&self) -> usize {
        self.layers_parameters_numbers().iter().sum()
    }

    pub fn get_parameters(&self) -> Array1<f64> {
        let mut parameters = Array1::zeros(self.parameters_number());
        let mut index = 0;
        for layer in &self.layers {
            let block = layer.as_layer().get_parameters();
            parameters
                .slice_mut(s![index..index + block.len()])
                .assign(&block);
            index += block.len();
        }
        parameters
    }

    pub fn set_parameters(&mut self, parameters: &ArrayView1<f64>) -> Result<()> {
        let parameters_number = self.parameters_number();
        if parameters.len() != parameters_number {
            return Err(Error::dimension(
                "network set_parameters",
                parameters_number,
                parameters.len(),
            ));
        }
        let mut index = 0;
        for layer in &mut self.layers {
            let layer = layer.as_layer_mut();
            layer.set_parameters(parameters, index)?;
            index += layer.parameters_number();
        }
        Ok(())
    }

    pub fn set_parameters_constant(&mut self, value: f64) {
        for layer in &mut self.layers {
            match layer {
                NetworkLayer::Perceptron(layer) => layer.set_parameters_constant(value),
                NetworkLayer::Probabilistic(layer) => layer.set_parameters_constant(value),
            }
        }
    }

    pub fn set_parameters_random(&mut self, rng: &mut SimpleRng) {
        for layer in &mut self.layers {
            match layer {
                NetworkLayer::Perceptron(layer) => layer.set_parameters_random(rng),
                NetworkLayer::Probabilistic(layer) => layer.set_parameters_random(rng),
            }
        }
    }

    /// Inference pass through every layer.
    pub fn calculate_outputs(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let mut outputs = inputs.to_owned();
        for layer in &self.layers {
            outputs = layer.as_layer().calculate_outputs(&outputs.view())?;
        }
        Ok(outputs)
    }

    /// Training forward pass; `parameters` replaces the stored parameters when given.
    pub fn forward_propagate(
        &self,
        inputs: &ArrayView2<f64>,
        parameters: Option<&ArrayView1<f64>>,
        forward: &mut NetworkForwardPropagation,
    ) -> Result<()> {
        if forward.layers.len() != self.layers.len() {
            return Err(Error::dimension(
                "network forward propagation layers",
                self.layers.len(),
                forward.layers.len(),
            ));
        }
        if let Some(parameters) = parameters {
            if parameters.len() != self.parameters_number() {
                return Err(Error::dimension(
                    "network forward propagation parameters",
                    self.parameters_number(),
                    parameters.len(),
                ));
            }
        }

        let mut index = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            let parameters_number = layer.as_layer().parameters_number();
            let block = parameters.map(|p| p.slice(s![index..index + parameters_number]));
            let (previous, current) = forward.layers.split_at_mut(i);
            let layer_inputs = match previous.last() {
                Some(previous) => previous.activations().view(),
                None => inputs.view(),
            };
            layer.forward_propagate(&layer_inputs, block.as_ref(), &mut current[0])?;
            index += parameters_number;
        }
        Ok(())
    }

    /// Propagates the output delta stored in `back` down to the first layer.
    pub fn calculate_hidden_deltas(
        &self,
        forward: &NetworkForwardPropagation,
        back: &mut NetworkBackPropagation,
    ) -> Result<()> {
        for i in (0..self.layers.len().saturating_sub(1)).rev() {
            let (current, following) = back.layers.split_at_mut(i + 1);
            let next = self.layers[i + 1].as_next_layer(&forward.layers[i + 1], following[0].delta())?;
            match (&self.layers[i], &mut current[i]) {
                (NetworkLayer::Perceptron(layer), LayerBackPropagation::Perceptron(back)) => {
                    layer.calculate_hidden_delta(&next, back)?
                }
                _ => return Err(mismatched_buffer("hidden delta")),
            }
        }
        Ok(())
    }

    /// Same propagation for the Levenberg-Marquardt buffers.
    pub fn calculate_hidden_deltas_lm(
        &self,
        forward: &NetworkForwardPropagation,
        back: &mut NetworkBackPropagationLm,
    ) -> Result<()> {
        for i in (0..self.layers.len().saturating_sub(1)).rev() {
            let (current, following) = back.layers.split_at_mut(i + 1);
            let next = self.layers[i + 1].as_next_layer(&forward.layers[i + 1], following[0].delta())?;
            match (&self.layers[i], &mut current[i]) {
                (NetworkLayer::Perceptron(layer), LayerBackPropagationLm::Perceptron(back)) => {
                    layer.calculate_hidden_delta_lm(&next, back)?
                }
                _ => return Err(mismatched_buffer("hidden delta")),
            }
        }
        Ok(())
    }

    /// Layer gradients assembled into one vector in parameter order.
    ///
    /// Expects every delta in `back` to be filled.
    pub fn calculate_error_gradient(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &NetworkForwardPropagation,
        back: &mut NetworkBackPropagation,
    ) -> Result<Array1<f64>> {
        let mut gradient = Array1::zeros(self.parameters_number());
        let mut index = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            let layer_inputs = match i {
                0 => inputs.view(),
                _ => forward.layers[i - 1].activations().view(),
            };
            match (layer, &forward.layers[i], &mut back.layers[i]) {
                (
                    NetworkLayer::Perceptron(layer),
                    LayerForwardPropagation::Perceptron(forward),
                    LayerBackPropagation::Perceptron(back),
                ) => {
                    layer.calculate_error_gradient(&layer_inputs, forward, back)?;
                    layer.insert_gradient(back, index, &mut gradient)?;
                }
                (
                    NetworkLayer::Probabilistic(layer),
                    LayerForwardPropagation::Probabilistic(forward),
                    LayerBackPropagation::Probabilistic(back),
                ) => {
                    layer.calculate_error_gradient(&layer_inputs, forward, back)?;
                    layer.insert_gradient(back, index, &mut gradient)?;
                }
                _ => return Err(mismatched_buffer("error gradient")),
            }
            index += layer.as_layer().parameters_number();
        }
        Ok(gradient)
    }

    /// Per-sample squared-errors Jacobian (batch × network parameters).
    pub fn calculate_squared_errors_jacobian(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &NetworkForwardPropagation,
        back: &mut NetworkBackPropagationLm,
    ) -> Result<Array2<f64>> {
        let mut jacobian = Array2::zeros((inputs.nrows(), self.parameters_number()));
        let mut index = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            let layer_inputs = match i {
                0 => inputs.view(),
                _ => forward.layers[i - 1].activations().view(),
            };
            match (layer, &forward.layers[i], &mut back.layers[i]) {
                (
                    NetworkLayer::Perceptron(layer),
                    LayerForwardPropagation::Perceptron(forward),
                    LayerBackPropagationLm::Perceptron(back),
                ) => {
                    layer.calculate_squared_errors_jacobian_lm(&layer_inputs, forward, back)?;
                    layer.insert_squared_errors_jacobian_lm(back, index, &mut jacobian)?;
                }
                (
                    NetworkLayer::Probabilistic(layer),
                    LayerForwardPropagation::Probabilistic(forward),
                    LayerBackPropagationLm::Probabilistic(back),
                ) => {
                    layer.calculate_squared_errors_jacobian_lm(&layer_inputs, forward, back)?;
                    layer.insert_squared_errors_jacobian_lm(back, index, &mut jacobian)?;
                }
                _ => return Err(mismatched_buffer("squared errors jacobian")),
            }
            index += layer.as_layer().parameters_number();
        }
        Ok(jacobian)
    }
}
