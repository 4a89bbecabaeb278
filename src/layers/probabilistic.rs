//! Probabilistic output layer
//!
//! A dense layer whose activations are read as class probabilities. A layer
//! with one neuron is binary (logistic or hard threshold); a layer with several
//! neurons is multi-class. Softmax couples every output of a sample, so its
//! derivative is a per-sample `neurons × neurons` Jacobian instead of an
//! elementwise matrix.

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layers::activation::logistic;
use crate::layers::dense;
use crate::layers::perceptron::{check_same_dim, softmax_error_combinations};
use crate::layers::propagation::{
    check_batch, ActivationDerivatives, NextLayer, ProbabilisticBackPropagation,
    ProbabilisticBackPropagationLm, ProbabilisticForwardPropagation,
};
use crate::layers::Layer;
use crate::utils::{Device, SimpleRng};

/// Activation of a probabilistic layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbabilisticActivation {
    /// 1 when the combination reaches the decision threshold, else 0.
    Binary,
    Logistic,
    /// One-hot at the largest combination of each sample.
    Competitive,
    Softmax,
}

impl ProbabilisticActivation {
    pub const ALL: [ProbabilisticActivation; 4] = [
        ProbabilisticActivation::Binary,
        ProbabilisticActivation::Logistic,
        ProbabilisticActivation::Competitive,
        ProbabilisticActivation::Softmax,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProbabilisticActivation::Binary => "Binary",
            ProbabilisticActivation::Logistic => "Logistic",
            ProbabilisticActivation::Competitive => "Competitive",
            ProbabilisticActivation::Softmax => "Softmax",
        }
    }
}

impl fmt::Display for ProbabilisticActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProbabilisticActivation {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        ProbabilisticActivation::ALL
            .iter()
            .copied()
            .find(|function| function.name() == name)
            .ok_or_else(|| Error::UnknownProbabilisticActivation(name.to_string()))
    }
}

/// Dense output layer producing probabilities.
#[derive(Debug, Clone)]
pub struct ProbabilisticLayer {
    name: String,
    biases: Array1<f64>,
    synaptic_weights: Array2<f64>,
    activation_function: ProbabilisticActivation,
    decision_threshold: f64,
    device: Device,
}

impl ProbabilisticLayer {
    /// Create a new layer with parameters sampled uniformly in `[-0.2, 0.2]`.
    ///
    /// One neuron defaults to `Logistic`, several neurons to `Softmax`.
    pub fn new(inputs_number: usize, neurons_number: usize, rng: &mut SimpleRng) -> Self {
        let (biases, synaptic_weights) =
            dense::random_parameters(inputs_number, neurons_number, rng);
        let activation_function = if neurons_number == 1 {
            ProbabilisticActivation::Logistic
        } else {
            ProbabilisticActivation::Softmax
        };
        Self {
            name: "probabilistic_layer".to_string(),
            biases,
            synaptic_weights,
            activation_function,
            decision_threshold: 0.5,
            device: Device::default(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    pub fn activation_function(&self) -> ProbabilisticActivation {
        self.activation_function
    }

    pub fn set_activation_function(&mut self, activation_function: ProbabilisticActivation) {
        self.activation_function = activation_function;
    }

    pub fn set_activation_function_name(&mut self, name: &str) -> Result<()> {
        self.activation_function = name.parse()?;
        Ok(())
    }

    pub fn decision_threshold(&self) -> f64 {
        self.decision_threshold
    }

    pub fn set_decision_threshold(&mut self, decision_threshold: f64) {
        self.decision_threshold = decision_threshold;
    }

    pub fn is_binary(&self) -> bool {
        self.neurons_number() == 1
    }

    /// True when the forward buffer must hold a Jacobian.
    pub fn uses_jacobian(&self) -> bool {
        self.activation_function == ProbabilisticActivation::Softmax
    }

    pub fn biases(&self) -> &Array1<f64> {
        &self.biases
    }

    pub fn synaptic_weights(&self) -> &Array2<f64> {
        &self.synaptic_weights
    }

    pub fn set_parameters_constant(&mut self, value: f64) {
        self.biases.fill(value);
        self.synaptic_weights.fill(value);
    }

    pub fn set_parameters_random(&mut self, rng: &mut SimpleRng) {
        (self.biases, self.synaptic_weights) =
            dense::random_parameters(self.inputs_number(), self.neurons_number(), rng);
    }

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
        check_same_dim(combinations.dim(), activations.dim(), "probabilistic activations")?;
        match self.activation_function {
            ProbabilisticActivation::Binary => {
                let threshold = self.decision_threshold;
                self.device.map_into(combinations, activations, move |c| {
                    if c < threshold {
                        0.0
                    } else {
                        1.0
                    }
                });
            }
            ProbabilisticActivation::Logistic => {
                self.device.map_into(combinations, activations, logistic);
            }
            ProbabilisticActivation::Competitive => competitive(combinations, activations),
            ProbabilisticActivation::Softmax => softmax(combinations, activations),
        }
        Ok(())
    }

    /// Activations plus their derivatives (a Jacobian for softmax).
    pub fn calculate_activations_derivatives(
        &self,
        combinations: &ArrayView2<f64>,
        activations: &mut Array2<f64>,
        activations_derivatives: &mut ActivationDerivatives,
    ) -> Result<()> {
        self.calculate_activations(combinations, activations)?;

        match (self.activation_function, activations_derivatives) {
            (ProbabilisticActivation::Softmax, ActivationDerivatives::Jacobian(jacobian)) => {
                let (samples, neurons) = activations.dim();
                if jacobian.dim() != (samples, neurons, neurons) {
                    return Err(Error::dimension(
                        "softmax jacobian buffer",
                        format!("{}x{}x{}", samples, neurons, neurons),
                        format!("{:?}", jacobian.shape()),
                    ));
                }
                for (mut sample_jacobian, a) in jacobian
                    .axis_iter_mut(Axis(0))
                    .zip(activations.rows())
                {
                    for i in 0..neurons {
                        for j in 0..neurons {
                            let delta = if i == j { 1.0 } else { 0.0 };
                            sample_jacobian[[i, j]] = a[i] * (delta - a[j]);
                        }
                    }
                }
            }
            (ProbabilisticActivation::Logistic, ActivationDerivatives::Elementwise(derivatives)) => {
                check_same_dim(derivatives.dim(), activations.dim(), "probabilistic derivatives")?;
                self.device
                    .map_into(&activations.view(), derivatives, |a| a * (1.0 - a));
            }
            (
                ProbabilisticActivation::Binary | ProbabilisticActivation::Competitive,
                ActivationDerivatives::Elementwise(derivatives),
            ) => {
                check_same_dim(derivatives.dim(), activations.dim(), "probabilistic derivatives")?;
                derivatives.fill(0.0);
            }
            (function, _) => {
                return Err(Error::dimension(
                    "probabilistic derivatives layout",
                    if function == ProbabilisticActivation::Softmax {
                        "jacobian"
                    } else {
                        "elementwise"
                    },
                    function.name(),
                ))
            }
        }
        Ok(())
    }

    pub fn forward_propagate(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &mut ProbabilisticForwardPropagation,
    ) -> Result<()> {
        self.forward_propagate_parameters(
            inputs,
            &self.biases.view(),
            &self.synaptic_weights.view(),
            forward,
        )
    }

    /// Forward pass with a candidate parameter block; the layer is not modified.
    pub fn forward_propagate_with_parameters(
        &self,
        inputs: &ArrayView2<f64>,
        parameters: &ArrayView1<f64>,
        forward: &mut ProbabilisticForwardPropagation,
    ) -> Result<()> {
        let biases = dense::biases_from(parameters, self.neurons_number())?;
        let synaptic_weights =
            dense::synaptic_weights_from(parameters, self.inputs_number(), self.neurons_number())?;
        self.forward_propagate_parameters(inputs, &biases.view(), &synaptic_weights.view(), forward)
    }

    fn forward_propagate_parameters(
        &self,
        inputs: &ArrayView2<f64>,
        biases: &ArrayView1<f64>,
        synaptic_weights: &ArrayView2<f64>,
        forward: &mut ProbabilisticForwardPropagation,
    ) -> Result<()> {
        check_batch(&forward.combinations, inputs.nrows(), "probabilistic forward propagation")?;
        let combinations = self.calculate_combinations(inputs, biases, synaptic_weights)?;
        check_same_dim(
            combinations.dim(),
            forward.combinations.dim(),
            "probabilistic forward propagation",
        )?;
        forward.combinations.assign(&combinations);
        self.calculate_activations_derivatives(
            &combinations.view(),
            &mut forward.activations,
            &mut forward.activations_derivatives,
        )
    }

    // delta ⊙ derivative, or deltaᵀ·J per sample for softmax
    fn error_combinations(
        &self,
        forward: &ProbabilisticForwardPropagation,
        delta: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        if delta.ncols() != self.neurons_number() {
            return Err(Error::dimension(
                "probabilistic delta",
                format!("{} columns", self.neurons_number()),
                format!("{} columns", delta.ncols()),
            ));
        }
        match &forward.activations_derivatives {
            ActivationDerivatives::Jacobian(jacobian) => {
                softmax_error_combinations(&delta.view(), &jacobian.view())
            }
            ActivationDerivatives::Elementwise(derivatives) => {
                check_same_dim(derivatives.dim(), delta.dim(), "delta and activation derivatives")?;
                Ok(self.device.hadamard(&delta.view(), &derivatives.view()))
            }
        }
    }

    pub fn calculate_error_gradient(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &ProbabilisticForwardPropagation,
        back: &mut ProbabilisticBackPropagation,
    ) -> Result<()> {
        let error_combinations = self.error_combinations(forward, &back.delta)?;
        dense::calculate_parameters_gradient(
            &self.device,
            inputs,
            &error_combinations.view(),
            &mut back.biases_derivatives,
            &mut back.synaptic_weights_derivatives,
        )?;
        back.error_combinations_derivatives = error_combinations;
        Ok(())
    }

    pub fn insert_gradient(
        &self,
        back: &ProbabilisticBackPropagation,
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

    pub fn calculate_squared_errors_jacobian_lm(
        &self,
        inputs: &ArrayView2<f64>,
        forward: &ProbabilisticForwardPropagation,
        back: &mut ProbabilisticBackPropagationLm,
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
        )?;
        back.error_combinations_derivatives = error_combinations;
        Ok(())
    }

    pub fn insert_squared_errors_jacobian_lm(
        &self,
        back: &ProbabilisticBackPropagationLm,
        index: usize,
        jacobian: &mut Array2<f64>,
    ) -> Result<()> {
        dense::insert_squared_errors_jacobian(&back.squared_errors_jacobian, index, jacobian)
    }

    /// This layer as seen by the hidden layer before it.
    pub fn as_next_layer<'a>(
        &'a self,
        forward: &'a ProbabilisticForwardPropagation,
        delta: &'a Array2<f64>,
    ) -> NextLayer<'a> {
        NextLayer::probabilistic(
            self.synaptic_weights.view(),
            delta.view(),
            &forward.activations_derivatives,
        )
    }
}

impl Layer for ProbabilisticLayer {
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
                "probabilistic set_parameters",
                format!("at least {} parameters", end),
                parameters.len(),
            ));
        }
        let block = parameters.slice(s![index..end]);
        self.biases = dense::biases_from(&block, self.neurons_number())?;
        self.synaptic_weights =
            dense::synaptic_weights_from(&block, self.inputs_number(), self.neurons_number())?;
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

/// Row-wise softmax with the max-subtraction trick.
fn softmax(combinations: &ArrayView2<f64>, activations: &mut Array2<f64>) {
    for (row, mut output) in combinations.rows().into_iter().zip(activations.rows_mut()) {
        let max_value = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        output.assign(&row.mapv(|c| (c - max_value).exp()));
        let sum = output.sum();
        output /= sum;
    }
}

fn competitive(combinations: &ArrayView2<f64>, activations: &mut Array2<f64>) {
    activations.fill(0.0);
    for (row, mut output) in combinations.rows().into_iter().zip(activations.rows_mut()) {
        let winner = row
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &c)| match best {
                Some((_, value)) if value >= c => best,
                _ => Some((i, c)),
            });
        if let Some((i, _)) = winner {
            output[i] = 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_default_activation_by_neuron_count() {
        let mut rng = SimpleRng::new(3);
        assert_eq!(
            ProbabilisticLayer::new(2, 1, &mut rng).activation_function(),
            ProbabilisticActivation::Logistic
        );
        assert_eq!(
            ProbabilisticLayer::new(2, 3, &mut rng).activation_function(),
            ProbabilisticActivation::Softmax
        );
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let combinations = array![[1000.0, 1001.0, 1002.0], [0.0, 0.0, 0.0]];
        let mut activations = Array2::zeros((2, 3));
        softmax(&combinations.view(), &mut activations);
        for row in activations.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|v| v.is_finite()));
        }
        assert_abs_diff_eq!(activations[[1, 0]], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_softmax_jacobian_entries() {
        let mut layer = ProbabilisticLayer::new(1, 2, &mut SimpleRng::new(1));
        layer.set_parameters_constant(0.0);
        let mut forward = ProbabilisticForwardPropagation::new(1, 2, true);
        layer
            .forward_propagate(&array![[1.0]].view(), &mut forward)
            .unwrap();
        match &forward.activations_derivatives {
            ActivationDerivatives::Jacobian(jacobian) => {
                // a = [0.5, 0.5]
                assert_abs_diff_eq!(jacobian[[0, 0, 0]], 0.25);
                assert_abs_diff_eq!(jacobian[[0, 0, 1]], -0.25);
                assert_abs_diff_eq!(jacobian[[0, 1, 0]], -0.25);
            }
            ActivationDerivatives::Elementwise(_) => panic!("expected a jacobian"),
        }
    }

    #[test]
    fn test_competitive_one_hot() {
        let combinations = array![[0.1, 0.7, 0.2], [3.0, -1.0, 3.0]];
        let mut activations = Array2::zeros((2, 3));
        competitive(&combinations.view(), &mut activations);
        assert_eq!(activations, array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_binary_threshold() {
        let mut layer = ProbabilisticLayer::new(1, 1, &mut SimpleRng::new(1));
        layer.set_activation_function(ProbabilisticActivation::Binary);
        layer.set_parameters_constant(0.0);
        layer.set_parameters(&array![0.0, 1.0].view(), 0).unwrap();
        let outputs = layer.calculate_outputs(&array![[0.4], [0.5]].view()).unwrap();
        assert_eq!(outputs, array![[0.0], [1.0]]);
    }

    #[test]
    fn test_layout_mismatch_is_error() {
        let layer = ProbabilisticLayer::new(1, 2, &mut SimpleRng::new(1));
        let mut forward = ProbabilisticForwardPropagation::new(1, 2, false);
        assert!(layer
            .forward_propagate(&array![[1.0]].view(), &mut forward)
            .is_err());
    }

    #[test]
    fn test_unknown_activation_name() {
        let err = "Tanh".parse::<ProbabilisticActivation>().unwrap_err();
        assert!(matches!(err, Error::UnknownProbabilisticActivation(_)));
    }
}
