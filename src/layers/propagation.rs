//! Forward and backward propagation buffers
//!
//! Buffers are caller-owned scratch space. They are sized once for a batch and
//! overwritten by every pass; layers never resize them and reject buffers whose
//! batch size does not match the inputs.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3};

use crate::error::{Error, Result};

/// Forward state of a perceptron layer for one batch.
#[derive(Debug, Clone)]
pub struct PerceptronForwardPropagation {
    pub combinations: Array2<f64>,
    pub activations: Array2<f64>,
    pub activations_derivatives: Array2<f64>,
}

impl PerceptronForwardPropagation {
    pub fn new(batch_samples_number: usize, neurons_number: usize) -> Self {
        let shape = (batch_samples_number, neurons_number);
        Self {
            combinations: Array2::zeros(shape),
            activations: Array2::zeros(shape),
            activations_derivatives: Array2::zeros(shape),
        }
    }

    pub fn batch_samples_number(&self) -> usize {
        self.combinations.nrows()
    }
}

/// Derivatives of a probabilistic layer's activations.
///
/// Softmax couples every output of a sample, so its derivative is a
/// `batch × neurons × neurons` Jacobian; the other activations are elementwise.
#[derive(Debug, Clone)]
pub enum ActivationDerivatives {
    Elementwise(Array2<f64>),
    Jacobian(Array3<f64>),
}

impl ActivationDerivatives {
    pub fn is_jacobian(&self) -> bool {
        matches!(self, ActivationDerivatives::Jacobian(_))
    }
}

/// Forward state of a probabilistic layer for one batch.
#[derive(Debug, Clone)]
pub struct ProbabilisticForwardPropagation {
    pub combinations: Array2<f64>,
    pub activations: Array2<f64>,
    pub activations_derivatives: ActivationDerivatives,
}

impl ProbabilisticForwardPropagation {
    /// `jacobian` selects the softmax derivative layout.
    pub fn new(batch_samples_number: usize, neurons_number: usize, jacobian: bool) -> Self {
        let shape = (batch_samples_number, neurons_number);
        let activations_derivatives = if jacobian {
            ActivationDerivatives::Jacobian(Array3::zeros((
                batch_samples_number,
                neurons_number,
                neurons_number,
            )))
        } else {
            ActivationDerivatives::Elementwise(Array2::zeros(shape))
        };
        Self {
            combinations: Array2::zeros(shape),
            activations: Array2::zeros(shape),
            activations_derivatives,
        }
    }

    pub fn batch_samples_number(&self) -> usize {
        self.combinations.nrows()
    }
}

/// Backward state of a perceptron layer: delta and parameter gradients.
#[derive(Debug, Clone)]
pub struct PerceptronBackPropagation {
    pub delta: Array2<f64>,
    pub biases_derivatives: Array1<f64>,
    pub synaptic_weights_derivatives: Array2<f64>,
}

impl PerceptronBackPropagation {
    pub fn new(batch_samples_number: usize, inputs_number: usize, neurons_number: usize) -> Self {
        Self {
            delta: Array2::zeros((batch_samples_number, neurons_number)),
            biases_derivatives: Array1::zeros(neurons_number),
            synaptic_weights_derivatives: Array2::zeros((inputs_number, neurons_number)),
        }
    }
}

/// Backward state of a probabilistic layer.
///
/// `error_combinations_derivatives` holds the delta carried through the
/// activation derivative (or the softmax Jacobian).
#[derive(Debug, Clone)]
pub struct ProbabilisticBackPropagation {
    pub delta: Array2<f64>,
    pub error_combinations_derivatives: Array2<f64>,
    pub biases_derivatives: Array1<f64>,
    pub synaptic_weights_derivatives: Array2<f64>,
}

impl ProbabilisticBackPropagation {
    pub fn new(batch_samples_number: usize, inputs_number: usize, neurons_number: usize) -> Self {
        Self {
            delta: Array2::zeros((batch_samples_number, neurons_number)),
            error_combinations_derivatives: Array2::zeros((batch_samples_number, neurons_number)),
            biases_derivatives: Array1::zeros(neurons_number),
            synaptic_weights_derivatives: Array2::zeros((inputs_number, neurons_number)),
        }
    }
}

/// Levenberg-Marquardt backward state of a perceptron layer.
#[derive(Debug, Clone)]
pub struct PerceptronBackPropagationLm {
    pub delta: Array2<f64>,
    pub squared_errors_jacobian: Array2<f64>,
}

impl PerceptronBackPropagationLm {
    pub fn new(batch_samples_number: usize, neurons_number: usize, parameters_number: usize) -> Self {
        Self {
            delta: Array2::zeros((batch_samples_number, neurons_number)),
            squared_errors_jacobian: Array2::zeros((batch_samples_number, parameters_number)),
        }
    }
}

/// Levenberg-Marquardt backward state of a probabilistic layer.
#[derive(Debug, Clone)]
pub struct ProbabilisticBackPropagationLm {
    pub delta: Array2<f64>,
    pub error_combinations_derivatives: Array2<f64>,
    pub squared_errors_jacobian: Array2<f64>,
}

impl ProbabilisticBackPropagationLm {
    pub fn new(batch_samples_number: usize, neurons_number: usize, parameters_number: usize) -> Self {
        Self {
            delta: Array2::zeros((batch_samples_number, neurons_number)),
            error_combinations_derivatives: Array2::zeros((batch_samples_number, neurons_number)),
            squared_errors_jacobian: Array2::zeros((batch_samples_number, parameters_number)),
        }
    }
}

/// Forward buffer of any layer kind.
#[derive(Debug, Clone)]
pub enum LayerForwardPropagation {
    Perceptron(PerceptronForwardPropagation),
    Probabilistic(ProbabilisticForwardPropagation),
}

impl LayerForwardPropagation {
    pub fn activations(&self) -> &Array2<f64> {
        match self {
            LayerForwardPropagation::Perceptron(forward) => &forward.activations,
            LayerForwardPropagation::Probabilistic(forward) => &forward.activations,
        }
    }

    pub fn batch_samples_number(&self) -> usize {
        self.activations().nrows()
    }
}

/// Backward buffer of any layer kind.
#[derive(Debug, Clone)]
pub enum LayerBackPropagation {
    Perceptron(PerceptronBackPropagation),
    Probabilistic(ProbabilisticBackPropagation),
}

impl LayerBackPropagation {
    pub fn delta(&self) -> &Array2<f64> {
        match self {
            LayerBackPropagation::Perceptron(back) => &back.delta,
            LayerBackPropagation::Probabilistic(back) => &back.delta,
        }
    }

    pub fn delta_mut(&mut self) -> &mut Array2<f64> {
        match self {
            LayerBackPropagation::Perceptron(back) => &mut back.delta,
            LayerBackPropagation::Probabilistic(back) => &mut back.delta,
        }
    }
}

/// Levenberg-Marquardt backward buffer of any layer kind.
#[derive(Debug, Clone)]
pub enum LayerBackPropagationLm {
    Perceptron(PerceptronBackPropagationLm),
    Probabilistic(ProbabilisticBackPropagationLm),
}

impl LayerBackPropagationLm {
    pub fn delta(&self) -> &Array2<f64> {
        match self {
            LayerBackPropagationLm::Perceptron(back) => &back.delta,
            LayerBackPropagationLm::Probabilistic(back) => &back.delta,
        }
    }

    pub fn delta_mut(&mut self) -> &mut Array2<f64> {
        match self {
            LayerBackPropagationLm::Perceptron(back) => &mut back.delta,
            LayerBackPropagationLm::Probabilistic(back) => &mut back.delta,
        }
    }
}

/// The layer that follows a hidden perceptron, as seen by delta propagation.
///
/// Each variant borrows the next layer's weights, its already computed delta
/// and the activation derivatives stored by its forward pass. The set is
/// closed: a hidden delta is computed by matching on it.
#[derive(Debug, Clone, Copy)]
pub enum NextLayer<'a> {
    Perceptron {
        synaptic_weights: ArrayView2<'a, f64>,
        delta: ArrayView2<'a, f64>,
        activations_derivatives: ArrayView2<'a, f64>,
    },
    /// One output neuron; derivatives are `batch × 1`.
    ProbabilisticBinary {
        synaptic_weights: ArrayView2<'a, f64>,
        delta: ArrayView2<'a, f64>,
        activations_derivatives: ArrayView2<'a, f64>,
    },
    ProbabilisticMulticlassSoftmax {
        synaptic_weights: ArrayView2<'a, f64>,
        delta: ArrayView2<'a, f64>,
        activations_derivatives: ArrayView3<'a, f64>,
    },
    ProbabilisticMulticlassOther {
        synaptic_weights: ArrayView2<'a, f64>,
        delta: ArrayView2<'a, f64>,
        activations_derivatives: ArrayView2<'a, f64>,
    },
}

impl<'a> NextLayer<'a> {
    /// Classifies a probabilistic layer from its neuron count and derivative layout.
    pub fn probabilistic(
        synaptic_weights: ArrayView2<'a, f64>,
        delta: ArrayView2<'a, f64>,
        activations_derivatives: &'a ActivationDerivatives,
    ) -> Self {
        match activations_derivatives {
            ActivationDerivatives::Jacobian(jacobian) => NextLayer::ProbabilisticMulticlassSoftmax {
                synaptic_weights,
                delta,
                activations_derivatives: jacobian.view(),
            },
            ActivationDerivatives::Elementwise(derivatives) if synaptic_weights.ncols() == 1 => {
                NextLayer::ProbabilisticBinary {
                    synaptic_weights,
                    delta,
                    activations_derivatives: derivatives.view(),
                }
            }
            ActivationDerivatives::Elementwise(derivatives) => {
                NextLayer::ProbabilisticMulticlassOther {
                    synaptic_weights,
                    delta,
                    activations_derivatives: derivatives.view(),
                }
            }
        }
    }

    pub fn synaptic_weights(&self) -> ArrayView2<'a, f64> {
        match *self {
            NextLayer::Perceptron { synaptic_weights, .. }
            | NextLayer::ProbabilisticBinary { synaptic_weights, .. }
            | NextLayer::ProbabilisticMulticlassSoftmax { synaptic_weights, .. }
            | NextLayer::ProbabilisticMulticlassOther { synaptic_weights, .. } => synaptic_weights,
        }
    }

    pub fn delta(&self) -> ArrayView2<'a, f64> {
        match *self {
            NextLayer::Perceptron { delta, .. }
            | NextLayer::ProbabilisticBinary { delta, .. }
            | NextLayer::ProbabilisticMulticlassSoftmax { delta, .. }
            | NextLayer::ProbabilisticMulticlassOther { delta, .. } => delta,
        }
    }

    /// Neuron count of the next layer.
    pub fn neurons_number(&self) -> usize {
        self.synaptic_weights().ncols()
    }
}

/// Fails unless `buffer` has exactly `batch_samples_number` rows.
pub(crate) fn check_batch(
    buffer: &Array2<f64>,
    batch_samples_number: usize,
    context: &str,
) -> Result<()> {
    if buffer.nrows() != batch_samples_number {
        return Err(Error::dimension(
            context,
            format!("{} batch samples", batch_samples_number),
            format!("{} batch samples", buffer.nrows()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilistic_buffer_layout() {
        let softmax = ProbabilisticForwardPropagation::new(4, 3, true);
        match &softmax.activations_derivatives {
            ActivationDerivatives::Jacobian(jacobian) => assert_eq!(jacobian.dim(), (4, 3, 3)),
            ActivationDerivatives::Elementwise(_) => panic!("softmax buffer must hold a Jacobian"),
        }

        let logistic = ProbabilisticForwardPropagation::new(4, 1, false);
        assert!(!logistic.activations_derivatives.is_jacobian());
        assert_eq!(logistic.batch_samples_number(), 4);
    }

    #[test]
    fn test_next_layer_classification() {
        let weights = Array2::zeros((2, 1));
        let delta = Array2::zeros((5, 1));
        let derivatives = ActivationDerivatives::Elementwise(Array2::zeros((5, 1)));
        let next = NextLayer::probabilistic(weights.view(), delta.view(), &derivatives);
        assert!(matches!(next, NextLayer::ProbabilisticBinary { .. }));

        let weights = Array2::zeros((2, 3));
        let delta = Array2::zeros((5, 3));
        let derivatives = ActivationDerivatives::Elementwise(Array2::zeros((5, 3)));
        let next = NextLayer::probabilistic(weights.view(), delta.view(), &derivatives);
        assert!(matches!(next, NextLayer::ProbabilisticMulticlassOther { .. }));
        assert_eq!(next.neurons_number(), 3);

        let jacobian = ActivationDerivatives::Jacobian(Array3::zeros((5, 3, 3)));
        let next = NextLayer::probabilistic(weights.view(), delta.view(), &jacobian);
        assert!(matches!(next, NextLayer::ProbabilisticMulticlassSoftmax { .. }));
    }

    #[test]
    fn test_check_batch() {
        let buffer = Array2::zeros((3, 2));
        assert!(check_batch(&buffer, 3, "buffer").is_ok());
        assert!(check_batch(&buffer, 4, "buffer").unwrap_err().is_dimension_mismatch());
    }
}
