// Tests for the perceptron layer: parameter layout, forward propagation and
// shape checking.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2};
use rust_quasi_newton::layers::{
    ActivationFunction, Layer, PerceptronForwardPropagation, PerceptronLayer,
};
use rust_quasi_newton::utils::SimpleRng;

fn layer(inputs: usize, neurons: usize, activation: ActivationFunction) -> PerceptronLayer {
    PerceptronLayer::new(inputs, neurons, activation, &mut SimpleRng::new(42))
}

mod perceptron_layer_tests {
    use super::*;

    // ========================================================================
    // Parameters
    // ========================================================================

    #[test]
    fn test_get_set_parameters_round_trip() {
        let mut source = layer(3, 2, ActivationFunction::HyperbolicTangent);
        let parameters = source.get_parameters();
        assert_eq!(parameters.len(), 2 + 3 * 2);

        let mut target = layer(3, 2, ActivationFunction::HyperbolicTangent);
        target.set_parameters(&parameters.view(), 0).unwrap();
        assert_eq!(target.get_parameters(), parameters);
        assert_eq!(target.biases(), source.biases());
        assert_eq!(target.synaptic_weights(), source.synaptic_weights());

        source.set_parameters_constant(0.0);
        assert!(source.get_parameters().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_parameter_layout_is_biases_then_weights_column_major() {
        let mut layer = layer(2, 2, ActivationFunction::Linear);
        layer.set_biases(array![1.0, 2.0]).unwrap();
        layer
            .set_synaptic_weights(array![[3.0, 5.0], [4.0, 6.0]])
            .unwrap();
        assert_eq!(layer.get_parameters(), array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let parameters = array![0.0, 9.0, 8.0, 7.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        layer.set_parameters(&parameters.view(), 4).unwrap();
        assert_eq!(layer.biases(), &array![1.0, 2.0]);
        assert_eq!(layer.synaptic_weights(), &array![[3.0, 5.0], [4.0, 6.0]]);
    }

    #[test]
    fn test_random_parameters_in_range() {
        let mut layer = layer(10, 10, ActivationFunction::Linear);
        layer.set_parameters_random(&mut SimpleRng::new(3));
        assert!(layer
            .get_parameters()
            .iter()
            .all(|&p| (-0.2..=0.2).contains(&p)));
    }

    #[test]
    fn test_resizing_reinitializes() {
        let mut rng = SimpleRng::new(5);
        let mut layer = layer(2, 3, ActivationFunction::Linear);
        layer.set_inputs_number(4, &mut rng);
        assert_eq!(layer.inputs_number(), 4);
        assert_eq!(layer.synaptic_weights().dim(), (4, 3));
        layer.set_neurons_number(1, &mut rng);
        assert_eq!(layer.neurons_number(), 1);
        assert_eq!(layer.biases_number(), 1);
        assert_eq!(layer.synaptic_weights_number(), 4);
        assert_eq!(layer.parameters_number(), 5);
    }

    #[test]
    fn test_rejects_wrong_sizes() {
        let mut layer = layer(2, 2, ActivationFunction::Linear);
        assert!(layer.set_biases(Array1::zeros(3)).is_err());
        assert!(layer.set_synaptic_weights(Array2::zeros((2, 3))).is_err());
        let err = layer
            .set_parameters(&Array1::zeros(5).view(), 0)
            .unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    // ========================================================================
    // Forward propagation
    // ========================================================================

    #[test]
    fn test_identity_layer() {
        let mut layer = layer(1, 1, ActivationFunction::Linear);
        layer.set_biases_constant(0.0);
        layer.set_synaptic_weights_constant(1.0);
        for x in [-2.0, 0.0, 0.5, 10.0] {
            let outputs = layer.calculate_outputs(&array![[x]].view()).unwrap();
            assert_eq!(outputs, array![[x]]);
        }
    }

    #[test]
    fn test_combinations_column_formula() {
        let layer = layer(2, 2, ActivationFunction::Linear);
        let inputs = array![[1.0, 2.0], [-1.0, 0.5]];
        let biases = array![0.1, -0.2];
        let weights = array![[1.0, 0.0], [0.5, 2.0]];
        let combinations = layer
            .calculate_combinations(&inputs.view(), &biases.view(), &weights.view())
            .unwrap();
        assert_abs_diff_eq!(combinations[[0, 0]], 0.1 + 1.0 + 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(combinations[[0, 1]], -0.2 + 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(combinations[[1, 0]], 0.1 - 1.0 + 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(combinations[[1, 1]], -0.2 + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_combinations_reject_wrong_inputs() {
        let layer = layer(3, 2, ActivationFunction::Linear);
        let err = layer
            .calculate_outputs(&Array2::zeros((4, 2)).view())
            .unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    #[test]
    fn test_forward_propagate_fills_buffer() {
        let layer = layer(2, 3, ActivationFunction::Logistic);
        let inputs = array![[0.3, -0.7], [1.2, 0.4]];
        let mut forward = PerceptronForwardPropagation::new(2, 3);
        layer.forward_propagate(&inputs.view(), &mut forward).unwrap();

        assert_eq!(forward.activations, layer.calculate_outputs(&inputs.view()).unwrap());
        for (a, d) in forward
            .activations
            .iter()
            .zip(forward.activations_derivatives.iter())
        {
            assert_abs_diff_eq!(*d, a * (1.0 - a), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_forward_with_candidate_parameters_leaves_layer_untouched() {
        let layer = layer(1, 1, ActivationFunction::Linear);
        let before = layer.get_parameters();
        let candidate = array![1.0, 3.0];
        let mut forward = PerceptronForwardPropagation::new(2, 1);
        layer
            .forward_propagate_with_parameters(&array![[1.0], [2.0]].view(), &candidate.view(), &mut forward)
            .unwrap();
        assert_eq!(forward.activations, array![[4.0], [7.0]]);
        assert_eq!(layer.get_parameters(), before);
    }

    #[test]
    fn test_forward_rejects_wrong_batch() {
        let layer = layer(2, 2, ActivationFunction::Linear);
        let mut forward = PerceptronForwardPropagation::new(3, 2);
        let err = layer
            .forward_propagate(&Array2::zeros((2, 2)).view(), &mut forward)
            .unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    #[test]
    fn test_activation_by_name() {
        let mut layer = layer(1, 1, ActivationFunction::Linear);
        layer.set_activation_function_name("SoftSign").unwrap();
        assert_eq!(layer.activation_function(), ActivationFunction::SoftSign);
        assert!(layer.set_activation_function_name("Sigmoid").is_err());
        assert_eq!(layer.activation_function(), ActivationFunction::SoftSign);
    }
}
