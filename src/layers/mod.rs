//! Layer abstractions for neural networks
//!
//! This module provides the Layer trait, the perceptron and probabilistic
//! layers, their activation functions and the propagation buffers passed
//! between layers during training.

mod r#trait;
pub mod activation;
pub mod dense;
pub mod perceptron;
pub mod probabilistic;
pub mod propagation;

// Re-export the Layer trait for convenience
pub use r#trait::Layer;
pub use activation::ActivationFunction;
pub use perceptron::PerceptronLayer;
pub use probabilistic::{ProbabilisticActivation, ProbabilisticLayer};
pub use propagation::{
    ActivationDerivatives, LayerBackPropagation, LayerBackPropagationLm, LayerForwardPropagation,
    NextLayer, PerceptronBackPropagation, PerceptronBackPropagationLm, PerceptronForwardPropagation,
    ProbabilisticBackPropagation, ProbabilisticBackPropagationLm, ProbabilisticForwardPropagation,
};
