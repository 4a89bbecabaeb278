//! Activation functions for perceptron layers
//!
//! Every function produces its value and its derivative with respect to the
//! combination in a single evaluation, so the training path never recomputes
//! the forward transform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

const SELU_LAMBDA: f64 = 1.0507;
const SELU_ALPHA: f64 = 1.67326;
const ELU_ALPHA: f64 = 1.0;

/// Elementwise activation of a perceptron layer.
///
/// Names used in configuration files are exactly the variant names.
///
/// # Example
///
/// ```
/// use rust_quasi_newton::layers::ActivationFunction;
///
/// let logistic: ActivationFunction = "Logistic".parse().unwrap();
/// let (a, d) = logistic.activate_with_derivative(0.0);
/// assert_eq!((a, d), (0.5, 0.25));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationFunction {
    Linear,
    Logistic,
    #[default]
    HyperbolicTangent,
    Threshold,
    SymmetricThreshold,
    RectifiedLinear,
    ScaledExponentialLinear,
    SoftPlus,
    SoftSign,
    HardSigmoid,
    ExponentialLinear,
}

impl ActivationFunction {
    pub const ALL: [ActivationFunction; 11] = [
        ActivationFunction::Linear,
        ActivationFunction::Logistic,
        ActivationFunction::HyperbolicTangent,
        ActivationFunction::Threshold,
        ActivationFunction::SymmetricThreshold,
        ActivationFunction::RectifiedLinear,
        ActivationFunction::ScaledExponentialLinear,
        ActivationFunction::SoftPlus,
        ActivationFunction::SoftSign,
        ActivationFunction::HardSigmoid,
        ActivationFunction::ExponentialLinear,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActivationFunction::Linear => "Linear",
            ActivationFunction::Logistic => "Logistic",
            ActivationFunction::HyperbolicTangent => "HyperbolicTangent",
            ActivationFunction::Threshold => "Threshold",
            ActivationFunction::SymmetricThreshold => "SymmetricThreshold",
            ActivationFunction::RectifiedLinear => "RectifiedLinear",
            ActivationFunction::ScaledExponentialLinear => "ScaledExponentialLinear",
            ActivationFunction::SoftPlus => "SoftPlus",
            ActivationFunction::SoftSign => "SoftSign",
            ActivationFunction::HardSigmoid => "HardSigmoid",
            ActivationFunction::ExponentialLinear => "ExponentialLinear",
        }
    }

    /// Activation value for combination `c`.
    pub fn activate(&self, c: f64) -> f64 {
        match self {
            ActivationFunction::Linear => c,
            ActivationFunction::Logistic => logistic(c),
            ActivationFunction::HyperbolicTangent => c.tanh(),
            ActivationFunction::Threshold => {
                if c >= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationFunction::SymmetricThreshold => {
                if c >= 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            ActivationFunction::RectifiedLinear => c.max(0.0),
            ActivationFunction::ScaledExponentialLinear => {
                if c > 0.0 {
                    SELU_LAMBDA * c
                } else {
                    SELU_LAMBDA * SELU_ALPHA * (c.exp() - 1.0)
                }
            }
            ActivationFunction::SoftPlus => soft_plus(c),
            ActivationFunction::SoftSign => c / (1.0 + c.abs()),
            ActivationFunction::HardSigmoid => (0.2 * c + 0.5).clamp(0.0, 1.0),
            ActivationFunction::ExponentialLinear => {
                if c > 0.0 {
                    c
                } else {
                    ELU_ALPHA * (c.exp() - 1.0)
                }
            }
        }
    }

    /// Activation value and its derivative `da/dc` in one pass.
    pub fn activate_with_derivative(&self, c: f64) -> (f64, f64) {
        match self {
            ActivationFunction::Linear => (c, 1.0),
            ActivationFunction::Logistic => {
                let a = logistic(c);
                (a, a * (1.0 - a))
            }
            ActivationFunction::HyperbolicTangent => {
                let a = c.tanh();
                (a, 1.0 - a * a)
            }
            ActivationFunction::Threshold | ActivationFunction::SymmetricThreshold => {
                (self.activate(c), 0.0)
            }
            ActivationFunction::RectifiedLinear => {
                if c > 0.0 {
                    (c, 1.0)
                } else {
                    (0.0, 0.0)
                }
            }
            ActivationFunction::ScaledExponentialLinear => {
                if c > 0.0 {
                    (SELU_LAMBDA * c, SELU_LAMBDA)
                } else {
                    let e = c.exp();
                    (
                        SELU_LAMBDA * SELU_ALPHA * (e - 1.0),
                        SELU_LAMBDA * SELU_ALPHA * e,
                    )
                }
            }
            ActivationFunction::SoftPlus => (soft_plus(c), logistic(c)),
            ActivationFunction::SoftSign => {
                let denominator = 1.0 + c.abs();
                (c / denominator, 1.0 / (denominator * denominator))
            }
            ActivationFunction::HardSigmoid => {
                let linear = 0.2 * c + 0.5;
                if linear <= 0.0 {
                    (0.0, 0.0)
                } else if linear >= 1.0 {
                    (1.0, 0.0)
                } else {
                    (linear, 0.2)
                }
            }
            ActivationFunction::ExponentialLinear => {
                if c > 0.0 {
                    (c, 1.0)
                } else {
                    let a = ELU_ALPHA * (c.exp() - 1.0);
                    (a, a + ELU_ALPHA)
                }
            }
        }
    }
}

impl fmt::Display for ActivationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivationFunction {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ActivationFunction::ALL
            .iter()
            .copied()
            .find(|function| function.name() == name)
            .ok_or_else(|| Error::UnknownActivationFunction(name.to_string()))
    }
}

/// Logistic sigmoid `1 / (1 + e^-c)`.
pub fn logistic(c: f64) -> f64 {
    1.0 / (1.0 + (-c).exp())
}

// ln(1 + e^c) without overflow for large c
fn soft_plus(c: f64) -> f64 {
    if c > 30.0 {
        c
    } else {
        c.exp().ln_1p()
    }
}
