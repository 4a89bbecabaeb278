//! Learning-rate algorithm
//!
//! One-dimensional minimization of the loss along a training direction. The
//! search first brackets a minimum with a triplet of learning rates
//! `A < U < B` whose middle point has the lowest loss, then shrinks the bracket
//! with golden-section or Brent (parabolic) steps.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::loss::LossIndex;

const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;
/// `1 - 1/φ`, the golden-section step inside a bracket.
const GOLDEN_SECTION: f64 = 0.381_966_011_250_105;
const MINIMUM_LEARNING_RATE: f64 = 1e-12;

/// Bracket reduction method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningRateMethod {
    GoldenSection,
    #[default]
    BrentMethod,
}

impl LearningRateMethod {
    pub fn name(&self) -> &'static str {
        match self {
            LearningRateMethod::GoldenSection => "GoldenSection",
            LearningRateMethod::BrentMethod => "BrentMethod",
        }
    }
}

impl fmt::Display for LearningRateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LearningRateMethod {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "GoldenSection" => Ok(LearningRateMethod::GoldenSection),
            "BrentMethod" => Ok(LearningRateMethod::BrentMethod),
            other => Err(Error::UnknownLearningRateMethod(other.to_string())),
        }
    }
}

/// A learning rate with the loss it produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalPoint {
    pub learning_rate: f64,
    pub loss: f64,
}

impl DirectionalPoint {
    fn new(learning_rate: f64, loss: f64) -> Self {
        // NaN or infinite losses rank worst
        let loss = if loss.is_finite() { loss } else { f64::INFINITY };
        Self {
            learning_rate,
            loss,
        }
    }
}

/// Three points bracketing a minimum: `a.lr < u.lr < b.lr`, `u.loss < a.loss`, `u.loss <= b.loss`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub a: DirectionalPoint,
    pub u: DirectionalPoint,
    pub b: DirectionalPoint,
}

impl Triplet {
    pub fn length(&self) -> f64 {
        self.b.learning_rate - self.a.learning_rate
    }

    // Replace one end of the bracket with `v`, keeping the lowest loss in the middle
    fn update(&mut self, v: DirectionalPoint) {
        if v.loss < self.u.loss {
            if v.learning_rate < self.u.learning_rate {
                self.b = self.u;
            } else {
                self.a = self.u;
            }
            self.u = v;
        } else if v.learning_rate < self.u.learning_rate {
            self.a = v;
        } else {
            self.b = v;
        }
    }
}

/// Line search along a training direction.
#[derive(Debug, Clone)]
pub struct LearningRateAlgorithm {
    method: LearningRateMethod,
    learning_rate_tolerance: f64,
    loss_tolerance: f64,
    maximum_iterations: usize,
}

impl Default for LearningRateAlgorithm {
    fn default() -> Self {
        Self {
            method: LearningRateMethod::default(),
            learning_rate_tolerance: 1e-3,
            loss_tolerance: 1e-12,
            maximum_iterations: 1000,
        }
    }
}

impl LearningRateAlgorithm {
    pub fn new(method: LearningRateMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn method(&self) -> LearningRateMethod {
        self.method
    }

    pub fn set_method(&mut self, method: LearningRateMethod) {
        self.method = method;
    }

    pub fn learning_rate_tolerance(&self) -> f64 {
        self.learning_rate_tolerance
    }

    /// Bracket length at which reduction stops, relative to the middle learning rate.
    pub fn set_learning_rate_tolerance(&mut self, tolerance: f64) {
        self.learning_rate_tolerance = tolerance;
    }

    pub fn loss_tolerance(&self) -> f64 {
        self.loss_tolerance
    }

    /// Loss improvement below which reduction stops.
    pub fn set_loss_tolerance(&mut self, tolerance: f64) {
        self.loss_tolerance = tolerance;
    }

    pub fn maximum_iterations(&self) -> usize {
        self.maximum_iterations
    }

    pub fn set_maximum_iterations(&mut self, maximum_iterations: usize) {
        self.maximum_iterations = maximum_iterations;
    }

    /// Brackets a minimum along `direction`.
    ///
    /// Returns `None` when no learning rate below the initial one decreases
    /// the loss.
    pub fn calculate_bracketing_triplet<L: LossIndex + ?Sized>(
        &self,
        loss_index: &mut L,
        parameters: &ArrayView1<f64>,
        loss: f64,
        direction: &ArrayView1<f64>,
        initial_learning_rate: f64,
    ) -> Result<Option<Triplet>> {
        let a = DirectionalPoint::new(0.0, loss);
        let mut trial = |learning_rate: f64| -> Result<DirectionalPoint> {
            let candidate: Array1<f64> = parameters + &(direction * learning_rate);
            let value = loss_index.loss(&candidate.view())?;
            trace!(learning_rate, loss = value, "line search trial");
            Ok(DirectionalPoint::new(learning_rate, value))
        };

        let first = trial(initial_learning_rate)?;

        if first.loss < a.loss {
            // expand while the loss keeps falling
            let mut triplet = Triplet { a, u: first, b: first };
            for _ in 0..self.maximum_iterations {
                let b = trial(triplet.u.learning_rate * GOLDEN_RATIO)?;
                triplet.b = b;
                if b.loss >= triplet.u.loss {
                    return Ok(Some(triplet));
                }
                triplet.a = triplet.u;
                triplet.u = b;
            }
            Ok(Some(triplet))
        } else {
            // contract towards A until a point below it appears
            let mut b = first;
            for _ in 0..self.maximum_iterations {
                let learning_rate = b.learning_rate / GOLDEN_RATIO;
                if learning_rate < MINIMUM_LEARNING_RATE {
                    break;
                }
                let u = trial(learning_rate)?;
                if u.loss < a.loss {
                    return Ok(Some(Triplet { a, u, b }));
                }
                b = u;
            }
            Ok(None)
        }
    }

    /// Learning rate that approximately minimizes the loss along `direction`.
    ///
    /// Returns `(0, loss)` when the loss cannot be decreased along the direction.
    ///
    /// # Arguments
    ///
    /// * `loss_index` - Objective evaluated at trial parameters
    /// * `parameters` - Current parameters
    /// * `loss` - Loss at `parameters`
    /// * `direction` - Training direction
    /// * `initial_learning_rate` - First trial step
    pub fn calculate_directional_point<L: LossIndex + ?Sized>(
        &self,
        loss_index: &mut L,
        parameters: &ArrayView1<f64>,
        loss: f64,
        direction: &ArrayView1<f64>,
        initial_learning_rate: f64,
    ) -> Result<(f64, f64)> {
        let triplet = match self.calculate_bracketing_triplet(
            loss_index,
            parameters,
            loss,
            direction,
            initial_learning_rate,
        )? {
            Some(triplet) => triplet,
            None => return Ok((0.0, loss)),
        };

        let mut triplet = triplet;
        for _ in 0..self.maximum_iterations {
            if triplet.length() <= self.learning_rate_tolerance * triplet.u.learning_rate {
                break;
            }
            let learning_rate = match self.method {
                LearningRateMethod::GoldenSection => golden_section_learning_rate(&triplet),
                LearningRateMethod::BrentMethod => brent_method_learning_rate(&triplet),
            };
            let candidate: Array1<f64> = parameters + &(direction * learning_rate);
            let v = DirectionalPoint::new(learning_rate, loss_index.loss(&candidate.view())?);
            let improvement = triplet.u.loss - v.loss;
            triplet.update(v);
            if improvement > 0.0 && improvement < self.loss_tolerance {
                break;
            }
        }

        Ok((triplet.u.learning_rate, triplet.u.loss))
    }
}

/// Golden-section point inside the larger half of the bracket.
pub fn golden_section_learning_rate(triplet: &Triplet) -> f64 {
    let (a, u, b) = (
        triplet.a.learning_rate,
        triplet.u.learning_rate,
        triplet.b.learning_rate,
    );
    if u - a > b - u {
        u - GOLDEN_SECTION * (u - a)
    } else {
        u + GOLDEN_SECTION * (b - u)
    }
}

/// Minimum of the parabola through the triplet, falling back to golden section
/// when it is degenerate or outside the bracket.
pub fn brent_method_learning_rate(triplet: &Triplet) -> f64 {
    let (a, u, b) = (triplet.a, triplet.u, triplet.b);
    let (x_a, x_u, x_b) = (a.learning_rate, u.learning_rate, b.learning_rate);

    let numerator = (x_u - x_a).powi(2) * (u.loss - b.loss) - (x_u - x_b).powi(2) * (u.loss - a.loss);
    let denominator = (x_u - x_a) * (u.loss - b.loss) - (x_u - x_b) * (u.loss - a.loss);

    if denominator.abs() < f64::MIN_POSITIVE || !b.loss.is_finite() {
        return golden_section_learning_rate(triplet);
    }

    let parabola = x_u - 0.5 * numerator / denominator;
    let minimum_step = 1e-3 * (x_b - x_a);
    if !parabola.is_finite()
        || parabola <= x_a
        || parabola >= x_b
        || (parabola - x_u).abs() < minimum_step
    {
        golden_section_learning_rate(triplet)
    } else {
        parabola
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    /// f(p) = (p0 - 3)², evaluated through the loss boundary.
    struct Parabola {
        parameters: Array1<f64>,
    }

    impl LossIndex for Parabola {
        fn parameters_number(&self) -> usize {
            1
        }
        fn parameters(&self) -> Array1<f64> {
            self.parameters.clone()
        }
        fn set_parameters(&mut self, parameters: &ArrayView1<f64>) -> Result<()> {
            self.parameters = parameters.to_owned();
            Ok(())
        }
        fn loss(&mut self, parameters: &ArrayView1<f64>) -> Result<f64> {
            Ok((parameters[0] - 3.0).powi(2))
        }
        fn loss_and_gradient(&mut self, parameters: &ArrayView1<f64>) -> Result<(f64, Array1<f64>)> {
            Ok((self.loss(parameters)?, array![2.0 * (parameters[0] - 3.0)]))
        }
        fn squared_errors(&mut self, parameters: &ArrayView1<f64>) -> Result<Array1<f64>> {
            Ok(array![parameters[0] - 3.0])
        }
        fn squared_errors_jacobian(&mut self, _parameters: &ArrayView1<f64>) -> Result<Array2<f64>> {
            Ok(array![[1.0]])
        }
        fn selection_error(&mut self, _parameters: &ArrayView1<f64>) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    fn parabola() -> Parabola {
        Parabola {
            parameters: array![0.0],
        }
    }

    #[test]
    fn test_both_methods_find_minimum() {
        for method in [LearningRateMethod::GoldenSection, LearningRateMethod::BrentMethod] {
            let mut algorithm = LearningRateAlgorithm::new(method);
            algorithm.set_learning_rate_tolerance(1e-6);
            let (learning_rate, loss) = algorithm
                .calculate_directional_point(&mut parabola(), &array![0.0].view(), 9.0, &array![1.0].view(), 0.01)
                .unwrap();
            assert_abs_diff_eq!(learning_rate, 3.0, epsilon = 1e-3);
            assert!(loss < 1e-5);
        }
    }

    #[test]
    fn test_ascent_direction_returns_zero() {
        let algorithm = LearningRateAlgorithm::default();
        let (learning_rate, loss) = algorithm
            .calculate_directional_point(&mut parabola(), &array![0.0].view(), 9.0, &array![-1.0].view(), 0.01)
            .unwrap();
        assert_eq!(learning_rate, 0.0);
        assert_eq!(loss, 9.0);
    }

    #[test]
    fn test_contraction_when_first_step_overshoots() {
        let algorithm = LearningRateAlgorithm::default();
        let triplet = algorithm
            .calculate_bracketing_triplet(&mut parabola(), &array![0.0].view(), 9.0, &array![1.0].view(), 100.0)
            .unwrap()
            .unwrap();
        assert!(triplet.a.learning_rate < triplet.u.learning_rate);
        assert!(triplet.u.learning_rate < triplet.b.learning_rate);
        assert!(triplet.u.loss < triplet.a.loss);
        assert!(triplet.u.loss <= triplet.b.loss);
    }

    #[test]
    fn test_method_names() {
        assert_eq!(
            "GoldenSection".parse::<LearningRateMethod>().unwrap(),
            LearningRateMethod::GoldenSection
        );
        assert!(matches!(
            "Bisection".parse::<LearningRateMethod>(),
            Err(Error::UnknownLearningRateMethod(_))
        ));
    }
}
