//! Dense (fully connected) kernels shared by perceptron and probabilistic layers
//!
//! Both layer kinds compute `combinations = inputs × weights + biases`, store
//! their parameters in the same flat layout and turn a per-neuron error signal
//! into gradients and Jacobian blocks the same way. Those pieces live here.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ShapeBuilder};

use crate::error::{Error, Result};
use crate::utils::{Device, SimpleRng};

/// Bound of the uniform range used by random parameter initialization.
pub const PARAMETERS_RANDOM_RANGE: f64 = 0.2;

/// Fresh biases and synaptic weights sampled uniformly in `[-0.2, 0.2]`.
pub fn random_parameters(
    inputs_number: usize,
    neurons_number: usize,
    rng: &mut SimpleRng,
) -> (Array1<f64>, Array2<f64>) {
    let mut biases = Array1::zeros(neurons_number);
    let mut synaptic_weights = Array2::zeros((inputs_number, neurons_number));
    rng.fill_uniform(&mut biases, -PARAMETERS_RANDOM_RANGE, PARAMETERS_RANDOM_RANGE);
    rng.fill_uniform(
        &mut synaptic_weights,
        -PARAMETERS_RANDOM_RANGE,
        PARAMETERS_RANDOM_RANGE,
    );
    (biases, synaptic_weights)
}

/// Flattens parameters as `[biases, weights column-major]`.
///
/// The weight of input `i` into neuron `j` lands at `neurons + j * inputs + i`.
pub fn flatten_parameters(biases: &Array1<f64>, synaptic_weights: &Array2<f64>) -> Array1<f64> {
    biases
        .iter()
        .chain(synaptic_weights.t().iter())
        .copied()
        .collect()
}

/// Biases stored at the front of a layer's parameter block.
pub fn biases_from(parameters: &ArrayView1<f64>, neurons_number: usize) -> Result<Array1<f64>> {
    if parameters.len() < neurons_number {
        return Err(Error::dimension(
            "biases from parameters",
            format!("at least {} parameters", neurons_number),
            parameters.len(),
        ));
    }
    Ok(parameters.slice(s![..neurons_number]).to_owned())
}

/// Synaptic weights stored column-major after the biases.
pub fn synaptic_weights_from(
    parameters: &ArrayView1<f64>,
    inputs_number: usize,
    neurons_number: usize,
) -> Result<Array2<f64>> {
    let end = neurons_number + inputs_number * neurons_number;
    if parameters.len() < end {
        return Err(Error::dimension(
            "synaptic weights from parameters",
            format!("at least {} parameters", end),
            parameters.len(),
        ));
    }
    let values = parameters.slice(s![neurons_number..end]).to_vec();
    Array2::from_shape_vec((inputs_number, neurons_number).f(), values)
        .map_err(|e| Error::dimension("synaptic weights from parameters", end, e))
}

/// `combinations[s, j] = biases[j] + Σ_i inputs[s, i] · weights[i, j]`.
pub fn calculate_combinations(
    device: &Device,
    inputs: &ArrayView2<f64>,
    biases: &ArrayView1<f64>,
    synaptic_weights: &ArrayView2<f64>,
) -> Result<Array2<f64>> {
    if inputs.ncols() != synaptic_weights.nrows() {
        return Err(Error::dimension(
            "combinations inputs",
            format!("{} columns", synaptic_weights.nrows()),
            format!("{} columns", inputs.ncols()),
        ));
    }
    if biases.len() != synaptic_weights.ncols() {
        return Err(Error::dimension(
            "combinations biases",
            format!("{} biases", synaptic_weights.ncols()),
            format!("{} biases", biases.len()),
        ));
    }
    let mut combinations = device.matmul(inputs, synaptic_weights)?;
    combinations += biases;
    Ok(combinations)
}

/// Parameter gradients from the error signal at the combinations.
///
/// `biases_derivatives = Σ_samples error`, `weights_derivatives = inputsᵀ · error`.
pub fn calculate_parameters_gradient(
    device: &Device,
    inputs: &ArrayView2<f64>,
    error_combinations: &ArrayView2<f64>,
    biases_derivatives: &mut Array1<f64>,
    synaptic_weights_derivatives: &mut Array2<f64>,
) -> Result<()> {
    if inputs.nrows() != error_combinations.nrows() {
        return Err(Error::dimension(
            "error gradient inputs",
            format!("{} batch samples", error_combinations.nrows()),
            format!("{} batch samples", inputs.nrows()),
        ));
    }
    if synaptic_weights_derivatives.dim() != (inputs.ncols(), error_combinations.ncols())
        || biases_derivatives.len() != error_combinations.ncols()
    {
        return Err(Error::dimension(
            "error gradient buffers",
            format!("{}x{}", inputs.ncols(), error_combinations.ncols()),
            format!(
                "{}x{}",
                synaptic_weights_derivatives.nrows(),
                synaptic_weights_derivatives.ncols()
            ),
        ));
    }
    biases_derivatives.assign(&device.sum_rows(error_combinations));
    synaptic_weights_derivatives.assign(&device.matmul(&inputs.t(), error_combinations)?);
    Ok(())
}

/// Copies `[biases, weights column-major]` gradients into `gradient` at `index`.
pub fn insert_parameters_gradient(
    biases_derivatives: &Array1<f64>,
    synaptic_weights_derivatives: &Array2<f64>,
    index: usize,
    gradient: &mut Array1<f64>,
) -> Result<()> {
    let size = biases_derivatives.len() + synaptic_weights_derivatives.len();
    if index + size > gradient.len() {
        return Err(Error::dimension(
            "insert gradient",
            format!("at least {} entries", index + size),
            gradient.len(),
        ));
    }
    let block = flatten_parameters(biases_derivatives, synaptic_weights_derivatives);
    gradient.slice_mut(s![index..index + size]).assign(&block);
    Ok(())
}

/// Per-sample Jacobian of the squared errors with respect to this layer's parameters.
///
/// Bias column `j` holds `error[s, j]`; weight column `neurons + j * inputs + i`
/// holds `error[s, j] · inputs[s, i]`.
pub fn calculate_squared_errors_jacobian(
    inputs: &ArrayView2<f64>,
    error_combinations: &ArrayView2<f64>,
    jacobian: &mut Array2<f64>,
) -> Result<()> {
    let (batch_samples_number, inputs_number) = inputs.dim();
    let neurons_number = error_combinations.ncols();
    let parameters_number = neurons_number + inputs_number * neurons_number;

    if error_combinations.nrows() != batch_samples_number {
        return Err(Error::dimension(
            "squared errors jacobian inputs",
            format!("{} batch samples", error_combinations.nrows()),
            format!("{} batch samples", batch_samples_number),
        ));
    }
    if jacobian.dim() != (batch_samples_number, parameters_number) {
        return Err(Error::dimension(
            "squared errors jacobian",
            format!("{}x{}", batch_samples_number, parameters_number),
            format!("{}x{}", jacobian.nrows(), jacobian.ncols()),
        ));
    }

    for sample in 0..batch_samples_number {
        for neuron in 0..neurons_number {
            let error = error_combinations[[sample, neuron]];
            jacobian[[sample, neuron]] = error;
            let offset = neurons_number + neuron * inputs_number;
            for input in 0..inputs_number {
                jacobian[[sample, offset + input]] = error * inputs[[sample, input]];
            }
        }
    }
    Ok(())
}

/// Copies a layer Jacobian into the network Jacobian at column `index`.
pub fn insert_squared_errors_jacobian(
    layer_jacobian: &Array2<f64>,
    index: usize,
    jacobian: &mut Array2<f64>,
) -> Result<()> {
    let (rows, columns) = layer_jacobian.dim();
    if jacobian.nrows() != rows || index + columns > jacobian.ncols() {
        return Err(Error::dimension(
            "insert squared errors jacobian",
            format!("{}x{} at column {}", rows, columns, index),
            format!("{}x{}", jacobian.nrows(), jacobian.ncols()),
        ));
    }
    jacobian
        .slice_mut(s![.., index..index + columns])
        .assign(layer_jacobian);
    Ok(())
}
