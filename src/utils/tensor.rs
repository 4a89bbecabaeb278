//! Tensor utilities shared by layers, losses and optimizers.
//!
//! Pure functions over `ndarray` vectors and matrices: norms with their
//! gradients and Hessians, outer products, a QR-based linear solve, submatrix
//! extraction, comparison predicates and shape guards.
//!
//! Degenerate inputs (empty vectors, zero norms) are valid and never raise.
//! Only shape mismatches are reported as errors.

use ndarray::{Array1, Array2, ArrayView, ArrayView1, ArrayView2, Dimension};

use crate::error::{Error, Result};
use crate::utils::device::Device;
use crate::utils::qr::HouseholderQr;

/// Smallest magnitude treated as non-zero by [`is_zero`].
pub const NUMERIC_LIMITS_MIN: f64 = f64::MIN_POSITIVE;

/// Scales every column `j` of `matrix` by `vector[j]`.
pub fn multiply_rows(matrix: &mut Array2<f64>, vector: &ArrayView1<f64>) -> Result<()> {
    check_size(vector, matrix.ncols(), "multiply_rows")?;
    for mut row in matrix.rows_mut() {
        row *= vector;
    }
    Ok(())
}

/// Divides every row `i` of `matrix` by `vector[i]`; zero divisors leave the row untouched.
pub fn divide_columns(matrix: &mut Array2<f64>, vector: &ArrayView1<f64>) -> Result<()> {
    check_size(vector, matrix.nrows(), "divide_columns")?;
    for (mut row, &divisor) in matrix.rows_mut().into_iter().zip(vector.iter()) {
        let divisor = if divisor == 0.0 { 1.0 } else { divisor };
        row /= divisor;
    }
    Ok(())
}

pub fn is_zero(vector: &ArrayView1<f64>) -> bool {
    is_zero_with_limit(vector, NUMERIC_LIMITS_MIN)
}

pub fn is_zero_with_limit(vector: &ArrayView1<f64>, limit: f64) -> bool {
    vector.iter().all(|value| value.abs() <= limit)
}

pub fn is_false(values: &[bool]) -> bool {
    values.iter().all(|value| !value)
}

/// True when every entry is exactly 0 or 1.
pub fn is_binary(matrix: &ArrayView2<f64>) -> bool {
    matrix.iter().all(|&value| value == 0.0 || value == 1.0)
}

/// True when every entry equals the first one. Empty vectors are constant.
pub fn is_constant(vector: &ArrayView1<f64>) -> bool {
    match vector.first() {
        Some(&first) => vector.iter().all(|&value| value == first),
        None => true,
    }
}

/// True when every entry of `matrix` is within `tolerance` of `value`.
pub fn is_equal(matrix: &ArrayView2<f64>, value: f64, tolerance: f64) -> bool {
    matrix.iter().all(|&entry| (entry - value).abs() <= tolerance)
}

/// Elementwise comparison of two tensors of the same shape.
pub fn are_equal<D: Dimension>(
    a: &ArrayView<f64, D>,
    b: &ArrayView<f64, D>,
    tolerance: f64,
) -> Result<bool> {
    if a.shape() != b.shape() {
        return Err(Error::dimension(
            "are_equal",
            format!("{:?}", a.shape()),
            format!("{:?}", b.shape()),
        ));
    }
    Ok(a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance))
}

pub fn count_nan(vector: &ArrayView1<f64>) -> usize {
    vector.iter().filter(|value| value.is_nan()).count()
}

/// Outer product `u ⊗ v` (`u.len() × v.len()`).
pub fn kronecker_product(u: &ArrayView1<f64>, v: &ArrayView1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((u.len(), v.len()), |(i, j)| u[i] * v[j])
}

pub fn l1_norm(device: &Device, vector: &ArrayView1<f64>) -> f64 {
    device.sum_map(vector, f64::abs)
}

/// Sign of each entry, with `sign(0) = 0`.
pub fn l1_norm_gradient(vector: &ArrayView1<f64>) -> Array1<f64> {
    vector.mapv(|value| {
        if value > 0.0 {
            1.0
        } else if value < 0.0 {
            -1.0
        } else {
            0.0
        }
    })
}

pub fn l1_norm_hessian(vector: &ArrayView1<f64>) -> Array2<f64> {
    Array2::zeros((vector.len(), vector.len()))
}

pub fn l2_norm(device: &Device, vector: &ArrayView1<f64>) -> f64 {
    device.sum_map(vector, |value| value * value).sqrt()
}

/// `v / ‖v‖`, or zeros when the norm vanishes.
pub fn l2_norm_gradient(device: &Device, vector: &ArrayView1<f64>) -> Array1<f64> {
    let norm = l2_norm(device, vector);
    if norm < NUMERIC_LIMITS_MIN {
        return Array1::zeros(vector.len());
    }
    vector / norm
}

/// `(I − v·vᵀ/‖v‖²) / ‖v‖`, or the zero matrix when the norm vanishes.
pub fn l2_norm_hessian(device: &Device, vector: &ArrayView1<f64>) -> Array2<f64> {
    let n = vector.len();
    let norm = l2_norm(device, vector);
    if norm < NUMERIC_LIMITS_MIN {
        return Array2::zeros((n, n));
    }
    let mut hessian = device.outer(vector, vector);
    hessian /= -(norm * norm * norm);
    sum_diagonal(&mut hessian, 1.0 / norm);
    hessian
}

/// Adds `value` to every diagonal entry.
pub fn sum_diagonal(matrix: &mut Array2<f64>, value: f64) {
    for entry in matrix.diag_mut() {
        *entry += value;
    }
}

/// Solves the square system `A·x = b` through a Householder QR factorization.
pub fn perform_householder_qr_decomposition(
    a: &ArrayView2<f64>,
    b: &ArrayView1<f64>,
) -> Result<Array1<f64>> {
    if a.nrows() != a.ncols() {
        return Err(Error::dimension(
            "perform_householder_qr_decomposition",
            "square matrix",
            format!("{}x{}", a.nrows(), a.ncols()),
        ));
    }
    HouseholderQr::new(a).solve(b)
}

/// Gathers `matrix[rows[i], columns[j]]` into a new `rows.len() × columns.len()` matrix.
pub fn fill_submatrix(
    matrix: &ArrayView2<f64>,
    rows: &[usize],
    columns: &[usize],
) -> Result<Array2<f64>> {
    if let Some(&row) = rows.iter().find(|&&row| row >= matrix.nrows()) {
        return Err(Error::dimension(
            "fill_submatrix row index",
            format!("< {}", matrix.nrows()),
            row,
        ));
    }
    if let Some(&column) = columns.iter().find(|&&column| column >= matrix.ncols()) {
        return Err(Error::dimension(
            "fill_submatrix column index",
            format!("< {}", matrix.ncols()),
            column,
        ));
    }
    Ok(Array2::from_shape_fn((rows.len(), columns.len()), |(i, j)| {
        matrix[[rows[i], columns[j]]]
    }))
}

pub fn check_size(vector: &ArrayView1<f64>, size: usize, context: &str) -> Result<()> {
    if vector.len() != size {
        return Err(Error::dimension(
            context,
            format!("size {}", size),
            format!("size {}", vector.len()),
        ));
    }
    Ok(())
}

pub fn check_dimensions(
    matrix: &ArrayView2<f64>,
    rows_number: usize,
    columns_number: usize,
    context: &str,
) -> Result<()> {
    if matrix.dim() != (rows_number, columns_number) {
        return Err(Error::dimension(
            context,
            format!("{}x{}", rows_number, columns_number),
            format!("{}x{}", matrix.nrows(), matrix.ncols()),
        ));
    }
    Ok(())
}

pub fn check_columns_number(
    matrix: &ArrayView2<f64>,
    columns_number: usize,
    context: &str,
) -> Result<()> {
    if matrix.ncols() != columns_number {
        return Err(Error::dimension(
            context,
            format!("{} columns", columns_number),
            format!("{} columns", matrix.ncols()),
        ));
    }
    Ok(())
}
