//! Execution context for tensor operations.
//!
//! A [`Device`] is either sequential or backed by a fixed-size rayon thread
//! pool. Every contraction, elementwise transform and reduction issued through
//! it is a fork-join operation on that pool; nothing outlives the call.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};

/// Sequential or thread-pool execution context.
///
/// Cloning a device is cheap: clones share the same pool.
///
/// # Example
///
/// ```
/// use rust_quasi_newton::utils::Device;
/// use ndarray::array;
///
/// let device = Device::with_threads(2).unwrap();
/// let a = array![[1.0, 2.0], [3.0, 4.0]];
/// let b = array![[1.0, 0.0], [0.0, 1.0]];
/// assert_eq!(device.matmul(&a.view(), &b.view()).unwrap(), a);
/// ```
#[derive(Clone, Default)]
pub struct Device {
    pool: Option<Arc<ThreadPool>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("threads", &self.threads())
            .finish()
    }
}

impl Device {
    /// Runs everything on the calling thread.
    pub fn sequential() -> Self {
        Self { pool: None }
    }

    /// Builds a dedicated pool with `threads` workers. Zero workers is rejected.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidParameter(
                "device needs at least one worker thread".into(),
            ));
        }
        let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Number of worker threads (1 for a sequential device).
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |pool| pool.current_num_threads())
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Matrix product `a · b`.
    pub fn matmul(&self, a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Result<Array2<f64>> {
        if a.ncols() != b.nrows() {
            return Err(Error::dimension(
                "matmul inner dimensions",
                format!("{} rows", a.ncols()),
                format!("{} rows", b.nrows()),
            ));
        }
        Ok(match &self.pool {
            None => a.dot(b),
            Some(pool) => {
                let mut product = Array2::zeros((a.nrows(), b.ncols()));
                pool.install(|| {
                    Zip::from(product.rows_mut())
                        .and(a.rows())
                        .par_for_each(|mut row, a_row| row.assign(&a_row.dot(b)));
                });
                product
            }
        })
    }

    /// Matrix-vector product `m · v`.
    pub fn matvec(&self, m: &ArrayView2<f64>, v: &ArrayView1<f64>) -> Result<Array1<f64>> {
        if m.ncols() != v.len() {
            return Err(Error::dimension(
                "matvec inner dimensions",
                format!("{} entries", m.ncols()),
                format!("{} entries", v.len()),
            ));
        }
        Ok(match &self.pool {
            None => m.dot(v),
            Some(pool) => {
                let mut product = Array1::zeros(m.nrows());
                pool.install(|| {
                    Zip::from(&mut product)
                        .and(m.rows())
                        .par_for_each(|value, row| *value = row.dot(v));
                });
                product
            }
        })
    }

    /// Elementwise (Hadamard) product.
    pub fn hadamard(&self, a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Array2<f64> {
        debug_assert_eq!(a.dim(), b.dim(), "hadamard shapes");
        match &self.pool {
            None => a * b,
            Some(pool) => {
                let mut product = Array2::zeros(a.raw_dim());
                pool.install(|| {
                    Zip::from(&mut product)
                        .and(a)
                        .and(b)
                        .par_for_each(|value, &x, &y| *value = x * y);
                });
                product
            }
        }
    }

    /// Column sums (reduction over the sample axis).
    pub fn sum_rows(&self, a: &ArrayView2<f64>) -> Array1<f64> {
        let mut sums = Array1::zeros(a.ncols());
        match &self.pool {
            None => Zip::from(&mut sums)
                .and(a.columns())
                .for_each(|sum, column| *sum = column.sum()),
            Some(pool) => pool.install(|| {
                Zip::from(&mut sums)
                    .and(a.columns())
                    .par_for_each(|sum, column| *sum = column.sum())
            }),
        }
        sums
    }

    /// `Σ f(v_i)` over a vector.
    pub fn sum_map<F>(&self, v: &ArrayView1<f64>, f: F) -> f64
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        match (&self.pool, v.as_slice()) {
            (Some(pool), Some(slice)) => pool.install(|| slice.par_iter().map(|&x| f(x)).sum()),
            _ => v.iter().map(|&x| f(x)).sum(),
        }
    }

    /// Writes `f(input)` into `output` elementwise.
    pub fn map_into<F>(&self, input: &ArrayView2<f64>, output: &mut Array2<f64>, f: F)
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        debug_assert_eq!(input.dim(), output.dim(), "map shapes");
        match &self.pool {
            None => Zip::from(output).and(input).for_each(|out, &x| *out = f(x)),
            Some(pool) => pool.install(|| {
                Zip::from(output)
                    .and(input)
                    .par_for_each(|out, &x| *out = f(x))
            }),
        }
    }

    /// Writes both halves of `f(input)` into two outputs in a single pass.
    pub fn map_pair_into<F>(
        &self,
        input: &ArrayView2<f64>,
        first: &mut Array2<f64>,
        second: &mut Array2<f64>,
        f: F,
    ) where
        F: Fn(f64) -> (f64, f64) + Sync + Send,
    {
        debug_assert_eq!(input.dim(), first.dim(), "map shapes");
        debug_assert_eq!(input.dim(), second.dim(), "map shapes");
        let apply = |a: &mut f64, b: &mut f64, &x: &f64| {
            let (value, other) = f(x);
            *a = value;
            *b = other;
        };
        match &self.pool {
            None => Zip::from(first).and(second).and(input).for_each(apply),
            Some(pool) => pool.install(|| Zip::from(first).and(second).and(input).par_for_each(apply)),
        }
    }

    /// Outer product `u ⊗ v`.
    pub fn outer(&self, u: &ArrayView1<f64>, v: &ArrayView1<f64>) -> Array2<f64> {
        let mut product = Array2::zeros((u.len(), v.len()));
        match &self.pool {
            None => Zip::from(product.rows_mut())
                .and(u)
                .for_each(|mut row, &x| row.assign(&v.mapv(|y| x * y))),
            Some(pool) => pool.install(|| {
                Zip::from(product.rows_mut())
                    .and(u)
                    .par_for_each(|mut row, &x| row.assign(&v.mapv(|y| x * y)))
            }),
        }
        product
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sequential_and_parallel_matmul_agree() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let b = array![[1.0, -1.0], [0.5, 2.0], [0.0, 1.0]];
        let sequential = Device::sequential().matmul(&a.view(), &b.view()).unwrap();
        let parallel = Device::with_threads(3)
            .unwrap()
            .matmul(&a.view(), &b.view())
            .unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(sequential, array![[2.0, 6.0], [6.5, 12.0]]);
    }

    #[test]
    fn test_sum_rows() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        for device in [Device::sequential(), Device::with_threads(2).unwrap()] {
            assert_eq!(device.sum_rows(&a.view()), array![9.0, 12.0]);
        }
    }

    #[test]
    fn test_map_pair_into_writes_both_outputs() {
        let input = array![[1.0, -2.0]];
        let mut doubled = Array2::zeros((1, 2));
        let mut squared = Array2::zeros((1, 2));
        Device::with_threads(2)
            .unwrap()
            .map_pair_into(&input.view(), &mut doubled, &mut squared, |x| (2.0 * x, x * x));
        assert_eq!(doubled, array![[2.0, -4.0]]);
        assert_eq!(squared, array![[1.0, 4.0]]);
    }

    #[test]
    fn test_outer_and_matvec() {
        let device = Device::sequential();
        let u = array![1.0, 2.0];
        let v = array![3.0, 4.0, 5.0];
        let outer = device.outer(&u.view(), &v.view());
        assert_eq!(outer, array![[3.0, 4.0, 5.0], [6.0, 8.0, 10.0]]);
        let product = device
            .matvec(&outer.view(), &array![1.0, 0.0, 1.0].view())
            .unwrap();
        assert_eq!(product, array![8.0, 16.0]);
    }

    #[test]
    fn test_inner_dimension_mismatch_is_an_error() {
        let m = array![[1.0, 2.0], [3.0, 4.0]];
        for device in [Device::sequential(), Device::with_threads(2).unwrap()] {
            let err = device.matvec(&m.view(), &array![1.0].view()).unwrap_err();
            assert!(err.is_dimension_mismatch());
            let err = device
                .matmul(&m.view(), &array![[1.0, 2.0]].view())
                .unwrap_err();
            assert!(err.is_dimension_mismatch());
        }
    }

    #[test]
    fn test_threads_reported() {
        assert_eq!(Device::sequential().threads(), 1);
        assert!(!Device::default().is_parallel());
        assert_eq!(Device::with_threads(2).unwrap().threads(), 2);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = Device::with_threads(0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}
