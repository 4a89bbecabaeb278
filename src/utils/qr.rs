//! Householder QR decomposition.
//!
//! Factorizes `A = Q·R` with Householder reflections stored below the
//! diagonal of a working copy of `A`. Used for dense linear solves and
//! least-squares problems.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};

/// QR factorization of an `m × n` matrix.
#[derive(Debug, Clone)]
pub struct HouseholderQr {
    /// Householder vectors below the diagonal, R above it.
    qr: Array2<f64>,
    /// Diagonal of R.
    r_diag: Vec<f64>,
    /// Whether column `k` produced a reflection (false for null columns).
    reflected: Vec<bool>,
}

impl HouseholderQr {
    pub fn new(a: &ArrayView2<f64>) -> Self {
        let (m, n) = a.dim();
        let mut qr = a.to_owned();
        let steps = m.min(n);
        let mut r_diag = Vec::with_capacity(steps);
        let mut reflected = Vec::with_capacity(steps);

        for k in 0..steps {
            let mut norm = (k..m).map(|i| qr[[i, k]] * qr[[i, k]]).sum::<f64>().sqrt();

            if norm > f64::EPSILON {
                if qr[[k, k]] > 0.0 {
                    norm = -norm;
                }

                for i in k..m {
                    qr[[i, k]] /= -norm;
                }
                qr[[k, k]] += 1.0;

                for j in (k + 1)..n {
                    let mut s = (k..m).map(|i| qr[[i, k]] * qr[[i, j]]).sum::<f64>();
                    s = -s / qr[[k, k]];
                    for i in k..m {
                        qr[[i, j]] += s * qr[[i, k]];
                    }
                }
                reflected.push(true);
            } else {
                reflected.push(false);
            }

            r_diag.push(norm);
        }

        Self {
            qr,
            r_diag,
            reflected,
        }
    }

    /// Upper-triangular factor (`min(m, n) × n`).
    pub fn r(&self) -> Array2<f64> {
        let (m, n) = self.qr.dim();
        let k = m.min(n);
        Array2::from_shape_fn((k, n), |(i, j)| {
            if i == j {
                self.r_diag[i]
            } else if j > i {
                self.qr[[i, j]]
            } else {
                0.0
            }
        })
    }

    /// Thin orthogonal factor (`m × min(m, n)`).
    pub fn q(&self) -> Array2<f64> {
        let (m, n) = self.qr.dim();
        let k = m.min(n);
        let mut q = Array2::<f64>::eye(m);

        for j in (0..k).rev() {
            if !self.reflected[j] {
                continue;
            }
            for col in j..m {
                let mut s = (j..m).map(|i| self.qr[[i, j]] * q[[i, col]]).sum::<f64>();
                s = -s / self.qr[[j, j]];
                for i in j..m {
                    q[[i, col]] += s * self.qr[[i, j]];
                }
            }
        }

        q.slice(ndarray::s![.., ..k]).to_owned()
    }

    /// Least-squares solution of `min ‖A·x − b‖`.
    ///
    /// Components along numerically null columns of R are set to zero.
    pub fn solve(&self, b: &ArrayView1<f64>) -> Result<Array1<f64>> {
        let (m, n) = self.qr.dim();
        if b.len() != m {
            return Err(Error::dimension("QR solve right-hand side", m, b.len()));
        }

        let mut x = b.to_owned();
        for k in 0..n.min(m) {
            if !self.reflected[k] {
                continue;
            }
            let mut s = (k..m).map(|i| self.qr[[i, k]] * x[i]).sum::<f64>();
            s = -s / self.qr[[k, k]];
            for i in k..m {
                x[i] += s * self.qr[[i, k]];
            }
        }

        let mut solution = Array1::zeros(n);
        for i in (0..n.min(m)).rev() {
            let mut sum = x[i];
            for j in (i + 1)..n {
                sum -= self.qr[[i, j]] * solution[j];
            }
            solution[i] = if self.r_diag[i].abs() < f64::EPSILON {
                0.0
            } else {
                sum / self.r_diag[i]
            };
        }

        Ok(solution)
    }
}
