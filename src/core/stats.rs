//! Channel statistics and principal component analysis
//!
//! Covariance is accumulated over valid pixels only and normalised by the
//! pixel count. Eigenpairs come from a cyclic Jacobi sweep on the symmetric
//! covariance matrix and are returned in descending eigenvalue order.

use crate::types::{ReflectaError, ReflectaResult};
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Eigenvector sign handling
///
/// Eigenvectors are only defined up to sign. `LargestLoadingPositive` flips
/// each vector so its largest-magnitude loading is positive; `Unpinned`
/// keeps whatever sign the solver produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignConvention {
    LargestLoadingPositive,
    Unpinned,
}

impl Default for SignConvention {
    fn default() -> Self {
        SignConvention::LargestLoadingPositive
    }
}

/// Mean and covariance of a multi-channel pixel population
#[derive(Debug, Clone)]
pub struct ChannelStatistics {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
    pub count: usize,
}

impl ChannelStatistics {
    /// Statistics of a (rows, cols, channels) cube over pixels where `valid` is set
    pub fn compute(cube: ArrayView3<f64>, valid: ArrayView2<bool>) -> ReflectaResult<Self> {
        let (rows, cols, n) = cube.dim();
        if valid.dim() != (rows, cols) {
            return Err(ReflectaError::Processing(format!(
                "Mask shape {:?} does not match cube {:?}",
                valid.dim(),
                (rows, cols)
            )));
        }

        let mut count = 0usize;
        let mut mean = Array1::<f64>::zeros(n);
        for ((r, c), _) in valid.indexed_iter().filter(|&(_, &ok)| ok) {
            count += 1;
            for k in 0..n {
                mean[k] += cube[[r, c, k]];
            }
        }

        let mut covariance = Array2::<f64>::zeros((n, n));
        if count == 0 {
            return Ok(Self { mean, covariance, count });
        }
        mean /= count as f64;

        let mut centred = vec![0.0; n];
        for ((r, c), _) in valid.indexed_iter().filter(|&(_, &ok)| ok) {
            for k in 0..n {
                centred[k] = cube[[r, c, k]] - mean[k];
            }
            for i in 0..n {
                for j in i..n {
                    covariance[[i, j]] += centred[i] * centred[j];
                }
            }
        }
        for i in 0..n {
            for j in i..n {
                covariance[[i, j]] /= count as f64;
                covariance[[j, i]] = covariance[[i, j]];
            }
        }

        Ok(Self { mean, covariance, count })
    }

    /// Per-channel population standard deviation
    pub fn std_dev(&self) -> Array1<f64> {
        self.covariance.diag().mapv(|v| v.max(0.0).sqrt())
    }
}

/// Eigen-decomposition of a symmetric matrix
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    /// Eigenvalues, descending
    pub values: Array1<f64>,
    /// Eigenvectors as columns, matching `values`
    pub vectors: Array2<f64>,
}

/// Cyclic Jacobi eigen-decomposition of a symmetric matrix
pub fn symmetric_eigen(matrix: &Array2<f64>, sign: SignConvention) -> ReflectaResult<EigenDecomposition> {
    let n = matrix.nrows();
    if n == 0 || matrix.ncols() != n {
        return Err(ReflectaError::Processing(format!(
            "Eigen-decomposition needs a square matrix, got {:?}",
            matrix.dim()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(ReflectaError::Processing("Covariance contains non-finite values".to_string()));
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().fold(0.0f64, |m, x| m.max(x.abs())).max(f64::MIN_POSITIVE);
    const MAX_SWEEPS: usize = 64;

    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[[i, j]] * a[[i, j]])
            .sum();
        if off.sqrt() <= 1e-15 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let cos = 1.0 / (t * t + 1.0).sqrt();
                let sin = t * cos;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = cos * akp - sin * akq;
                    a[[k, q]] = sin * akp + cos * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = cos * apk - sin * aqk;
                    a[[q, k]] = sin * apk + cos * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = cos * vkp - sin * vkq;
                    v[[k, q]] = sin * vkp + cos * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[[j, j]]
            .partial_cmp(&a[[i, i]])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(i.cmp(&j))
    });

    let values = Array1::from_iter(order.iter().map(|&i| a[[i, i]]));
    let mut vectors = v.select(Axis(1), &order);

    if sign == SignConvention::LargestLoadingPositive {
        for mut column in vectors.columns_mut() {
            let pivot = column
                .iter()
                .copied()
                .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
            if pivot < 0.0 {
                column.mapv_inplace(|x| -x);
            }
        }
    }

    Ok(EigenDecomposition { values, vectors })
}

/// Principal components of a pixel population
#[derive(Debug, Clone)]
pub struct PrincipalComponents {
    pub stats: ChannelStatistics,
    pub eigen: EigenDecomposition,
}

impl PrincipalComponents {
    pub fn fit(cube: ArrayView3<f64>, valid: ArrayView2<bool>, sign: SignConvention) -> ReflectaResult<Self> {
        let stats = ChannelStatistics::compute(cube, valid)?;
        if stats.count == 0 {
            return Err(ReflectaError::Processing("No valid pixels for PCA".to_string()));
        }
        let eigen = symmetric_eigen(&stats.covariance, sign)?;
        Ok(Self { stats, eigen })
    }

    /// Fraction of total variance carried by each component
    pub fn variance_explained(&self) -> Array1<f64> {
        let total: f64 = self.eigen.values.iter().map(|v| v.max(0.0)).sum();
        if total > 0.0 {
            self.eigen.values.mapv(|v| v.max(0.0) / total)
        } else {
            Array1::zeros(self.eigen.values.len())
        }
    }

    /// Project valid pixels onto the selected components; invalid pixels are NaN
    pub fn transform(
        &self,
        cube: ArrayView3<f64>,
        valid: ArrayView2<bool>,
        components: &[usize],
    ) -> ReflectaResult<Array3<f64>> {
        let (rows, cols, n) = cube.dim();
        if let Some(&bad) = components.iter().find(|&&c| c >= n) {
            return Err(ReflectaError::Configuration(format!(
                "Principal component {} requested from {} inputs",
                bad, n
            )));
        }

        let mut out = Array3::<f64>::from_elem((rows, cols, components.len()), f64::NAN);
        for ((r, c), _) in valid.indexed_iter().filter(|&(_, &ok)| ok) {
            for (slot, &comp) in components.iter().enumerate() {
                let mut projected = 0.0;
                for k in 0..n {
                    projected += (cube[[r, c, k]] - self.stats.mean[k]) * self.eigen.vectors[[k, comp]];
                }
                out[[r, c, slot]] = projected;
            }
        }
        Ok(out)
    }
}
