// src/spectral.rs

use log::{debug, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, RobustPcaError};
use crate::linalg_backends::{BackendSVD, NdarrayLinAlgBackend};

/// Eigenstructure of the subset covariance (or correlation) matrix.
#[derive(Debug, Clone)]
pub struct SpectralDecomposition {
    /// v x v covariance of the subset rows of Z, divisor `nbsb - 1`.
    pub covariance: Array2<f64>,
    /// All v eigenvalues, descending and non-negative.
    pub eigenvalues: Array1<f64>,
    /// v x v orthonormal matrix; column i pairs with `eigenvalues[i]`.
    pub eigenvectors: Array2<f64>,
    /// Number of observations the decomposition was fitted on.
    pub n_subset: usize,
}

/// Decomposes the subset rows of `z` via SVD of `z_subset / sqrt(nbsb - 1)`.
///
/// The eigenvalues are the squared singular values. When the subset holds no
/// more rows than variables, the trailing eigenvalues are zero and the SVD
/// still supplies a complete orthonormal basis. Each eigenvector is oriented
/// so that its largest-magnitude coefficient is positive.
pub fn decompose(z: ArrayView2<f64>, mask: ArrayView1<bool>) -> Result<SpectralDecomposition> {
    decompose_with_backend(&NdarrayLinAlgBackend, z, mask)
}

pub fn decompose_with_backend<B: BackendSVD>(
    backend: &B,
    z: ArrayView2<f64>,
    mask: ArrayView1<bool>,
) -> Result<SpectralDecomposition> {
    let (n_rows, n_vars) = z.dim();
    if mask.len() != n_rows {
        return Err(RobustPcaError::DimensionMismatch(format!(
            "subset mask has length {} for {} rows",
            mask.len(),
            n_rows
        )));
    }
    let subset_rows: Vec<usize> = (0..n_rows).filter(|&i| mask[i]).collect();
    let nbsb = subset_rows.len();
    if nbsb < 2 {
        return Err(RobustPcaError::SubsetTooSmall {
            selected: nbsb,
            required: 2,
        });
    }
    if nbsb <= n_vars {
        warn!(
            "Fitting subset has {} observations for {} variables; trailing eigenvalues are zero.",
            nbsb, n_vars
        );
    }

    let divisor = (nbsb - 1) as f64;
    let zs = z.select(Axis(0), &subset_rows);
    // No-op for Z centered on the subset mean; keeps R a covariance for any Z.
    let subset_mean = zs
        .mean_axis(Axis(0))
        .ok_or_else(|| RobustPcaError::DegenerateInput("empty fitting subset".to_string()))?;
    let centered = &zs - &subset_mean;
    let covariance = centered.t().dot(&centered) / divisor;

    let scaled = centered / divisor.sqrt();
    let svd = backend.svd_into(scaled, false, true)?;
    let vt = svd
        .vt
        .ok_or_else(|| RobustPcaError::Linalg("SVD did not return right singular vectors".to_string()))?;
    if vt.dim() != (n_vars, n_vars) {
        return Err(RobustPcaError::Linalg(format!(
            "expected a {} x {} right singular basis, got {:?}",
            n_vars,
            n_vars,
            vt.dim()
        )));
    }

    let mut eigenvalues = Array1::<f64>::zeros(n_vars);
    let n_sv = svd.s.len().min(n_vars);
    eigenvalues
        .slice_mut(s![..n_sv])
        .assign(&svd.s.slice(s![..n_sv]).mapv(|sv| sv * sv));

    let mut eigenvectors = vt.reversed_axes();
    orient_columns(&mut eigenvectors);

    debug!(
        "Spectral decomposition on {} rows: leading eigenvalues {:?}",
        nbsb,
        eigenvalues.slice(s![..n_vars.min(3)]).to_vec()
    );

    Ok(SpectralDecomposition {
        covariance,
        eigenvalues,
        eigenvectors,
        n_subset: nbsb,
    })
}

/// Flips each column so that its largest-magnitude entry is positive.
fn orient_columns(vectors: &mut Array2<f64>) {
    for mut column in vectors.columns_mut() {
        let pivot = column
            .iter()
            .cloned()
            .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            column.mapv_inplace(|x| -x);
        }
    }
}
