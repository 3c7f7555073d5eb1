// src/projection.rs

use log::debug;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, RobustPcaError};

/// Retained eigenvalues at or below this fraction of the leading one are treated as zero.
const EIGENVALUE_FLOOR: f64 = 1e-12;

/// Everything derived from projecting Z onto the first k eigenvectors.
#[derive(Debug, Clone)]
pub struct Projection {
    /// n x k.
    pub scores: Array2<f64>,
    /// v x k variable-component correlations.
    pub loadings: Array2<f64>,
    /// v x (2k - 1): squared loadings, then cumulative sums over 1..=2, ..., 1..=k.
    pub communalities: Array2<f64>,
    /// Length n.
    pub orthogonal_distance: Array1<f64>,
    /// Length n.
    pub score_distance: Array1<f64>,
}

/// Checks that every retained eigenvalue is usable as a divisor.
pub fn check_retained_eigenvalues(eigenvalues: ArrayView1<f64>) -> Result<()> {
    let leading = eigenvalues.get(0).copied().unwrap_or(0.0);
    if !(leading > 0.0) {
        return Err(RobustPcaError::DegenerateInput(
            "the leading eigenvalue is zero".to_string(),
        ));
    }
    if let Some(i) = eigenvalues.iter().position(|&l| !(l > EIGENVALUE_FLOOR * leading)) {
        return Err(RobustPcaError::DegenerateInput(format!(
            "retained component {} has a numerically zero eigenvalue; retain fewer components",
            i + 1
        )));
    }
    Ok(())
}

/// Scores of every row of `z` on the eigenvectors in `rotation` (v x k).
pub fn project_scores(z: ArrayView2<f64>, rotation: ArrayView2<f64>) -> Array2<f64> {
    z.dot(&rotation)
}

/// Euclidean norm of each row of `z - scores * rotation^T`.
pub fn orthogonal_distances(z: ArrayView2<f64>, scores: ArrayView2<f64>, rotation: ArrayView2<f64>) -> Array1<f64> {
    let residual = &z - &scores.dot(&rotation.t());
    residual.map_axis(Axis(1), |row| row.dot(&row).sqrt())
}

/// `sqrt(sum_j score_ij^2 / lambda_j)` for each row.
pub fn score_distances(scores: ArrayView2<f64>, eigenvalues: ArrayView1<f64>) -> Array1<f64> {
    let normalized = &scores / &eigenvalues.mapv(f64::sqrt);
    normalized.map_axis(Axis(1), |row| row.dot(&row).sqrt())
}

/// `V_k * sqrt(La) / sigma_j` with `sigma_j = sqrt(R_jj)`.
pub fn loadings(rotation: ArrayView2<f64>, eigenvalues: ArrayView1<f64>, covariance: ArrayView2<f64>) -> Result<Array2<f64>> {
    let sigma = covariance.diag().mapv(f64::sqrt);
    if let Some(j) = sigma.iter().position(|&s| !(s > 0.0) || !s.is_finite()) {
        return Err(RobustPcaError::ZeroVariance { column: j });
    }
    let scaled = &rotation * &eigenvalues.mapv(f64::sqrt);
    Ok(&scaled / &sigma.insert_axis(Axis(1)))
}

/// Squared loadings for each component followed by k - 1 cumulative columns.
pub fn communalities(loadings: ArrayView2<f64>) -> Array2<f64> {
    let (n_vars, k) = loadings.dim();
    let width = if k > 1 { 2 * k - 1 } else { k };
    let mut out = Array2::<f64>::zeros((n_vars, width));
    let squared = loadings.mapv(|l| l * l);
    out.slice_mut(s![.., ..k]).assign(&squared);
    let mut running = squared.column(0).to_owned();
    for i in 1..k {
        running += &squared.column(i);
        out.column_mut(k + i - 1).assign(&running);
    }
    out
}

/// Projects `z` on the first `k` eigenvectors and derives all diagnostics.
pub fn project(
    z: ArrayView2<f64>,
    eigenvectors: ArrayView2<f64>,
    eigenvalues: ArrayView1<f64>,
    covariance: ArrayView2<f64>,
    k: usize,
) -> Result<Projection> {
    let n_vars = eigenvectors.nrows();
    if k == 0 || k > eigenvectors.ncols() || k > eigenvalues.len() {
        return Err(RobustPcaError::InvalidOption {
            option: "NumComponents",
            reason: format!("{} is outside 1..={}", k, eigenvectors.ncols()),
        });
    }
    if z.ncols() != n_vars || covariance.dim() != (n_vars, n_vars) {
        return Err(RobustPcaError::DimensionMismatch(format!(
            "data has {} variables, eigenvectors {}, covariance {:?}",
            z.ncols(),
            n_vars,
            covariance.dim()
        )));
    }

    let rotation = eigenvectors.slice(s![.., ..k]);
    let retained = eigenvalues.slice(s![..k]);
    check_retained_eigenvalues(retained)?;

    let scores = project_scores(z, rotation);
    let loadings = loadings(rotation, retained, covariance)?;
    let communalities = communalities(loadings.view());
    let orthogonal_distance = orthogonal_distances(z, scores.view(), rotation);
    let score_distance = score_distances(scores.view(), retained);

    debug!(
        "Projected {} observations on {} components; max orthogonal distance {:.4}",
        z.nrows(),
        k,
        orthogonal_distance.iter().cloned().fold(0.0_f64, f64::max)
    );

    Ok(Projection {
        scores,
        loadings,
        communalities,
        orthogonal_distance,
        score_distance,
    })
}
