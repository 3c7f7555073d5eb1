// src/result.rs

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RobustPcaError};
use crate::projection::{orthogonal_distances, project_scores, score_distances};

/// The complete output of one robust PCA call.
///
/// Row-indexed fields (`scores`, distances, `subset_mask`) cover the finite
/// input rows listed in `kept_rows`, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustPcaResult {
    /// v x v covariance of the standardized subset (a correlation matrix when standardized).
    pub covariance: Array2<f64>,
    /// v x 3: eigenvalue, percent explained, cumulative percent.
    pub explained_variance: Array2<f64>,
    /// All v eigenvalues, descending.
    pub eigenvalues: Array1<f64>,
    /// v x k retained eigenvectors.
    pub eigenvectors: Array2<f64>,
    /// v x k variable-component correlations.
    pub loadings: Array2<f64>,
    /// n x k scores of every kept observation.
    pub scores: Array2<f64>,
    /// v x (2k - 1) individual and cumulative communalities.
    pub communalities: Array2<f64>,
    pub orthogonal_distance: Array1<f64>,
    pub score_distance: Array1<f64>,
    /// True for observations used to estimate center, scale and eigenstructure.
    pub subset_mask: Array1<bool>,
    /// False only for the classical, untrimmed fit.
    pub robust: bool,
    pub center: Array1<f64>,
    /// Subset standard deviations, or ones for a covariance fit.
    pub scale: Array1<f64>,
    pub standardized: bool,
    pub num_components: usize,
    /// Set when the automatic rule chose one component and two were retained instead.
    pub components_promoted: bool,
    /// Input row index of each output row.
    pub kept_rows: Vec<usize>,
    pub n_input_rows: usize,
}

/// Scores and distances of observations projected through a fitted result.
#[derive(Debug, Clone)]
pub struct ProjectedObservations {
    pub scores: Array2<f64>,
    pub orthogonal_distance: Array1<f64>,
    pub score_distance: Array1<f64>,
}

impl RobustPcaResult {
    pub fn n_variables(&self) -> usize {
        self.center.len()
    }

    /// Number of observations in the fitting subset.
    pub fn n_subset(&self) -> usize {
        self.subset_mask.iter().filter(|&&m| m).count()
    }

    /// Eigenvalues of the retained components.
    pub fn retained_eigenvalues(&self) -> ArrayView1<'_, f64> {
        self.eigenvalues.slice(s![..self.num_components])
    }

    /// Input row indices of observations left out of the fitting subset.
    pub fn excluded_rows(&self) -> Vec<usize> {
        self.kept_rows
            .iter()
            .zip(self.subset_mask.iter())
            .filter_map(|(&row, &m)| if m { None } else { Some(row) })
            .collect()
    }

    /// Projects new observations through the fitted center, scale and eigenvectors.
    ///
    /// # Errors
    /// `DimensionMismatch` when the column count differs from the fit, and
    /// `DegenerateInput` when `data` contains non-finite values.
    pub fn project(&self, data: ArrayView2<f64>) -> Result<ProjectedObservations> {
        if data.ncols() != self.n_variables() {
            return Err(RobustPcaError::DimensionMismatch(format!(
                "new data has {} variables, the fit has {}",
                data.ncols(),
                self.n_variables()
            )));
        }
        if data.iter().any(|x| !x.is_finite()) {
            return Err(RobustPcaError::DegenerateInput(
                "observations to project contain non-finite values".to_string(),
            ));
        }
        let z = (&data - &self.center) / &self.scale;
        let rotation = self.eigenvectors.view();
        let scores = project_scores(z.view(), rotation);
        let orthogonal_distance = orthogonal_distances(z.view(), scores.view(), rotation);
        let score_distance = score_distances(scores.view(), self.retained_eigenvalues());
        Ok(ProjectedObservations {
            scores,
            orthogonal_distance,
            score_distance,
        })
    }

    /// Saves the result to a file using bincode.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref()).map_err(|e| {
            RobustPcaError::Persistence(format!("failed to create file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| RobustPcaError::Persistence(format!("failed to serialize result: {}", e)))?;
        writer
            .flush()
            .map_err(|e| RobustPcaError::Persistence(format!("failed to flush model file: {}", e)))?;
        Ok(())
    }

    /// Loads a result written by [`RobustPcaResult::save_model`] and checks its internal consistency.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            RobustPcaError::Persistence(format!("failed to open file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut reader = BufReader::new(file);
        let result: RobustPcaResult =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| RobustPcaError::Persistence(format!("failed to deserialize result: {}", e)))?;
        result.validate()?;
        Ok(result)
    }

    /// Checks that all fields agree on n, v and k.
    pub fn validate(&self) -> Result<()> {
        let v = self.n_variables();
        let k = self.num_components;
        let n = self.kept_rows.len();
        let comm_width = if k > 1 { 2 * k - 1 } else { k };
        let checks = [
            ("scale", self.scale.len() == v),
            ("covariance", self.covariance.dim() == (v, v)),
            ("explained_variance", self.explained_variance.dim() == (v, 3)),
            ("eigenvalues", self.eigenvalues.len() == v),
            ("eigenvectors", self.eigenvectors.dim() == (v, k)),
            ("loadings", self.loadings.dim() == (v, k)),
            ("communalities", self.communalities.dim() == (v, comm_width)),
            ("scores", self.scores.dim() == (n, k)),
            ("orthogonal_distance", self.orthogonal_distance.len() == n),
            ("score_distance", self.score_distance.len() == n),
            ("subset_mask", self.subset_mask.len() == n),
            ("num_components", k >= 1 && k <= v),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(RobustPcaError::Persistence(format!(
                "inconsistent result: `{}` does not match n={}, v={}, k={}",
                field, n, v, k
            )));
        }
        if self.scale.iter().any(|&s| !s.is_finite() || s <= 0.0) {
            return Err(RobustPcaError::Persistence(
                "inconsistent result: scale contains non-positive values".to_string(),
            ));
        }
        Ok(())
    }
}
