// Robust principal component analysis

use log::{debug, info};
use ndarray::{s, ArrayView2};

use crate::components::{explained_variance_table, select_num_components};
use crate::data::{clean_rows, LabelledMatrix};
use crate::error::{Result, RobustPcaError};
use crate::mcd::FastMcd;
use crate::options::PcaOptions;
use crate::projection::project;
use crate::result::RobustPcaResult;
use crate::spectral::decompose;
use crate::standardize::standardize;
use crate::subset::{select_subset, OutlierDetector};

/// Robust PCA runner.
///
/// Holds the options of a call and the robust estimator consulted when a
/// breakdown point is given. The runner keeps no state between fits.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use robust_pca::{PcaOptions, RobustPca};
///
/// let x = array![
///     [1.0, 2.1, 0.3],
///     [2.0, 3.9, 0.1],
///     [3.0, 6.2, 0.4],
///     [4.0, 8.1, 0.2],
///     [5.0, 9.8, 0.6],
///     [6.0, 12.2, 0.3],
/// ];
/// let result = RobustPca::new(PcaOptions::default()).fit(x.view()).unwrap();
/// assert_eq!(result.scores.nrows(), 6);
/// assert!(result.num_components >= 1);
/// ```
#[derive(Debug, Clone)]
pub struct RobustPca<D = FastMcd> {
    options: PcaOptions,
    detector: D,
}

impl RobustPca<FastMcd> {
    /// Creates a runner using the default FAST-MCD estimator.
    pub fn new(options: PcaOptions) -> Self {
        Self {
            options,
            detector: FastMcd::default(),
        }
    }
}

impl<D: OutlierDetector> RobustPca<D> {
    /// Replaces the robust estimator used for `bdp`-based trimming.
    pub fn with_outlier_detector<E: OutlierDetector>(self, detector: E) -> RobustPca<E> {
        RobustPca {
            options: self.options,
            detector,
        }
    }

    /// Runs the whole pipeline on an `n x v` matrix.
    ///
    /// Rows with missing or non-finite entries are dropped first; every other
    /// row is projected onto the fitted subspace whether or not it belongs to
    /// the fitting subset.
    ///
    /// # Errors
    /// Configuration errors are reported before the data is inspected.
    /// Degenerate data (constant standardized columns, a subset with no more
    /// observations than variables, zero retained eigenvalues) fails with a
    /// specific [`RobustPcaError`] instead of producing non-finite output.
    pub fn fit(&self, data: ArrayView2<f64>) -> Result<RobustPcaResult> {
        let (n_input_rows, n_vars) = data.dim();
        self.options.validate_for_shape(n_input_rows, n_vars)?;
        let overall_start_time = std::time::Instant::now();

        let cleaned = clean_rows(data)?;
        let n_rows = cleaned.data.nrows();
        info!(
            "Starting robust PCA on {} x {} data ({} finite rows), standardize={}.",
            n_input_rows, n_vars, n_rows, self.options.standardize
        );

        let selection = select_subset(
            cleaned.data.view(),
            &cleaned.kept_rows,
            n_input_rows,
            self.options.bdp,
            self.options.bsb.as_ref(),
            &self.detector,
        )?;
        let nbsb = selection.size();
        if nbsb <= n_vars {
            return Err(RobustPcaError::SubsetTooSmall {
                selected: nbsb,
                required: n_vars + 1,
            });
        }
        debug!("Fitting subset: {} of {} observations (robust: {}).", nbsb, n_rows, selection.robust);

        let standardization = standardize(cleaned.data.view(), selection.mask.view(), self.options.standardize)?;
        let spectral = decompose(standardization.z.view(), selection.mask.view())?;
        let explained_variance = explained_variance_table(spectral.eigenvalues.view())?;
        let components = select_num_components(spectral.eigenvalues.view(), self.options.num_components)?;
        let k = components.num_components;

        let projection = project(
            standardization.z.view(),
            spectral.eigenvectors.view(),
            spectral.eigenvalues.view(),
            spectral.covariance.view(),
            k,
        )?;

        let eigenvectors = spectral.eigenvectors.slice(s![.., ..k]).to_owned();
        info!(
            "Robust PCA finished in {:?}: retained {} components explaining {:.2}% of the variance.",
            overall_start_time.elapsed(),
            k,
            explained_variance[[k - 1, 2]]
        );

        Ok(RobustPcaResult {
            covariance: spectral.covariance,
            explained_variance,
            eigenvalues: spectral.eigenvalues,
            eigenvectors,
            loadings: projection.loadings,
            scores: projection.scores,
            communalities: projection.communalities,
            orthogonal_distance: projection.orthogonal_distance,
            score_distance: projection.score_distance,
            subset_mask: selection.mask,
            robust: selection.robust,
            center: standardization.center,
            scale: standardization.scale,
            standardized: self.options.standardize,
            num_components: k,
            components_promoted: components.promoted,
            kept_rows: cleaned.kept_rows,
            n_input_rows,
        })
    }

    /// Fits labelled data; labels are carried alongside the numeric result.
    pub fn fit_labelled(&self, table: &LabelledMatrix) -> Result<LabelledPcaResult> {
        if table.row_names.len() != table.data.nrows() || table.column_names.len() != table.data.ncols() {
            return Err(RobustPcaError::DimensionMismatch(format!(
                "{} row names and {} column names for a {:?} matrix",
                table.row_names.len(),
                table.column_names.len(),
                table.data.dim()
            )));
        }
        let result = self.fit(table.data.view())?;
        let row_names = result
            .kept_rows
            .iter()
            .map(|&i| table.row_names[i].clone())
            .collect();
        Ok(LabelledPcaResult {
            row_names,
            column_names: table.column_names.clone(),
            result,
        })
    }
}

/// A numeric result with the labels of its kept rows and its variables.
#[derive(Debug, Clone)]
pub struct LabelledPcaResult {
    pub result: RobustPcaResult,
    /// Names of the rows in `result.scores`, in order.
    pub row_names: Vec<String>,
    pub column_names: Vec<String>,
}

impl LabelledPcaResult {
    /// Names of observations left out of the fitting subset.
    pub fn excluded_row_names(&self) -> Vec<&str> {
        self.row_names
            .iter()
            .zip(self.result.subset_mask.iter())
            .filter_map(|(name, &m)| if m { None } else { Some(name.as_str()) })
            .collect()
    }

    /// Component labels `PC1..PCk`.
    pub fn component_names(&self) -> Vec<String> {
        (1..=self.result.num_components).map(|i| format!("PC{}", i)).collect()
    }
}

/// Robust PCA with the default estimator.
pub fn robust_pca(data: ArrayView2<f64>, options: &PcaOptions) -> Result<RobustPcaResult> {
    RobustPca::new(options.clone()).fit(data)
}
