// src/subset.rs

use log::{debug, info};
use ndarray::{Array1, ArrayView2};

use crate::error::{Result, RobustPcaError};
use crate::options::SubsetSpec;

/// A robust multivariate location/scatter estimator used only for its outlier flags.
///
/// Given finite data and a breakdown point, implementors return the row
/// indices (into `data`) of observations they consider outlying at the given
/// confidence level.
pub trait OutlierDetector {
    fn detect_outliers(
        &self,
        data: ArrayView2<f64>,
        bdp: f64,
        confidence_level: f64,
    ) -> Result<Vec<usize>>;
}

impl<D: OutlierDetector + ?Sized> OutlierDetector for &D {
    fn detect_outliers(
        &self,
        data: ArrayView2<f64>,
        bdp: f64,
        confidence_level: f64,
    ) -> Result<Vec<usize>> {
        (**self).detect_outliers(data, bdp, confidence_level)
    }
}

/// Observations that take part in estimating center, scale and eigenstructure.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsetSelection {
    /// One flag per (finite) observation.
    pub mask: Array1<bool>,
    /// False only for the classical fit on all observations.
    pub robust: bool,
}

impl SubsetSelection {
    pub fn all(n_rows: usize) -> Self {
        Self {
            mask: Array1::from_elem(n_rows, true),
            robust: false,
        }
    }

    pub fn size(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Confidence level used to flag outliers among `n_rows` observations.
pub fn outlier_confidence_level(n_rows: usize) -> f64 {
    1.0 - 0.01 / n_rows as f64
}

/// Resolves the fitting subset for the finite rows `data`.
///
/// `kept_rows` maps each row of `data` back to its position among the
/// `n_input_rows` rows originally supplied; `bsb` is expressed in that
/// original numbering.
pub fn select_subset<D: OutlierDetector + ?Sized>(
    data: ArrayView2<f64>,
    kept_rows: &[usize],
    n_input_rows: usize,
    bdp: Option<f64>,
    bsb: Option<&SubsetSpec>,
    detector: &D,
) -> Result<SubsetSelection> {
    let n_rows = data.nrows();
    if kept_rows.len() != n_rows {
        return Err(RobustPcaError::DimensionMismatch(format!(
            "{} kept-row indices for {} rows",
            kept_rows.len(),
            n_rows
        )));
    }

    match (bdp, bsb) {
        (Some(_), Some(_)) => Err(RobustPcaError::MutuallyExclusiveOptions {
            first: "bdp",
            second: "bsb",
        }),
        (None, None) => Ok(SubsetSelection::all(n_rows)),
        (Some(bdp), None) => {
            let confidence_level = outlier_confidence_level(n_rows);
            let outliers = detector.detect_outliers(data, bdp, confidence_level)?;
            let mut mask = Array1::from_elem(n_rows, true);
            for &i in &outliers {
                if i >= n_rows {
                    return Err(RobustPcaError::DimensionMismatch(format!(
                        "outlier detector returned row {} for {} rows",
                        i, n_rows
                    )));
                }
                mask[i] = false;
            }
            info!(
                "Robust estimator (bdp={}) flagged {} of {} observations at confidence {:.6}.",
                bdp,
                n_rows - mask.iter().filter(|&&m| m).count(),
                n_rows,
                confidence_level
            );
            Ok(SubsetSelection { mask, robust: true })
        }
        (None, Some(spec)) => {
            let mut in_input = vec![false; n_input_rows];
            match spec {
                SubsetSpec::Indices(indices) => {
                    for &i in indices {
                        let slot = in_input.get_mut(i).ok_or_else(|| RobustPcaError::InvalidOption {
                            option: "bsb",
                            reason: format!("row index {} is out of range for {} rows", i, n_input_rows),
                        })?;
                        *slot = true;
                    }
                }
                SubsetSpec::Mask(flags) => {
                    if flags.len() != n_input_rows {
                        return Err(RobustPcaError::InvalidOption {
                            option: "bsb",
                            reason: format!(
                                "mask has length {} but the data has {} rows",
                                flags.len(),
                                n_input_rows
                            ),
                        });
                    }
                    in_input.copy_from_slice(flags);
                }
            }
            let mask: Array1<bool> = kept_rows.iter().map(|&orig| in_input[orig]).collect();
            debug!(
                "Explicit subset keeps {} of {} finite observations.",
                mask.iter().filter(|&&m| m).count(),
                n_rows
            );
            Ok(SubsetSelection { mask, robust: true })
        }
    }
}
