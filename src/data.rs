// src/data.rs

use log::warn;
use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Result, RobustPcaError};

/// Finite rows of an input matrix together with their original positions.
#[derive(Debug, Clone)]
pub struct CleanedData {
    /// Rows of the input that contain only finite values, in input order.
    pub data: Array2<f64>,
    /// `kept_rows[i]` is the input row index of `data.row(i)`.
    pub kept_rows: Vec<usize>,
}

impl CleanedData {
    pub fn n_dropped(&self, n_input_rows: usize) -> usize {
        n_input_rows - self.kept_rows.len()
    }
}

/// Drops every row containing NaN or an infinity.
///
/// # Errors
/// `EmptyInput` for a matrix with no rows or no columns, `NoFiniteRows` when
/// nothing survives.
pub fn clean_rows(data: ArrayView2<f64>) -> Result<CleanedData> {
    let (n_rows, n_vars) = data.dim();
    if n_rows == 0 || n_vars == 0 {
        return Err(RobustPcaError::EmptyInput);
    }

    let kept_rows: Vec<usize> = data
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|x| x.is_finite()))
        .map(|(i, _)| i)
        .collect();

    if kept_rows.is_empty() {
        return Err(RobustPcaError::NoFiniteRows);
    }
    let cleaned = CleanedData {
        data: if kept_rows.len() == n_rows {
            data.to_owned()
        } else {
            data.select(Axis(0), &kept_rows)
        },
        kept_rows,
    };
    let n_dropped = cleaned.n_dropped(n_rows);
    if n_dropped > 0 {
        warn!(
            "Excluded {} of {} observations containing missing or non-finite values.",
            n_dropped, n_rows
        );
    }
    Ok(cleaned)
}

/// A numeric matrix with row and column labels.
///
/// Labels never enter the numeric pipeline; they are re-attached to the
/// result by [`crate::pca::RobustPca::fit_labelled`].
#[derive(Debug, Clone)]
pub struct LabelledMatrix {
    pub data: Array2<f64>,
    pub row_names: Vec<String>,
    pub column_names: Vec<String>,
}

impl LabelledMatrix {
    pub fn new(data: Array2<f64>, row_names: Vec<String>, column_names: Vec<String>) -> Result<Self> {
        if row_names.len() != data.nrows() {
            return Err(RobustPcaError::DimensionMismatch(format!(
                "{} row names for {} rows",
                row_names.len(),
                data.nrows()
            )));
        }
        if column_names.len() != data.ncols() {
            return Err(RobustPcaError::DimensionMismatch(format!(
                "{} column names for {} columns",
                column_names.len(),
                data.ncols()
            )));
        }
        Ok(Self {
            data,
            row_names,
            column_names,
        })
    }

    /// Labels rows `Obs1..ObsN` and columns `X1..Xv`.
    pub fn with_default_names(data: Array2<f64>) -> Self {
        let row_names = (1..=data.nrows()).map(|i| format!("Obs{}", i)).collect();
        let column_names = (1..=data.ncols()).map(|j| format!("X{}", j)).collect();
        Self {
            data,
            row_names,
            column_names,
        }
    }
}
