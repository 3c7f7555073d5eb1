// src/components.rs

use log::info;
use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Result, RobustPcaError};

/// Outcome of the component-count decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSelection {
    /// Number of retained components.
    pub num_components: usize,
    /// True when a threshold count of one was raised to two.
    pub promoted: bool,
}

/// Cumulative explained variance, in percent, that the automatic rule must exceed.
pub fn variance_threshold_percent(n_vars: usize) -> f64 {
    100.0 * 0.95_f64.powi(n_vars as i32)
}

/// v x 3 table of eigenvalue, percentage explained and cumulative percentage.
pub fn explained_variance_table(eigenvalues: ArrayView1<f64>) -> Result<Array2<f64>> {
    let total: f64 = eigenvalues.sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(RobustPcaError::DegenerateInput(format!(
            "total variance of the fitting subset is {}",
            total
        )));
    }
    let n_vars = eigenvalues.len();
    let mut table = Array2::<f64>::zeros((n_vars, 3));
    let mut running = 0.0;
    for (i, &lambda) in eigenvalues.iter().enumerate() {
        let pct = 100.0 * lambda.max(0.0) / total;
        running += pct;
        table[[i, 0]] = lambda;
        table[[i, 1]] = pct;
        table[[i, 2]] = running.min(100.0);
    }
    Ok(table)
}

/// Smallest number of leading components whose cumulative percentage of
/// explained variance exceeds `100 * 0.95^v`.
pub fn threshold_component_count(eigenvalues: ArrayView1<f64>) -> Result<usize> {
    let n_vars = eigenvalues.len();
    let table = explained_variance_table(eigenvalues)?;
    let threshold = variance_threshold_percent(n_vars);
    let cumulative: Array1<f64> = table.column(2).to_owned();
    Ok(cumulative
        .iter()
        .position(|&c| c > threshold)
        .map(|i| i + 1)
        .unwrap_or(n_vars))
}

/// Raises a single-component solution to two so that a planar display of the
/// scores remains possible. Has no effect when only one variable exists.
pub fn apply_minimum_dimension(count: usize, n_vars: usize) -> (usize, bool) {
    if count == 1 && n_vars > 1 {
        (2, true)
    } else {
        (count, false)
    }
}

/// Resolves the number of components to retain.
///
/// An explicit `requested` count in `1..=v` is used as is. Otherwise the
/// threshold rule runs first and the minimum-dimension override second.
pub fn select_num_components(eigenvalues: ArrayView1<f64>, requested: Option<usize>) -> Result<ComponentSelection> {
    let n_vars = eigenvalues.len();
    if n_vars == 0 {
        return Err(RobustPcaError::EmptyInput);
    }
    if let Some(k) = requested {
        if k == 0 || k > n_vars {
            return Err(RobustPcaError::InvalidOption {
                option: "NumComponents",
                reason: format!("{} is outside 1..={}", k, n_vars),
            });
        }
        return Ok(ComponentSelection {
            num_components: k,
            promoted: false,
        });
    }

    let count = threshold_component_count(eigenvalues)?;
    let (num_components, promoted) = apply_minimum_dimension(count, n_vars);
    if promoted {
        info!(
            "The first component alone explains more than {:.2}% of the variance; retaining 2 components so the scores can be displayed in a plane.",
            variance_threshold_percent(n_vars)
        );
    }
    Ok(ComponentSelection {
        num_components,
        promoted,
    })
}
