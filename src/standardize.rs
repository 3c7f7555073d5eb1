// src/standardize.rs

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, RobustPcaError};

/// Center, scale and the transformed full data matrix.
#[derive(Debug, Clone)]
pub struct Standardization {
    /// Subset column means.
    pub center: Array1<f64>,
    /// Subset column standard deviations, or ones when not standardizing.
    pub scale: Array1<f64>,
    /// `(X - center) / scale` for every row of `X`.
    pub z: Array2<f64>,
}

/// Centers (and optionally scales) all rows of `data` with statistics taken
/// from the rows where `mask` is true.
///
/// # Errors
/// `SubsetTooSmall` with fewer than two subset rows, `ZeroVariance` when a
/// column is constant over the subset and `standardize` is set.
pub fn standardize(data: ArrayView2<f64>, mask: ArrayView1<bool>, standardize: bool) -> Result<Standardization> {
    let (n_rows, n_vars) = data.dim();
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

    let subset = data.select(Axis(0), &subset_rows);
    let center = subset
        .mean_axis(Axis(0))
        .ok_or_else(|| RobustPcaError::DegenerateInput("empty fitting subset".to_string()))?;

    let scale = if standardize {
        let sd = subset.std_axis(Axis(0), 1.0);
        for (column, values) in subset.columns().into_iter().enumerate() {
            let (s, m) = (sd[column], center[column]);
            let constant = values.iter().all(|&x| x == values[0]);
            // Spread at the level of rounding in the mean is not variance.
            let rounding = f64::EPSILON * nbsb as f64 * m.abs();
            if constant || !s.is_finite() || s <= rounding {
                return Err(RobustPcaError::ZeroVariance { column });
            }
        }
        sd
    } else {
        Array1::ones(n_vars)
    };

    let z = (&data - &center) / &scale;
    debug!(
        "Standardized {} x {} matrix from {} subset rows (scaled: {}).",
        n_rows, n_vars, nbsb, standardize
    );
    Ok(Standardization { center, scale, z })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn statistics_come_from_subset_only() {
        let x = array![[1.0, 10.0], [3.0, 14.0], [100.0, -50.0], [5.0, 12.0]];
        let mask = Array1::from(vec![true, true, false, true]);
        let st = standardize(x.view(), mask.view(), true).unwrap();
        assert_abs_diff_eq!(st.center[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st.center[1], 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st.scale[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st.scale[1], 2.0, epsilon = 1e-12);
        // The excluded row is still transformed.
        assert_abs_diff_eq!(st.z[[2, 0]], 48.5, epsilon = 1e-12);
        assert_abs_diff_eq!(st.z[[2, 1]], -31.0, epsilon = 1e-12);
    }

    #[test]
    fn centering_only_keeps_unit_scale() {
        let x = array![[1.0, 2.0], [3.0, 6.0], [5.0, 10.0]];
        let mask = Array1::from_elem(3, true);
        let st = standardize(x.view(), mask.view(), false).unwrap();
        assert_eq!(st.scale, Array1::<f64>::ones(2));
        assert_abs_diff_eq!(st.z[[0, 1]], -4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st.z.sum(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_subset_column_is_rejected_when_scaling() {
        let x = array![[1.0, 7.0], [2.0, 7.0], [3.0, 7.0], [4.0, 1.0]];
        let mask = Array1::from(vec![true, true, true, false]);
        match standardize(x.view(), mask.view(), true) {
            Err(RobustPcaError::ZeroVariance { column }) => assert_eq!(column, 1),
            other => panic!("expected ZeroVariance, got {:?}", other.map(|s| s.scale)),
        }
        // Centering alone is still well defined.
        assert!(standardize(x.view(), mask.view(), false).is_ok());
    }

    #[test]
    fn small_spread_around_a_large_offset_is_kept() {
        let x = array![[1e13 - 5.0, 1.0], [1e13, 2.0], [1e13 + 5.0, 3.0], [1e13 + 10.0, 4.0]];
        let mask = Array1::from_elem(4, true);
        let st = standardize(x.view(), mask.view(), true).unwrap();
        assert_abs_diff_eq!(st.scale[0], (125.0_f64 / 3.0).sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(st.z[[1, 0]], -2.5 / st.scale[0], epsilon = 1e-9);

        let flat = array![[1e13, 1.0], [1e13, 2.0], [1e13, 3.0]];
        assert!(matches!(
            standardize(flat.view(), Array1::from_elem(3, true).view(), true),
            Err(RobustPcaError::ZeroVariance { column: 0 })
        ));
    }

    #[test]
    fn single_row_subset_is_too_small() {
        let x = array![[1.0], [2.0]];
        let mask = Array1::from(vec![true, false]);
        assert!(matches!(
            standardize(x.view(), mask.view(), true),
            Err(RobustPcaError::SubsetTooSmall { selected: 1, .. })
        ));
    }
}
