// src/mcd.rs

//! Minimum covariance determinant estimator (FAST-MCD) used as the default
//! [`OutlierDetector`].
//!
//! The raw estimate is the location/scatter of the `h` observations whose
//! covariance has the smallest determinant, found from random elemental
//! starts refined by concentration steps. It is then made consistent at the
//! normal model, reweighted once at the 0.975 chi-square quantile, and used to
//! flag observations whose squared Mahalanobis distance exceeds the
//! `confidence_level` quantile.

use std::cmp::Ordering;

use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{Result, RobustPcaError};
use crate::linalg_backends::{BackendEigh, NdarrayLinAlgBackend};
use crate::subset::OutlierDetector;

/// Relative eigenvalue floor below which a scatter matrix counts as singular.
const SINGULARITY_TOLERANCE: f64 = 1e-12;
/// Offsets from an exact-fit hyperplane at or below this fraction of the data spread count as zero.
const EXACT_FIT_TOLERANCE: f64 = 1e-9;
/// Quantile used for the reweighting step.
const REWEIGHT_QUANTILE: f64 = 0.975;

#[derive(Clone, Debug)]
pub struct FastMcdConfig {
    /// Number of random elemental starts.
    pub num_starts: usize,
    /// Concentration steps applied to every start before ranking.
    pub initial_csteps: usize,
    /// Number of best starts iterated to convergence.
    pub num_best: usize,
    /// Upper bound on concentration steps for the refined starts.
    pub max_csteps: usize,
    pub random_seed: u64,
}

impl Default for FastMcdConfig {
    fn default() -> Self {
        FastMcdConfig {
            num_starts: 500,
            initial_csteps: 2,
            num_best: 10,
            max_csteps: 100,
            random_seed: 2025,
        }
    }
}

/// Location and scatter estimate with the distances it induces.
#[derive(Debug, Clone)]
pub struct McdEstimate {
    pub location: Array1<f64>,
    pub scatter: Array2<f64>,
    /// Squared Mahalanobis distances of every observation. Under an exact fit
    /// rows on the hyperplane have distance zero and all others infinity.
    pub squared_distances: Array1<f64>,
    /// Rows of the raw optimal h-subset.
    pub raw_subset: Vec<usize>,
    /// At least h observations lie on a hyperplane and `scatter` is singular.
    pub exact_fit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FastMcd {
    config: FastMcdConfig,
}

/// Mahalanobis geometry of a scatter matrix: whitening map and log-determinant.
struct Whitening {
    transform: Array2<f64>,
    log_det: f64,
}

struct Candidate {
    subset: Vec<usize>,
    log_det: f64,
}

impl FastMcd {
    pub fn new(config: FastMcdConfig) -> Self {
        Self { config }
    }

    /// Number of observations covered by the raw estimate for breakdown point `bdp`.
    pub fn coverage(n_rows: usize, n_vars: usize, bdp: f64) -> usize {
        let half = (n_rows + n_vars + 1) / 2;
        let h = (2 * half) as f64 - n_rows as f64 + 2.0 * (n_rows - half.min(n_rows)) as f64 * (1.0 - bdp);
        (h.floor() as usize).clamp(half.min(n_rows), n_rows)
    }

    /// Computes the reweighted MCD estimate of `data`.
    pub fn estimate(&self, data: ArrayView2<f64>, bdp: f64) -> Result<McdEstimate> {
        let (n_rows, n_vars) = data.dim();
        if n_rows <= n_vars + 1 {
            return Err(RobustPcaError::SubsetTooSmall {
                selected: n_rows,
                required: n_vars + 2,
            });
        }
        let h = Self::coverage(n_rows, n_vars, bdp);
        debug!("FAST-MCD: n={}, v={}, bdp={}, h={}", n_rows, n_vars, bdp, h);

        let chi2 = ChiSquared::new(n_vars as f64)
            .map_err(|e| RobustPcaError::DegenerateInput(format!("chi-square({}) unavailable: {}", n_vars, e)))?;
        let chi2_median = chi2.inverse_cdf(0.5);

        let best = self.raw_subset(data, h)?;
        let (raw_location, mut raw_scatter) = location_scatter(data, &best.subset);
        let Some(raw_whitening) = whitening(&raw_scatter)? else {
            return exact_fit(data, raw_location, raw_scatter, best.subset);
        };
        let raw_d2 = squared_distances(data, &raw_location, &raw_whitening);
        let raw_factor = median(&raw_d2) / chi2_median;
        if !(raw_factor.is_finite() && raw_factor > 0.0) {
            return Err(RobustPcaError::DegenerateInput(
                "more than half of the observations lie exactly on the MCD fit".to_string(),
            ));
        }
        raw_scatter *= raw_factor;
        let raw_d2 = raw_d2 / raw_factor;

        let cutoff = chi2.inverse_cdf(REWEIGHT_QUANTILE);
        let kept: Vec<usize> = (0..n_rows).filter(|&i| raw_d2[i] <= cutoff).collect();
        trace!("FAST-MCD reweighting keeps {} of {} rows", kept.len(), n_rows);

        if kept.len() <= n_vars {
            return Ok(McdEstimate {
                location: raw_location,
                scatter: raw_scatter,
                squared_distances: raw_d2,
                raw_subset: best.subset,
                exact_fit: false,
            });
        }
        let (location, mut scatter) = location_scatter(data, &kept);
        let Some(rw) = whitening(&scatter)? else {
            return Ok(McdEstimate {
                location: raw_location,
                scatter: raw_scatter,
                squared_distances: raw_d2,
                raw_subset: best.subset,
                exact_fit: false,
            });
        };
        let d2 = squared_distances(data, &location, &rw);
        let factor = median(&d2) / chi2_median;
        let (scatter, d2) = if factor.is_finite() && factor > 0.0 {
            scatter *= factor;
            (scatter, d2 / factor)
        } else {
            (scatter, d2)
        };

        Ok(McdEstimate {
            location,
            scatter,
            squared_distances: d2,
            raw_subset: best.subset,
            exact_fit: false,
        })
    }

    fn raw_subset(&self, data: ArrayView2<f64>, h: usize) -> Result<Candidate> {
        let (n_rows, n_vars) = data.dim();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_seed);
        let mut order: Vec<usize> = (0..n_rows).collect();
        let mut candidates: Vec<Candidate> = Vec::with_capacity(self.config.num_starts);

        if h == n_rows {
            let all: Vec<usize> = (0..n_rows).collect();
            let (_, scatter) = location_scatter(data, &all);
            let log_det = whitening(&scatter)?.map_or(f64::NEG_INFINITY, |w| w.log_det);
            return Ok(Candidate { subset: all, log_det });
        }

        for _ in 0..self.config.num_starts {
            order.shuffle(&mut rng);
            // Elemental start of v+1 rows, extended while singular.
            let mut size = n_vars + 1;
            let mut start = None;
            while size <= h {
                let subset = &order[..size];
                let (loc, scatter) = location_scatter(data, subset);
                if let Some(w) = whitening(&scatter)? {
                    start = Some((loc, w));
                    break;
                }
                size += 1;
            }
            let Some((loc, w)) = start else { continue };

            let mut candidate = concentrate(data, h, loc, w)?;
            for _ in 1..self.config.initial_csteps {
                match self.cstep(data, h, &candidate)? {
                    Some(next) if next.log_det < candidate.log_det => candidate = next,
                    _ => break,
                }
            }
            candidates.push(candidate);
        }

        if candidates.is_empty() {
            // Every subset of up to h rows was singular.
            let mut subset = order[..h].to_vec();
            subset.sort_unstable();
            return Ok(Candidate {
                subset,
                log_det: f64::NEG_INFINITY,
            });
        }

        candidates.sort_by(|a, b| a.log_det.partial_cmp(&b.log_det).unwrap_or(Ordering::Equal));
        candidates.truncate(self.config.num_best);

        let mut best: Option<Candidate> = None;
        for mut candidate in candidates {
            for _ in 0..self.config.max_csteps {
                match self.cstep(data, h, &candidate)? {
                    Some(next) if next.log_det < candidate.log_det - 1e-12 => candidate = next,
                    _ => break,
                }
            }
            if best.as_ref().map_or(true, |b| candidate.log_det < b.log_det) {
                best = Some(candidate);
            }
        }
        let best = best.ok_or_else(|| RobustPcaError::DegenerateInput("no MCD candidate survived".to_string()))?;
        debug!("FAST-MCD optimal h-subset log-determinant {:.6}", best.log_det);
        Ok(best)
    }

    fn cstep(&self, data: ArrayView2<f64>, h: usize, candidate: &Candidate) -> Result<Option<Candidate>> {
        let (loc, scatter) = location_scatter(data, &candidate.subset);
        match whitening(&scatter)? {
            Some(w) => concentrate(data, h, loc, w).map(Some),
            None => Ok(None),
        }
    }
}

impl OutlierDetector for FastMcd {
    fn detect_outliers(&self, data: ArrayView2<f64>, bdp: f64, confidence_level: f64) -> Result<Vec<usize>> {
        let start = std::time::Instant::now();
        let estimate = self.estimate(data, bdp)?;
        let chi2 = ChiSquared::new(data.ncols() as f64)
            .map_err(|e| RobustPcaError::DegenerateInput(format!("chi-square unavailable: {}", e)))?;
        let cutoff = chi2.inverse_cdf(confidence_level);
        let outliers: Vec<usize> = estimate
            .squared_distances
            .iter()
            .enumerate()
            .filter(|(_, &d2)| d2 > cutoff)
            .map(|(i, _)| i)
            .collect();
        info!(
            "FAST-MCD flagged {} outliers (cutoff {:.3}) in {:?}",
            outliers.len(),
            cutoff,
            start.elapsed()
        );
        Ok(outliers)
    }
}

/// One concentration step: keep the `h` rows closest under the current fit.
fn concentrate(data: ArrayView2<f64>, h: usize, location: Array1<f64>, w: Whitening) -> Result<Candidate> {
    let d2 = squared_distances(data, &location, &w);
    let mut ranked: Vec<usize> = (0..data.nrows()).collect();
    ranked.sort_by(|&a, &b| d2[a].partial_cmp(&d2[b]).unwrap_or(Ordering::Equal));
    ranked.truncate(h);
    ranked.sort_unstable();

    let (_, scatter) = location_scatter(data, &ranked);
    let log_det = match whitening(&scatter)? {
        Some(next) => next.log_det,
        None => f64::NEG_INFINITY,
    };
    Ok(Candidate {
        subset: ranked,
        log_det,
    })
}

/// Estimate for an h-subset with singular scatter: the observations lie on the
/// hyperplane through `location` spanned by the non-null directions of `scatter`.
/// Rows on that hyperplane get distance zero, rows off it infinity.
fn exact_fit(
    data: ArrayView2<f64>,
    location: Array1<f64>,
    scatter: Array2<f64>,
    raw_subset: Vec<usize>,
) -> Result<McdEstimate> {
    let (n_rows, n_vars) = data.dim();
    let eig = NdarrayLinAlgBackend.eigh_upper(&scatter)?;
    let largest = eig.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    let null_directions: Vec<usize> = (0..n_vars)
        .filter(|&i| eig.eigenvalues[i] <= SINGULARITY_TOLERANCE * largest)
        .collect();
    let normals = eig.eigenvectors.select(Axis(1), &null_directions);

    let centered = &data - &location;
    let spread = centered.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    let tolerance = EXACT_FIT_TOLERANCE * spread.max(1.0);
    let offsets = centered.dot(&normals);
    let squared_distances = offsets.map_axis(Axis(1), |row| {
        if row.iter().all(|o| o.abs() <= tolerance) {
            0.0
        } else {
            f64::INFINITY
        }
    });
    if raw_subset.iter().any(|&i| squared_distances[i] != 0.0) {
        return Err(RobustPcaError::DegenerateInput(
            "raw MCD scatter matrix is numerically singular without an exact fit".to_string(),
        ));
    }
    let on_plane = squared_distances.iter().filter(|&&d| d == 0.0).count();
    warn!(
        "FAST-MCD exact fit: {} of {} observations lie on a {}-dimensional hyperplane; the rest are flagged.",
        on_plane,
        n_rows,
        n_vars - null_directions.len()
    );

    Ok(McdEstimate {
        location,
        scatter,
        squared_distances,
        raw_subset,
        exact_fit: true,
    })
}

/// Mean and covariance (divisor m - 1) of the listed rows.
fn location_scatter(data: ArrayView2<f64>, rows: &[usize]) -> (Array1<f64>, Array2<f64>) {
    let block = data.select(Axis(0), rows);
    let m = block.nrows();
    let location = block
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()));
    let centered = &block - &location;
    let divisor = if m > 1 { (m - 1) as f64 } else { 1.0 };
    let scatter = centered.t().dot(&centered) / divisor;
    (location, scatter)
}

/// `None` when the scatter matrix is numerically singular.
fn whitening(scatter: &Array2<f64>) -> Result<Option<Whitening>> {
    let eig = NdarrayLinAlgBackend.eigh_upper(scatter)?;
    let largest = eig.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    if largest <= 0.0 || eig.eigenvalues.iter().any(|&l| l <= SINGULARITY_TOLERANCE * largest) {
        return Ok(None);
    }
    let log_det = eig.eigenvalues.iter().map(|l| l.ln()).sum();
    let inv_sqrt = eig.eigenvalues.mapv(|l| 1.0 / l.sqrt());
    let transform = &eig.eigenvectors * &inv_sqrt;
    Ok(Some(Whitening { transform, log_det }))
}

fn squared_distances(data: ArrayView2<f64>, location: &Array1<f64>, w: &Whitening) -> Array1<f64> {
    let centered = &data - location;
    let whitened = centered.dot(&w.transform);
    whitened.map_axis(Axis(1), |row| row.dot(&row))
}

fn median(values: &Array1<f64>) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}
