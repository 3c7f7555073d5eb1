// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh as NdLinalgEigh, SVDInto as NdLinalgSVDInto, UPLO};

use crate::error::{Result, RobustPcaError};

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput {
    /// Eigenvalues in ascending order, as LAPACK returns them.
    pub eigenvalues: Array1<f64>,
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<f64>,
}

/// Symmetric eigendecomposition (DSYEVD-style). Only the upper triangle is read.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput>;
}

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput {
    pub u: Option<Array2<f64>>,
    /// Singular values, descending, length min(rows, cols).
    pub s: Array1<f64>,
    /// Full (cols x cols) V^T when requested.
    pub vt: Option<Array2<f64>>,
}

pub trait BackendSVD {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput>;
}

/// LAPACK-backed implementation through ndarray-linalg.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_linalg_error<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> RobustPcaError {
    move |e| RobustPcaError::Linalg(format!("{}: {}", context, e))
}

impl BackendEigh for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput> {
        let (eigenvalues, eigenvectors) = matrix
            .eigh(UPLO::Upper)
            .map_err(to_linalg_error("symmetric eigendecomposition failed"))?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput> {
        let (u, s, vt) = matrix
            .svd_into(compute_u, compute_v)
            .map_err(to_linalg_error("singular value decomposition failed"))?;
        Ok(SVDOutput { u, s, vt })
    }
}
