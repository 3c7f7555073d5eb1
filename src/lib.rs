// Robust principal component analysis (PCA)

#![doc = include_str!("../README.md")]

pub mod components;
pub mod data;
pub mod error;
pub mod linalg_backends;
pub mod mcd;
pub mod options;
pub mod pca;
pub mod projection;
pub mod result;
pub mod spectral;
pub mod standardize;
pub mod subset;

#[cfg(test)]
mod pca_tests;

pub use data::LabelledMatrix;
pub use error::{Result, RobustPcaError};
pub use mcd::{FastMcd, FastMcdConfig};
pub use options::{OptionValue, PcaOptions, SubsetSpec};
pub use pca::{robust_pca, LabelledPcaResult, RobustPca};
pub use result::{ProjectedObservations, RobustPcaResult};
pub use subset::OutlierDetector;
