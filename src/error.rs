// src/error.rs

use thiserror::Error;

/// Every failure the robust PCA pipeline can report.
///
/// Configuration variants are raised before any numeric work starts; the
/// remaining variants describe data that cannot support a well-defined fit.
#[derive(Debug, Error)]
pub enum RobustPcaError {
    #[error("invalid option name `{0}` (recognized options: standardize, NumComponents, bdp, bsb)")]
    InvalidOptionName(String),

    #[error("malformed option list: {0}")]
    MalformedOptionList(String),

    #[error("options `{first}` and `{second}` are mutually exclusive; supply at most one")]
    MutuallyExclusiveOptions {
        first: &'static str,
        second: &'static str,
    },

    #[error("invalid value for option `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },

    #[error("input matrix has zero observations or zero variables")]
    EmptyInput,

    #[error("every observation contains a missing or non-finite value")]
    NoFiniteRows,

    #[error("variable {column} has zero variance over the fitting subset and cannot be standardized")]
    ZeroVariance { column: usize },

    #[error("fitting subset holds {selected} observations; at least {required} are required")]
    SubsetTooSmall { selected: usize, required: usize },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("linear algebra backend failure: {0}")]
    Linalg(String),

    #[error("model persistence failure: {0}")]
    Persistence(String),
}

impl RobustPcaError {
    /// True for errors caused by the option record rather than by the data.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RobustPcaError::InvalidOptionName(_)
                | RobustPcaError::MalformedOptionList(_)
                | RobustPcaError::MutuallyExclusiveOptions { .. }
                | RobustPcaError::InvalidOption { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RobustPcaError>;
