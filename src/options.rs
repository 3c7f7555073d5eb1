// src/options.rs

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RobustPcaError};

/// Names accepted by [`PcaOptions::from_name_value_pairs`]. Matching is case-insensitive.
pub const RECOGNIZED_OPTIONS: [&str; 4] = ["standardize", "NumComponents", "bdp", "bsb"];

/// Parsed option name; one variant per entry of [`RECOGNIZED_OPTIONS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OptionName {
    Standardize,
    NumComponents,
    Bdp,
    Bsb,
}

impl OptionName {
    const ALL: [OptionName; 4] = [
        OptionName::Standardize,
        OptionName::NumComponents,
        OptionName::Bdp,
        OptionName::Bsb,
    ];

    fn as_str(self) -> &'static str {
        match self {
            OptionName::Standardize => RECOGNIZED_OPTIONS[0],
            OptionName::NumComponents => RECOGNIZED_OPTIONS[1],
            OptionName::Bdp => RECOGNIZED_OPTIONS[2],
            OptionName::Bsb => RECOGNIZED_OPTIONS[3],
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.as_str().eq_ignore_ascii_case(name))
    }
}

/// Explicit description of the fitting subset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SubsetSpec {
    /// Zero-based row indices of the observations used for fitting.
    Indices(Vec<usize>),
    /// One flag per input row; `true` marks a fitting observation.
    Mask(Vec<bool>),
}

/// Configuration of a single robust PCA call.
///
/// `bdp` and `bsb` are mutually exclusive. When neither is set every
/// observation is used and the fit is classical.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PcaOptions {
    /// Scale each variable by its subset standard deviation (correlation PCA).
    pub standardize: bool,
    /// Number of components to retain. `None` selects it from the eigenvalues.
    pub num_components: Option<usize>,
    /// Breakdown point in (0, 0.5] handed to the robust estimator.
    pub bdp: Option<f64>,
    /// Explicit fitting subset.
    pub bsb: Option<SubsetSpec>,
}

impl Default for PcaOptions {
    fn default() -> Self {
        Self {
            standardize: true,
            num_components: None,
            bdp: None,
            bsb: None,
        }
    }
}

/// A single entry of a name/value option list.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Indices(Vec<usize>),
    Mask(Vec<bool>),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl From<Vec<usize>> for OptionValue {
    fn from(value: Vec<usize>) -> Self {
        OptionValue::Indices(value)
    }
}

impl From<Vec<bool>> for OptionValue {
    fn from(value: Vec<bool>) -> Self {
        OptionValue::Mask(value)
    }
}

impl PcaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_standardize(mut self, standardize: bool) -> Self {
        self.standardize = standardize;
        self
    }

    pub fn with_num_components(mut self, k: usize) -> Self {
        self.num_components = Some(k);
        self
    }

    pub fn with_bdp(mut self, bdp: f64) -> Self {
        self.bdp = Some(bdp);
        self
    }

    pub fn with_bsb(mut self, bsb: SubsetSpec) -> Self {
        self.bsb = Some(bsb);
        self
    }

    /// Builds options from an alternating name/value list such as
    /// `["bdp", 0.3, "standardize", false]`.
    ///
    /// # Errors
    /// - `MalformedOptionList` when the list has odd length or a name slot holds a non-text value.
    /// - `InvalidOptionName` for names outside [`RECOGNIZED_OPTIONS`].
    /// - `InvalidOption` when a value has the wrong type.
    /// - Any error from [`PcaOptions::validate`].
    pub fn from_name_value_pairs(args: &[OptionValue]) -> Result<Self> {
        if args.len() % 2 != 0 {
            return Err(RobustPcaError::MalformedOptionList(format!(
                "expected name/value pairs but received {} entries",
                args.len()
            )));
        }

        let mut options = PcaOptions::default();
        for (pair_idx, pair) in args.chunks_exact(2).enumerate() {
            let name = match &pair[0] {
                OptionValue::Text(name) => name,
                other => {
                    return Err(RobustPcaError::MalformedOptionList(format!(
                        "entry {} should be an option name but is {:?}",
                        pair_idx * 2,
                        other
                    )))
                }
            };
            let value = &pair[1];
            let option = OptionName::parse(name).ok_or_else(|| RobustPcaError::InvalidOptionName(name.clone()))?;
            debug!("Parsed option {} = {:?}", option.as_str(), value);

            match option {
                OptionName::Standardize => {
                    options.standardize = match value {
                        OptionValue::Bool(b) => *b,
                        OptionValue::Int(0) => false,
                        OptionValue::Int(1) => true,
                        other => return Err(type_error("standardize", "a boolean", other)),
                    };
                }
                OptionName::NumComponents => {
                    let k = match value {
                        OptionValue::Int(k) if *k >= 1 => *k as usize,
                        OptionValue::Float(k) if k.fract() == 0.0 && *k >= 1.0 => *k as usize,
                        other => return Err(type_error("NumComponents", "a positive integer", other)),
                    };
                    options.num_components = Some(k);
                }
                OptionName::Bdp => {
                    options.bdp = match value {
                        OptionValue::Float(b) => Some(*b),
                        other => return Err(type_error("bdp", "a real number in (0, 0.5]", other)),
                    };
                }
                OptionName::Bsb => {
                    options.bsb = match value {
                        OptionValue::Indices(idx) => Some(SubsetSpec::Indices(idx.clone())),
                        OptionValue::Mask(mask) => Some(SubsetSpec::Mask(mask.clone())),
                        other => return Err(type_error("bsb", "an index list or a boolean mask", other)),
                    };
                }
            }
        }

        options.validate()?;
        Ok(options)
    }

    /// Checks the options that do not depend on the data shape.
    pub fn validate(&self) -> Result<()> {
        if self.bdp.is_some() && self.bsb.is_some() {
            return Err(RobustPcaError::MutuallyExclusiveOptions {
                first: "bdp",
                second: "bsb",
            });
        }
        if let Some(bdp) = self.bdp {
            if !bdp.is_finite() || bdp <= 0.0 || bdp > 0.5 {
                return Err(RobustPcaError::InvalidOption {
                    option: "bdp",
                    reason: format!("{} is outside (0, 0.5]", bdp),
                });
            }
        }
        if self.num_components == Some(0) {
            return Err(RobustPcaError::InvalidOption {
                option: "NumComponents",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Checks the options against an `n_rows x n_vars` input.
    pub fn validate_for_shape(&self, n_rows: usize, n_vars: usize) -> Result<()> {
        self.validate()?;
        if let Some(k) = self.num_components {
            if k > n_vars {
                return Err(RobustPcaError::InvalidOption {
                    option: "NumComponents",
                    reason: format!("{} exceeds the number of variables ({})", k, n_vars),
                });
            }
        }
        match &self.bsb {
            Some(SubsetSpec::Indices(idx)) => {
                if let Some(bad) = idx.iter().find(|&&i| i >= n_rows) {
                    return Err(RobustPcaError::InvalidOption {
                        option: "bsb",
                        reason: format!("row index {} is out of range for {} rows", bad, n_rows),
                    });
                }
            }
            Some(SubsetSpec::Mask(mask)) => {
                if mask.len() != n_rows {
                    return Err(RobustPcaError::InvalidOption {
                        option: "bsb",
                        reason: format!("mask has length {} but the data has {} rows", mask.len(), n_rows),
                    });
                }
            }
            None => {}
        }
        Ok(())
    }
}

fn type_error(option: &'static str, expected: &str, got: &OptionValue) -> RobustPcaError {
    RobustPcaError::InvalidOption {
        option,
        reason: format!("expected {}, got {:?}", expected, got),
    }
}
