//! DST configuration errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DstError {
    #[error("DST_SEED must be a non-zero u64, got {value:?}")]
    InvalidSeed { value: String },

    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidIterations { var: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, DstError>;
