//! # Error Types
//!
//! Every failure inside a day run is a [`ProcessError`]. The variants keep the
//! reason typed so the caller can decide how to report it; `run_day` folds them
//! into a [`crate::DayOutcome`].

use crate::catalog::CatalogError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while processing one day
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Zarr error: {0}")]
    Zarr(String),

    #[error("Time axis error: {0}")]
    TimeAxis(String),

    #[error("No data found for this day")]
    NoData,

    #[error("Grid window {window} exceeds source grid {rows} x {cols} of '{variable}'")]
    WindowOutOfBounds {
        variable: String,
        window: String,
        rows: u64,
        cols: u64,
    },

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub fn zarr(msg: impl std::fmt::Display) -> Self {
        ProcessError::Zarr(msg.to_string())
    }
}

impl From<zarrs::array::ArrayError> for ProcessError {
    fn from(error: zarrs::array::ArrayError) -> Self {
        ProcessError::Zarr(error.to_string())
    }
}

impl From<zarrs::array::ArrayCreateError> for ProcessError {
    fn from(error: zarrs::array::ArrayCreateError) -> Self {
        ProcessError::Zarr(error.to_string())
    }
}

/// Result type for day processing
pub type ProcessResult<T> = Result<T, ProcessError>;
