use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or iterating the sample pipeline
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Level {level} of variable '{variable}' not found (available: {available:?})")]
    MissingLevel {
        variable: String,
        level: f64,
        available: Vec<f64>,
    },

    #[error("Variable not found: {0}")]
    MissingVariable(String),

    #[error("Observation file not found: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Invalid observation filename '{0}', expected <prefix>_<YYYYMMDD>_<HH>_<MM>.<ext>")]
    InvalidFilename(String),

    #[error("Requested {requested} {partition} samples but only {available} are available")]
    InsufficientSamples {
        partition: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("Label schema error: {0}")]
    Schema(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),
}

pub type Result<T> = std::result::Result<T, DataError>;
