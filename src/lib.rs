pub mod balance;
pub mod config;
pub mod data_io;
pub mod error;
pub mod math;
pub mod parallel;
pub mod pipeline;
pub mod time_utils;

pub use config::{LoadOptions, LoaderConfig, TargetConfig};
pub use error::{DataError, Result};
pub use pipeline::{
    Batch, BatchStream, GroundTruth, LoadReport, Sample, SampleDataset, TemporalSampleLoader,
};
pub use time_utils::*;
