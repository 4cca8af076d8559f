//! Observation files, label tables and feature extraction.

pub mod common;
pub mod extract;
pub mod labels;
#[cfg(feature = "netcdf")]
pub mod reader;
pub mod source;

pub use common::{all_exist, first_missing, resolve_paths, ObservationPath};
pub use extract::{extract, VariableSelector, VariableSubset};
pub use labels::{load_labels, LabelRow, LabelTable, OTHER_TC_COLUMN};
#[cfg(feature = "netcdf")]
pub use reader::{NetCDFDataset, NetCDFOpener};
pub use source::{DatasetOpener, Field, GridSource, MemoryDataset, MemoryOpener};
