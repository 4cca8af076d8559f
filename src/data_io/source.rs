//! Gridded dataset handles.
//!
//! A [`GridSource`] is one opened observation file: named fields on a shared
//! `(lat, lon)` grid, some of them with an extra vertical level axis. Handles are
//! produced by a [`DatasetOpener`], which is shared by all pipeline workers, while
//! each opened source belongs to a single row load and is dropped after extraction.

use crate::error::{DataError, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Absolute tolerance used when matching requested pressure levels
pub const LEVEL_TOLERANCE: f64 = 1e-6;

/// A single named field read from a gridded dataset
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Field without a vertical axis, laid out `[lat, lon]`
    Surface(Array2<f32>),
    /// Field on pressure levels, laid out `[lev, lat, lon]`
    Leveled { levels: Vec<f64>, values: Array3<f32> },
}

impl Field {
    /// Horizontal `(lat, lon)` shape of the field
    pub fn grid_shape(&self) -> (usize, usize) {
        match self {
            Field::Surface(values) => values.dim(),
            Field::Leveled { values, .. } => {
                let (_, nlat, nlon) = values.dim();
                (nlat, nlon)
            }
        }
    }

    /// Slice at one pressure level, or `None` when the level does not exist
    pub fn level(&self, level: f64) -> Option<ArrayView2<'_, f32>> {
        match self {
            Field::Surface(_) => None,
            Field::Leveled { levels, values } => levels
                .iter()
                .position(|&l| (l - level).abs() < LEVEL_TOLERANCE)
                .map(|idx| values.index_axis(Axis(0), idx)),
        }
    }

    /// Levels available on this field (empty for surface fields)
    pub fn levels(&self) -> &[f64] {
        match self {
            Field::Surface(_) => &[],
            Field::Leveled { levels, .. } => levels,
        }
    }
}

/// Read access to one opened gridded dataset
pub trait GridSource {
    /// Latitude axis of the grid (degrees north)
    fn latitudes(&self) -> Result<Vec<f64>>;

    /// Longitude axis of the grid (degrees east)
    fn longitudes(&self) -> Result<Vec<f64>>;

    /// Read a named field
    fn field(&self, name: &str) -> Result<Field>;

    /// Names of the data fields in this dataset
    fn variable_names(&self) -> Vec<String>;

    fn has_variable(&self, name: &str) -> bool {
        self.variable_names().iter().any(|v| v == name)
    }
}

/// Opens gridded datasets by path.
///
/// Openers are shared between worker threads, so they must be `Send + Sync`;
/// the sources they return are owned by the calling worker.
pub trait DatasetOpener: Send + Sync {
    type Source: GridSource;

    fn open(&self, path: &Path) -> Result<Self::Source>;
}

impl<O: DatasetOpener + ?Sized> DatasetOpener for Arc<O> {
    type Source = O::Source;

    fn open(&self, path: &Path) -> Result<Self::Source> {
        (**self).open(path)
    }
}

/// Gridded dataset held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDataset {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    /// Fields in insertion order
    pub fields: Vec<(String, Field)>,
}

impl MemoryDataset {
    pub fn new(latitudes: Vec<f64>, longitudes: Vec<f64>) -> Self {
        Self {
            latitudes,
            longitudes,
            fields: Vec::new(),
        }
    }

    /// Add a field, checking it lies on this dataset's grid
    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Result<Self> {
        let expected = (self.latitudes.len(), self.longitudes.len());
        let actual = field.grid_shape();
        if actual != expected {
            return Err(DataError::ShapeMismatch {
                expected: vec![expected.0, expected.1],
                actual: vec![actual.0, actual.1],
            });
        }
        self.fields.push((name.into(), field));
        Ok(self)
    }
}

impl GridSource for MemoryDataset {
    fn latitudes(&self) -> Result<Vec<f64>> {
        Ok(self.latitudes.clone())
    }

    fn longitudes(&self) -> Result<Vec<f64>> {
        Ok(self.longitudes.clone())
    }

    fn field(&self, name: &str) -> Result<Field> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f.clone())
            .ok_or_else(|| DataError::MissingVariable(name.to_string()))
    }

    fn variable_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Opener serving pre-built in-memory datasets keyed by path.
///
/// The path must still exist on disk for the pipeline's existence gate; the
/// opener only replaces the decoding step.
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    datasets: HashMap<PathBuf, MemoryDataset>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, dataset: MemoryDataset) {
        self.datasets.insert(path.into(), dataset);
    }
}

impl DatasetOpener for MemoryOpener {
    type Source = MemoryDataset;

    fn open(&self, path: &Path) -> Result<MemoryDataset> {
        self.datasets
            .get(path)
            .cloned()
            .ok_or_else(|| DataError::InvalidPath(path.to_path_buf()))
    }
}
