use crate::balance::BalanceRatios;
use crate::data_io::extract::{VariableSelector, VariableSubset};
use crate::error::{DataError, Result};
use crate::math::groundtruth::GridTarget;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Default lookback offsets in hours
pub const DEFAULT_PREVIOUS_HOURS: [u32; 3] = [6, 12, 18];

/// What each sample's target looks like
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetConfig {
    /// Per-pixel probability grid around genesis centers
    Grid(GridTarget),
    /// `[has_tc, lat, lon]` regression target
    Location,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig::Grid(GridTarget::default())
    }
}

fn default_previous_hours() -> Vec<u32> {
    DEFAULT_PREVIOUS_HOURS.to_vec()
}

fn default_num_workers() -> usize {
    4
}

fn default_prefetch() -> usize {
    1
}

/// Construction-time settings of a temporal sample loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Expected `[lat, lon, channel]` shape of one time step
    pub data_shape: [usize; 3],
    /// Lookback offsets in hours; empty means single time step
    #[serde(default = "default_previous_hours")]
    pub previous_hours: Vec<u32>,
    /// Variables and levels to extract, in channel order
    pub subset: VariableSubset,
    #[serde(default)]
    pub target: TargetConfig,
    /// Row loaders run concurrently; 1 keeps table order
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Seed for shuffling and balancing; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Batches produced ahead of the consumer
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

impl LoaderConfig {
    pub fn new(data_shape: [usize; 3], subset: VariableSubset) -> Self {
        Self {
            data_shape,
            previous_hours: default_previous_hours(),
            subset,
            target: TargetConfig::default(),
            num_workers: default_num_workers(),
            seed: None,
            prefetch: default_prefetch(),
        }
    }

    pub fn with_previous_hours(mut self, previous_hours: &[u32]) -> Self {
        self.previous_hours = previous_hours.to_vec();
        self
    }

    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.target = target;
        self
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DataError::InvalidPath(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of time steps per sample, base included
    pub fn time_steps(&self) -> usize {
        self.previous_hours.len() + 1
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.data_shape.iter().any(|&d| d == 0) {
            return Err(DataError::Config(format!(
                "data shape must be non-zero, got {:?}",
                self.data_shape
            )));
        }

        // Whole-field entries of leveled fields widen to every file level, so the
        // static count is only a lower bound for them; rows are checked again.
        let channels = self.subset.channel_count();
        let has_whole = self
            .subset
            .iter()
            .any(|(_, s)| matches!(s, VariableSelector::WholeField(true)));
        let consistent = if has_whole {
            channels <= self.data_shape[2]
        } else {
            channels == self.data_shape[2]
        };
        if channels == 0 || !consistent {
            return Err(DataError::Config(format!(
                "variable subset selects {} channels but data shape expects {}",
                channels, self.data_shape[2]
            )));
        }

        if let TargetConfig::Grid(grid) = &self.target {
            if !(grid.avg_radius_deg > 0.0) {
                return Err(DataError::Config(format!(
                    "kernel radius must be positive, got {}",
                    grid.avg_radius_deg
                )));
            }
            if !(0.0..=1.0).contains(&grid.clip_threshold) {
                return Err(DataError::Config(format!(
                    "clip threshold must be within [0, 1], got {}",
                    grid.clip_threshold
                )));
            }
        }

        if self.num_workers == 0 {
            return Err(DataError::Config("num_workers must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for &hours in &self.previous_hours {
            if hours == 0 {
                return Err(DataError::Config(
                    "lookback offsets must be positive hours".to_string(),
                ));
            }
            if !seen.insert(hours) {
                return Err(DataError::Config(format!("duplicate lookback offset {}h", hours)));
            }
        }

        Ok(())
    }
}

/// Per-call options of a pipeline load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Keep only positives at these leadtimes (hours before genesis)
    pub leadtimes: Option<Vec<u32>>,
    pub negative_ratio: Option<f64>,
    pub other_tc_ratio: Option<f64>,
    /// Keep the first complete epoch in memory and replay it afterwards
    pub cache: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: false,
            leadtimes: None,
            negative_ratio: None,
            other_tc_ratio: None,
            cache: true,
        }
    }
}

impl LoadOptions {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    pub fn ratios(&self) -> BalanceRatios {
        BalanceRatios {
            negative_ratio: self.negative_ratio,
            other_tc_ratio: self.other_tc_ratio,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DataError::Config("batch size must be at least 1".to_string()));
        }
        for ratio in [self.negative_ratio, self.other_tc_ratio].into_iter().flatten() {
            if !(ratio.is_finite() && ratio >= 0.0) {
                return Err(DataError::Config(format!(
                    "balancing ratios must be non-negative, got {}",
                    ratio
                )));
            }
        }
        Ok(())
    }
}
