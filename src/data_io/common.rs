//! Observation filename handling shared across loaders.
use crate::error::{DataError, Result};
use crate::time_utils::{format_filename_timestamp, parse_filename_timestamp};
use chrono::{Duration, NaiveDateTime};
use std::fs::File;
use std::path::{Path, PathBuf};

/// An observation file reference decomposed into its filename parts.
///
/// Observation files follow `<prefix>_<YYYYMMDD>_<HH>_<MM>.<ext>`, e.g.
/// `fnl_20200101_00_00.nc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationPath {
    pub directory: PathBuf,
    pub prefix: String,
    pub timestamp: NaiveDateTime,
    pub extension: String,
}

impl ObservationPath {
    pub fn parse(path: &Path) -> Result<Self> {
        let invalid = || DataError::InvalidFilename(path.to_string_lossy().to_string());

        let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(invalid)?;
        let extension = match path.extension() {
            Some(ext) => ext.to_str().ok_or_else(invalid)?.to_string(),
            None => String::new(),
        };

        // The prefix may itself contain underscores; the timestamp is the last three parts.
        let mut parts = stem.rsplitn(4, '_');
        let (minute, hour, date, prefix) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(m), Some(h), Some(d), Some(p)) if !p.is_empty() => (m, h, d, p),
                _ => return Err(invalid()),
            };
        let timestamp =
            parse_filename_timestamp(&format!("{}_{}_{}", date, hour, minute)).ok_or_else(invalid)?;

        Ok(Self {
            directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            prefix: prefix.to_string(),
            timestamp,
            extension,
        })
    }

    /// Path of the observation with the same prefix at another time
    pub fn at(&self, timestamp: &NaiveDateTime) -> PathBuf {
        let mut filename = format!("{}_{}", self.prefix, format_filename_timestamp(timestamp));
        if !self.extension.is_empty() {
            filename.push('.');
            filename.push_str(&self.extension);
        }
        self.directory.join(filename)
    }
}

/// Expand a base observation into the per-timestep paths of its lookback window.
///
/// Offsets are hours before the base time. The result is ordered earliest first
/// with the base path last, so its length is always `offsets.len() + 1`.
pub fn resolve_paths(base_path: &Path, previous_hours: &[u32]) -> Result<Vec<PathBuf>> {
    let observation = ObservationPath::parse(base_path)?;

    let mut offsets = previous_hours.to_vec();
    offsets.sort_unstable_by(|a, b| b.cmp(a));

    let mut paths: Vec<PathBuf> = offsets
        .iter()
        .map(|&hours| observation.at(&(observation.timestamp - Duration::hours(hours as i64))))
        .collect();
    paths.push(observation.at(&observation.timestamp));

    Ok(paths)
}

/// True when every path is an existing regular file that can be opened for reading
pub fn all_exist(paths: &[PathBuf]) -> bool {
    paths.iter().all(|p| p.is_file() && File::open(p).is_ok())
}

/// First path of the window that fails the existence check
pub fn first_missing(paths: &[PathBuf]) -> Option<&PathBuf> {
    paths.iter().find(|p| !all_exist(std::slice::from_ref(*p)))
}
