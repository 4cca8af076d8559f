//! Genesis label tables.
//!
//! A label table lists one observation per row: the base observation file, its
//! date, whether it is associated with a genesis event and where. Rows sharing
//! the same observation file are grouped so that concurrent genesis events become
//! one observation with several centers.

use crate::error::{DataError, Result};
use crate::time_utils::{leadtime_hours, parse_label_datetime};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const OTHER_TC_COLUMN: &str = "Is Other TC Happening";
const REQUIRED_COLUMNS: [&str; 6] =
    ["Path", "Date", "TC", "Latitude", "Longitude", "First Observed"];

/// One observation instance
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRow {
    pub path: PathBuf,
    pub date: NaiveDateTime,
    pub tc: bool,
    /// Genesis centers as `(lat, lon)`; empty when `tc` is false
    pub centers: Vec<(f64, f64)>,
    /// `None` when the table has no other-TC column
    pub is_other_tc_happening: Option<bool>,
    pub first_observed: Option<NaiveDateTime>,
}

impl LabelRow {
    pub fn negative(path: impl Into<PathBuf>, date: NaiveDateTime) -> Self {
        Self {
            path: path.into(),
            date,
            tc: false,
            centers: Vec::new(),
            is_other_tc_happening: None,
            first_observed: None,
        }
    }

    pub fn positive(
        path: impl Into<PathBuf>,
        date: NaiveDateTime,
        centers: Vec<(f64, f64)>,
        first_observed: NaiveDateTime,
    ) -> Self {
        Self {
            path: path.into(),
            date,
            tc: true,
            centers,
            is_other_tc_happening: None,
            first_observed: Some(first_observed),
        }
    }

    pub fn latitudes(&self) -> Vec<f64> {
        self.centers.iter().map(|(lat, _)| *lat).collect()
    }

    pub fn longitudes(&self) -> Vec<f64> {
        self.centers.iter().map(|(_, lon)| *lon).collect()
    }

    /// Hours between this observation and its genesis, for positive rows
    pub fn leadtime(&self) -> Option<i64> {
        self.first_observed
            .filter(|_| self.tc)
            .map(|first| leadtime_hours(&self.date, &first))
    }
}

/// A loaded label table
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    pub rows: Vec<LabelRow>,
    /// Whether the optional `Is Other TC Happening` column was present
    pub has_other_tc_column: bool,
}

impl LabelTable {
    pub fn new(rows: Vec<LabelRow>, has_other_tc_column: bool) -> Self {
        Self {
            rows,
            has_other_tc_column,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.rows.iter().filter(|r| r.tc).count()
    }

    /// Keep negatives, and positives whose leadtime is one of `leadtimes`
    pub fn filter_leadtimes(mut self, leadtimes: &[u32]) -> Self {
        self.rows.retain(|row| match row.leadtime() {
            Some(hours) => leadtimes.iter().any(|&l| l as i64 == hours),
            None => !row.tc,
        });
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "TC")]
    tc: String,
    #[serde(rename = "Latitude", default)]
    latitude: Option<f64>,
    #[serde(rename = "Longitude", default)]
    longitude: Option<f64>,
    #[serde(rename = "First Observed", default)]
    first_observed: Option<String>,
    #[serde(rename = "Is Other TC Happening", default)]
    other_tc: Option<String>,
}

fn parse_bool(value: &str, column: &str, line: usize) -> Result<bool> {
    match value.trim() {
        "True" | "true" | "TRUE" | "1" | "1.0" => Ok(true),
        "False" | "false" | "FALSE" | "0" | "0.0" => Ok(false),
        other => Err(DataError::Schema(format!(
            "line {}: column '{}' has non-boolean value '{}'",
            line, column, other
        ))),
    }
}

fn parse_date(value: &str, column: &str, line: usize) -> Result<NaiveDateTime> {
    parse_label_datetime(value).ok_or_else(|| {
        DataError::Schema(format!(
            "line {}: column '{}' has unparsable date '{}'",
            line, column, value
        ))
    })
}

impl RawLabel {
    fn into_row(self, base_dir: &Path, has_other_tc_column: bool, line: usize) -> Result<LabelRow> {
        let tc = parse_bool(&self.tc, "TC", line)?;
        let date = parse_date(&self.date, "Date", line)?;
        let first_observed = match self.first_observed.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(parse_date(value, "First Observed", line)?),
        };
        let is_other_tc_happening = match (has_other_tc_column, self.other_tc.as_deref()) {
            (false, _) => None,
            (true, None) => Some(false),
            (true, Some(value)) if value.trim().is_empty() => Some(false),
            (true, Some(value)) => Some(parse_bool(value, OTHER_TC_COLUMN, line)?),
        };

        let centers = match (tc, self.latitude, self.longitude) {
            (false, _, _) => Vec::new(),
            (true, Some(lat), Some(lon)) => vec![(lat, lon)],
            (true, _, _) => {
                return Err(DataError::Schema(format!(
                    "line {}: genesis row without both Latitude and Longitude",
                    line
                )))
            }
        };

        let path = PathBuf::from(self.path.trim());
        let path = if path.is_relative() { base_dir.join(path) } else { path };

        Ok(LabelRow {
            path,
            date,
            tc,
            centers,
            is_other_tc_happening,
            first_observed,
        })
    }
}

/// Merge rows that refer to the same observation file.
///
/// The merged row is positive if any source row is, collects every genesis
/// center in table order, and keeps the earliest genesis onset.
fn group_by_observation(rows: Vec<LabelRow>) -> Vec<LabelRow> {
    let mut index: HashMap<PathBuf, usize> = HashMap::new();
    let mut grouped: Vec<LabelRow> = Vec::new();

    for row in rows {
        match index.get(&row.path) {
            Some(&idx) => {
                let existing = &mut grouped[idx];
                existing.tc |= row.tc;
                existing.centers.extend(row.centers);
                existing.first_observed = match (existing.first_observed, row.first_observed) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                existing.is_other_tc_happening = match (
                    existing.is_other_tc_happening,
                    row.is_other_tc_happening,
                ) {
                    (Some(a), Some(b)) => Some(a || b),
                    (a, b) => a.or(b),
                };
            }
            None => {
                index.insert(row.path.clone(), grouped.len());
                grouped.push(row);
            }
        }
    }

    grouped
}

/// Load a label CSV, group rows by observation and optionally filter by leadtime.
///
/// Relative paths in the table are resolved against the CSV's directory. The
/// result is ordered by observation date.
pub fn load_labels(csv_path: impl AsRef<Path>, leadtimes: Option<&[u32]>) -> Result<LabelTable> {
    let csv_path = csv_path.as_ref();
    let base_dir = csv_path.parent().unwrap_or_else(|| Path::new("."));

    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(DataError::Schema(format!(
                "{} is missing required column '{}'",
                csv_path.display(),
                column
            )));
        }
    }
    let has_other_tc_column = headers.iter().any(|h| h == OTHER_TC_COLUMN);

    let mut rows = Vec::new();
    for (i, record) in reader.deserialize::<RawLabel>().enumerate() {
        // Header is line 1.
        rows.push(record?.into_row(base_dir, has_other_tc_column, i + 2)?);
    }
    let raw_count = rows.len();

    let mut rows = group_by_observation(rows);
    rows.sort_by_key(|r| r.date);

    let mut table = LabelTable::new(rows, has_other_tc_column);
    if let Some(leadtimes) = leadtimes {
        table = table.filter_leadtimes(leadtimes);
    }

    log::info!(
        "Loaded {} observations ({} positive) from {} label rows in {}",
        table.len(),
        table.positives(),
        raw_count,
        csv_path.display()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn datetime(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2008, 5, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn write_csv(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("tc_12h.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_groups_concurrent_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "Path,Date,TC,Latitude,Longitude,First Observed\n\
             fnl_20080501_12_00.nc,2008-05-01 12:00:00,True,12.5,130.0,2008-05-02 00:00:00\n\
             fnl_20080501_06_00.nc,2008-05-01 06:00:00,False,,,\n\
             fnl_20080501_12_00.nc,2008-05-01 12:00:00,True,15.0,140.0,2008-05-02 06:00:00\n",
        );

        let table = load_labels(&csv, None).unwrap();
        assert!(!table.has_other_tc_column);
        assert_eq!(table.len(), 2);

        let negative = &table.rows[0];
        assert_eq!(negative.path, dir.path().join("fnl_20080501_06_00.nc"));
        assert!(!negative.tc);
        assert!(negative.centers.is_empty());
        assert_eq!(negative.is_other_tc_happening, None);

        let positive = &table.rows[1];
        assert!(positive.tc);
        assert_eq!(positive.centers, vec![(12.5, 130.0), (15.0, 140.0)]);
        assert_eq!(positive.first_observed, Some(datetime(2, 0)));
        assert_eq!(positive.leadtime(), Some(12));
    }

    #[test]
    fn test_load_with_other_tc_column_and_leadtime_filter() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "Path,Date,TC,Latitude,Longitude,First Observed,Is Other TC Happening\n\
             a_20080501_00_00.nc,2008-05-01 00:00:00,1,10.0,120.0,2008-05-01 12:00:00,0\n\
             a_20080501_06_00.nc,2008-05-01 06:00:00,1,11.0,121.0,2008-05-02 00:00:00,0\n\
             a_20080501_12_00.nc,2008-05-01 12:00:00,0,,,,1\n\
             a_20080501_18_00.nc,2008-05-01 18:00:00,0,,,,0\n",
        );

        let table = load_labels(&csv, Some(&[12])).unwrap();
        assert!(table.has_other_tc_column);
        assert_eq!(table.len(), 3);
        assert_eq!(table.positives(), 1);
        assert_eq!(table.rows[0].leadtime(), Some(12));
        assert_eq!(table.rows[1].is_other_tc_happening, Some(true));
        assert_eq!(table.rows[2].is_other_tc_happening, Some(false));
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(dir.path(), "Path,Date,TC\nfnl_20080501_00_00.nc,2008-05-01,False\n");
        assert!(matches!(load_labels(&csv, None), Err(DataError::Schema(_))));
    }

    #[test]
    fn test_positive_without_coordinates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "Path,Date,TC,Latitude,Longitude,First Observed\n\
             fnl_20080501_00_00.nc,2008-05-01,True,12.0,,2008-05-01\n",
        );
        match load_labels(&csv, None) {
            Err(DataError::Schema(msg)) => assert!(msg.contains("line 2")),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_boolean_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "Path,Date,TC,Latitude,Longitude,First Observed\n\
             fnl_20080501_00_00.nc,2008-05-01,maybe,,,\n",
        );
        assert!(matches!(load_labels(&csv, None), Err(DataError::Schema(_))));
    }

    #[test]
    fn test_leadtime_filter_keeps_negatives() {
        let table = LabelTable::new(
            vec![
                LabelRow::negative("n_20080501_00_00.nc", datetime(1, 0)),
                LabelRow::positive(
                    "p_20080501_00_00.nc",
                    datetime(1, 0),
                    vec![(1.0, 2.0)],
                    datetime(1, 6),
                ),
            ],
            false,
        )
        .filter_leadtimes(&[12, 24]);
        assert_eq!(table.len(), 1);
        assert!(!table.rows[0].tc);
    }
}
