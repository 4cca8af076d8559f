//! Ratio-based subsampling of negative observations.

use crate::data_io::labels::LabelRow;
use crate::error::{DataError, Result};
use rand::seq::index::sample;
use rand::Rng;

/// Negative-to-positive ratios requested for a load
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceRatios {
    /// Negatives (no TC anywhere) per positive
    pub negative_ratio: Option<f64>,
    /// Other-TC negatives per positive; needs the other-TC column
    pub other_tc_ratio: Option<f64>,
}

impl BalanceRatios {
    pub fn is_noop(&self) -> bool {
        self.negative_ratio.is_none() && self.other_tc_ratio.is_none()
    }
}

/// Rows split by class
#[derive(Debug, Default)]
pub struct Partitions<T> {
    pub positive: Vec<T>,
    pub negative: Vec<T>,
    /// Negatives observed while another cyclone was active elsewhere
    pub other_tc: Vec<T>,
}

/// Split rows into positive, negative and other-TC negative partitions.
///
/// Without the other-TC column every non-genesis row is a plain negative.
pub fn partition<T, F>(rows: Vec<T>, has_other_tc_column: bool, label: F) -> Partitions<T>
where
    F: Fn(&T) -> &LabelRow,
{
    let mut parts = Partitions {
        positive: Vec::new(),
        negative: Vec::new(),
        other_tc: Vec::new(),
    };
    for row in rows {
        let l = label(&row);
        if l.tc {
            parts.positive.push(row);
        } else if has_other_tc_column && l.is_other_tc_happening.unwrap_or(false) {
            parts.other_tc.push(row);
        } else {
            parts.negative.push(row);
        }
    }
    parts
}

fn sample_partition<T, R: Rng + ?Sized>(
    rows: Vec<T>,
    ratio: f64,
    positives: usize,
    partition: &'static str,
    rng: &mut R,
) -> Result<Vec<T>> {
    if !(ratio.is_finite() && ratio >= 0.0) {
        return Err(DataError::Config(format!(
            "{} ratio must be non-negative, got {}",
            partition, ratio
        )));
    }
    let requested = (ratio * positives as f64).round() as usize;
    if requested > rows.len() {
        return Err(DataError::InsufficientSamples {
            partition,
            requested,
            available: rows.len(),
        });
    }

    let mut keep = vec![false; rows.len()];
    for idx in sample(rng, rows.len(), requested) {
        keep[idx] = true;
    }
    Ok(rows
        .into_iter()
        .zip(keep)
        .filter_map(|(row, k)| k.then_some(row))
        .collect())
}

/// Subsample negatives relative to the number of positives.
///
/// Negative counts are `round(ratio * positives)`, drawn without replacement.
/// When only `negative_ratio` is given, other-TC negatives are all kept. The
/// result is sorted by genesis onset; rows without one sort last.
pub fn balance<T, F, R>(
    rows: Vec<T>,
    has_other_tc_column: bool,
    ratios: &BalanceRatios,
    rng: &mut R,
    label: F,
) -> Result<Vec<T>>
where
    F: Fn(&T) -> &LabelRow,
    R: Rng + ?Sized,
{
    if ratios.is_noop() {
        return Ok(rows);
    }
    if ratios.other_tc_ratio.is_some() && !has_other_tc_column {
        return Err(DataError::Schema(
            "other-TC ratio requires the 'Is Other TC Happening' column".to_string(),
        ));
    }

    let parts = partition(rows, has_other_tc_column, &label);
    let positives = parts.positive.len();
    log::info!(
        "Balancing {} positive, {} negative, {} other-TC rows",
        positives,
        parts.negative.len(),
        parts.other_tc.len()
    );

    let negative = match ratios.negative_ratio {
        Some(ratio) => sample_partition(parts.negative, ratio, positives, "negative", rng)?,
        None => parts.negative,
    };
    let other_tc = match ratios.other_tc_ratio {
        Some(ratio) => sample_partition(parts.other_tc, ratio, positives, "other-TC", rng)?,
        None => parts.other_tc,
    };

    let mut result = parts.positive;
    result.extend(negative);
    result.extend(other_tc);
    result.sort_by_key(|row| {
        let onset = label(row).first_observed;
        (onset.is_none(), onset)
    });

    log::info!("Balanced working set: {} rows", result.len());
    Ok(result)
}
