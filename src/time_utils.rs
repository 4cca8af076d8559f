use chrono::{NaiveDate, NaiveDateTime};

/// Timestamp layout embedded in observation filenames: `fnl_20200101_00_00.nc`
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H_%M";

const LABEL_DATETIME_FORMATS: [&str; 3] =
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse the `<YYYYMMDD>_<HH>_<MM>` part of an observation filename
pub fn parse_filename_timestamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, FILENAME_TIMESTAMP_FORMAT).ok()
}

/// Render a timestamp back into the filename layout
pub fn format_filename_timestamp(datetime: &NaiveDateTime) -> String {
    datetime.format(FILENAME_TIMESTAMP_FORMAT).to_string()
}

/// Parse a date cell from a label table.
///
/// Accepts full datetimes (space or `T` separated) and bare dates, which are
/// taken at midnight.
pub fn parse_label_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    LABEL_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Whole hours from an observation to the genesis it is labeled against
pub fn leadtime_hours(observed: &NaiveDateTime, first_observed: &NaiveDateTime) -> i64 {
    (*first_observed - *observed).num_hours()
}
