use std::fs::File;
use std::path::{Path, PathBuf};
use tc_formation::data_io::{all_exist, first_missing, resolve_paths, ObservationPath};
use tc_formation::time_utils::{format_filename_timestamp, parse_filename_timestamp};
use tc_formation::DataError;

#[test]
fn test_resolve_paths_earliest_first() {
    let paths = resolve_paths(Path::new("fnl_20200101_00_00.nc"), &[6, 12]).unwrap();
    let names: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    assert_eq!(
        names,
        vec!["fnl_20191231_12_00.nc", "fnl_20191231_18_00.nc", "fnl_20200101_00_00.nc"]
    );
}

#[test]
fn test_resolve_paths_offset_order_irrelevant() {
    let base = Path::new("/data/fnl/fnl_20080515_06_00.nc");
    let a = resolve_paths(base, &[18, 6, 12]).unwrap();
    let b = resolve_paths(base, &[6, 12, 18]).unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0], PathBuf::from("/data/fnl/fnl_20080514_12_00.nc"));
    assert_eq!(a.last().unwrap(), base);
}

#[test]
fn test_resolve_paths_crosses_year_and_leap_day() {
    let paths = resolve_paths(Path::new("gfs_20080301_00_00.nc"), &[24]).unwrap();
    assert_eq!(paths[0], PathBuf::from("gfs_20080229_00_00.nc"));
}

#[test]
fn test_base_without_extension_is_kept_verbatim() {
    let base = Path::new("/data/fnl_20200101_00_00");
    let paths = resolve_paths(base, &[6]).unwrap();
    assert_eq!(paths[0], PathBuf::from("/data/fnl_20191231_18_00"));
    assert_eq!(paths.last().unwrap(), base);
    assert_eq!(resolve_paths(base, &[]).unwrap(), vec![base.to_path_buf()]);
}

#[test]
fn test_invalid_filename() {
    let result = resolve_paths(Path::new("observation.nc"), &[6]);
    assert!(matches!(result, Err(DataError::InvalidFilename(_))));
}

#[test]
fn test_observation_path_parts() {
    let parsed = ObservationPath::parse(Path::new("/data/ncep_fnl_20200101_18_00.grib")).unwrap();
    assert_eq!(parsed.prefix, "ncep_fnl");
    assert_eq!(parsed.extension, "grib");
    assert_eq!(format_filename_timestamp(&parsed.timestamp), "20200101_18_00");
}

#[test]
fn test_filename_timestamp_parsing() {
    let ts = parse_filename_timestamp("20191231_18_00").unwrap();
    assert_eq!(format_filename_timestamp(&ts), "20191231_18_00");
    assert!(parse_filename_timestamp("2019-12-31").is_none());
}

#[test]
fn test_existence_gate() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("fnl_20200101_00_00.nc");
    File::create(&base).unwrap();
    File::create(dir.path().join("fnl_20191231_18_00.nc")).unwrap();

    let paths = resolve_paths(&base, &[6, 12]).unwrap();
    assert!(!all_exist(&paths));
    assert_eq!(
        first_missing(&paths).unwrap(),
        &dir.path().join("fnl_20191231_12_00.nc")
    );

    File::create(dir.path().join("fnl_20191231_12_00.nc")).unwrap();
    assert!(all_exist(&paths));

    // A directory with a matching name is not a readable observation.
    let dir_path = resolve_paths(&base, &[24]).unwrap();
    std::fs::create_dir(&dir_path[0]).unwrap();
    assert!(!all_exist(&dir_path));
}
