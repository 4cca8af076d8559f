use super::source::{DatasetOpener, Field, GridSource};
use crate::error::{DataError, Result};
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

/// Dimension names recognised as the vertical axis
const LEVEL_DIMENSIONS: [&str; 4] = ["lev", "level", "plev", "isobaric"];
const LATITUDE_NAMES: [&str; 2] = ["lat", "latitude"];
const LONGITUDE_NAMES: [&str; 2] = ["lon", "longitude"];

/// One opened NetCDF observation file
pub struct NetCDFDataset {
    file: netcdf::File,
    path: PathBuf,
}

impl NetCDFDataset {
    /// Open a NetCDF file and validate it exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DataError::InvalidPath(path.to_path_buf()));
        }

        Ok(Self {
            file: netcdf::open(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_coordinate(&self, candidates: &[&str]) -> Result<Vec<f64>> {
        let var = candidates
            .iter()
            .find_map(|name| self.file.variable(name))
            .ok_or_else(|| DataError::MissingVariable(candidates.join("|")))?;
        Ok(var.get_values::<f64, _>(..)?)
    }

    fn is_axis(name: &str) -> bool {
        LEVEL_DIMENSIONS.contains(&name)
            || LATITUDE_NAMES.contains(&name)
            || LONGITUDE_NAMES.contains(&name)
    }

    fn is_coordinate(name: &str) -> bool {
        Self::is_axis(name) || name == "time"
    }
}

impl GridSource for NetCDFDataset {
    fn latitudes(&self) -> Result<Vec<f64>> {
        self.read_coordinate(&LATITUDE_NAMES)
    }

    fn longitudes(&self) -> Result<Vec<f64>> {
        self.read_coordinate(&LONGITUDE_NAMES)
    }

    fn field(&self, name: &str) -> Result<Field> {
        let var = self
            .file
            .variable(name)
            .ok_or_else(|| DataError::MissingVariable(name.to_string()))?;

        let dims: Vec<(String, usize)> = var
            .dimensions()
            .iter()
            .map(|d| (d.name(), d.len()))
            .collect();
        let raw: Vec<f32> = var.get_values::<f32, _>(..)?;
        let raw_len = raw.len();

        // Singleton dimensions such as a one-step `time` axis do not change the
        // memory layout, so they can be dropped before reshaping.
        let kept: Vec<&(String, usize)> = dims
            .iter()
            .filter(|(dim, len)| *len > 1 || Self::is_axis(dim))
            .collect();

        let mismatch = || DataError::ShapeMismatch {
            expected: kept.iter().map(|(_, len)| *len).collect(),
            actual: vec![raw_len],
        };

        match kept.as_slice() {
            [(_, nlat), (_, nlon)] => {
                let values = Array2::from_shape_vec((*nlat, *nlon), raw).map_err(|_| mismatch())?;
                Ok(Field::Surface(values))
            }
            [(lev, nlev), (_, nlat), (_, nlon)] => {
                let levels = self.read_coordinate(&[lev.as_str()])?;
                if levels.len() != *nlev {
                    return Err(DataError::ShapeMismatch {
                        expected: vec![*nlev],
                        actual: vec![levels.len()],
                    });
                }
                let values =
                    Array3::from_shape_vec((*nlev, *nlat, *nlon), raw).map_err(|_| mismatch())?;
                Ok(Field::Leveled { levels, values })
            }
            _ => Err(DataError::Config(format!(
                "field '{}' in {} has unsupported dimensions {:?}",
                name,
                self.path.display(),
                dims
            ))),
        }
    }

    fn variable_names(&self) -> Vec<String> {
        self.file
            .variables()
            .map(|v| v.name())
            .filter(|n| !Self::is_coordinate(n))
            .collect()
    }
}

/// Opens observation files with the NetCDF library
#[derive(Debug, Clone, Copy, Default)]
pub struct NetCDFOpener;

impl DatasetOpener for NetCDFOpener {
    type Source = NetCDFDataset;

    fn open(&self, path: &Path) -> Result<NetCDFDataset> {
        log::debug!("opening {}", path.display());
        NetCDFDataset::open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_io::extract::{extract, VariableSubset};

    fn write_observation(path: &Path) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("time", 1).unwrap();
        file.add_dimension("lev", 2).unwrap();
        file.add_dimension("lat", 2).unwrap();
        file.add_dimension("lon", 3).unwrap();

        {
            let mut lat = file.add_variable::<f64>("lat", &["lat"]).unwrap();
            lat.put_values(&[5.0, 7.5], ..).unwrap();
        }
        {
            let mut lon = file.add_variable::<f64>("lon", &["lon"]).unwrap();
            lon.put_values(&[100.0, 102.5, 105.0], ..).unwrap();
        }
        {
            let mut lev = file.add_variable::<f64>("lev", &["lev"]).unwrap();
            lev.put_values(&[900.0, 500.0], ..).unwrap();
        }
        {
            let mut rh = file
                .add_variable::<f32>("rhprs", &["time", "lev", "lat", "lon"])
                .unwrap();
            let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
            rh.put_values(&values, ..).unwrap();
        }
        {
            let mut cape = file.add_variable::<f32>("capesfc", &["lat", "lon"]).unwrap();
            cape.put_values(&[-1.0f32; 6], ..).unwrap();
        }
    }

    #[test]
    fn test_read_fields_and_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fnl_20200101_00_00.nc");
        write_observation(&path);

        let ds = NetCDFOpener.open(&path).unwrap();
        assert_eq!(ds.latitudes().unwrap(), vec![5.0, 7.5]);
        assert_eq!(ds.longitudes().unwrap(), vec![100.0, 102.5, 105.0]);

        let mut names = ds.variable_names();
        names.sort();
        assert_eq!(names, vec!["capesfc", "rhprs"]);

        match ds.field("rhprs").unwrap() {
            Field::Leveled { levels, values } => {
                assert_eq!(levels, vec![900.0, 500.0]);
                assert_eq!(values.shape(), &[2, 2, 3]);
                assert_eq!(values[[1, 0, 0]], 6.0);
            }
            other => panic!("expected leveled field, got {:?}", other),
        }

        let subset = VariableSubset::new().levels("rhprs", &[500.0]).whole("capesfc");
        let out = extract(&ds, &subset).unwrap();
        assert_eq!(out.shape(), &[2, 3, 2]);
        assert_eq!(out[[0, 1, 0]], 7.0);
        assert_eq!(out[[0, 1, 1]], -1.0);
    }

    #[test]
    fn test_open_missing_file() {
        let result = NetCDFDataset::open("/nonexistent/fnl_20200101_00_00.nc");
        assert!(matches!(result, Err(DataError::InvalidPath(_))));
    }
}
