use ndarray::{Array1, Array2, Array3, Zip};
use serde::{Deserialize, Serialize};

/// Parameters of the probability-grid ground truth
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridTarget {
    /// Kernel radius in degrees (the RBF length scale)
    pub avg_radius_deg: f64,
    /// Kernel values below this are zeroed before accumulation
    pub clip_threshold: f64,
    /// Emit background/foreground channels instead of a single occurrence channel
    pub two_class: bool,
    /// Emit the accumulated kernel value instead of a hard 1 where influenced
    pub smooth: bool,
}

impl Default for GridTarget {
    fn default() -> Self {
        Self {
            avg_radius_deg: 3.0,
            clip_threshold: 0.1,
            two_class: true,
            smooth: false,
        }
    }
}

impl GridTarget {
    pub fn channels(&self) -> usize {
        if self.two_class {
            2
        } else {
            1
        }
    }
}

/// Gaussian influence of one center over the grid, clipped below `clip_threshold`
pub fn rbf_kernel(
    latitudes: &[f64],
    longitudes: &[f64],
    center: (f64, f64),
    avg_radius_deg: f64,
    clip_threshold: f64,
) -> Array2<f64> {
    let (lat0, lon0) = center;
    let denom = 2.0 * avg_radius_deg * avg_radius_deg;

    Array2::from_shape_fn((latitudes.len(), longitudes.len()), |(j, i)| {
        let dlat = latitudes[j] - lat0;
        let dlon = longitudes[i] - lon0;
        let value = (-(dlon * dlon + dlat * dlat) / denom).exp();
        if value < clip_threshold {
            0.0
        } else {
            value
        }
    })
}

/// Sum of the clipped kernels of every center, zero when `has_tc` is false
pub fn accumulate_influence(
    latitudes: &[f64],
    longitudes: &[f64],
    centers: &[(f64, f64)],
    has_tc: bool,
    target: &GridTarget,
) -> Array2<f64> {
    let mut influence = Array2::<f64>::zeros((latitudes.len(), longitudes.len()));
    if has_tc {
        for &center in centers {
            influence += &rbf_kernel(
                latitudes,
                longitudes,
                center,
                target.avg_radius_deg,
                target.clip_threshold,
            );
        }
    }
    influence
}

/// Build the `[lat, lon, 1|2]` probability grid for one observation.
///
/// Channel layout in two-class mode is background then foreground. The
/// foreground is 1 wherever any center has influence, or the accumulated kernel
/// value itself when `smooth` is set.
pub fn synthesize_grid(
    latitudes: &[f64],
    longitudes: &[f64],
    centers: &[(f64, f64)],
    has_tc: bool,
    target: &GridTarget,
) -> Array3<f32> {
    let influence = accumulate_influence(latitudes, longitudes, centers, has_tc, target);
    let (nlat, nlon) = influence.dim();
    let mut grid = Array3::<f32>::zeros((nlat, nlon, target.channels()));

    let fg = if target.two_class { 1 } else { 0 };
    Zip::from(grid.outer_iter_mut())
        .and(influence.outer_iter())
        .for_each(|mut row, values| {
            for (i, &value) in values.iter().enumerate() {
                let influenced = value > 0.0;
                row[[i, fg]] = match (influenced, target.smooth) {
                    (false, _) => 0.0,
                    (true, false) => 1.0,
                    (true, true) => value as f32,
                };
                if target.two_class {
                    row[[i, 0]] = if influenced { 0.0 } else { 1.0 };
                }
            }
        });

    grid
}

/// Location-regression target `[has_tc, lat, lon]` using the first center
pub fn synthesize_location(has_tc: bool, centers: &[(f64, f64)]) -> Array1<f32> {
    match centers.first() {
        Some(&(lat, lon)) if has_tc => Array1::from(vec![1.0, lat as f32, lon as f32]),
        _ => Array1::zeros(3),
    }
}
