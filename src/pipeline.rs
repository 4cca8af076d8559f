//! Batched multi-timestep sample loading.
//!
//! A load walks the label table through the lookback existence gate and the
//! balancer, then streams rows through a worker pool that opens every time step
//! of a row, stacks the extracted channels along a leading time axis and pairs
//! them with the row's ground truth. Samples are optionally shuffled through a
//! bounded buffer before batching.

use crate::balance::balance;
use crate::config::{LoadOptions, LoaderConfig, TargetConfig};
use crate::data_io::common::{first_missing, resolve_paths};
use crate::data_io::extract::extract;
use crate::data_io::labels::{load_labels, LabelRow, LabelTable};
use crate::data_io::source::{DatasetOpener, GridSource};
use crate::error::{DataError, Result};
use crate::math::groundtruth::{synthesize_grid, synthesize_location};
use crate::parallel::{progress, spawn_batcher, spawn_mapper, ShuffleBuffer};
use crossbeam_channel::Receiver;
use ndarray::{stack, Array1, Array3, Array4, ArrayD, ArrayView, Axis, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;

/// Shuffle buffer size in batches
const SHUFFLE_BUFFER_BATCHES: usize = 3;

/// Ground truth of one observation
#[derive(Debug, Clone, PartialEq)]
pub enum GroundTruth {
    /// `[lat, lon, 1|2]` probability grid
    Grid(Array3<f32>),
    /// `[has_tc, lat, lon]`
    Location(Array1<f32>),
}

impl GroundTruth {
    pub fn shape(&self) -> &[usize] {
        match self {
            GroundTruth::Grid(grid) => grid.shape(),
            GroundTruth::Location(location) => location.shape(),
        }
    }

    pub fn into_dyn(self) -> ArrayD<f32> {
        match self {
            GroundTruth::Grid(grid) => grid.into_dyn(),
            GroundTruth::Location(location) => location.into_dyn(),
        }
    }
}

/// One row's stacked observations, `[time, lat, lon, channel]`, and target
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Array4<f32>,
    pub target: GroundTruth,
}

/// A group of samples stacked along a leading batch axis
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[batch, time, lat, lon, channel]`, or `[batch, lat, lon, channel]`
    /// without lookback
    pub features: ArrayD<f32>,
    /// `[batch, lat, lon, 1|2]` or `[batch, 3]`
    pub targets: ArrayD<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row counts observed while preparing a load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows in the label table after the leadtime filter
    pub labels_loaded: usize,
    /// Rows dropped because a time step file was missing
    pub dropped_missing_files: usize,
    /// Rows entering the loader after balancing
    pub balanced_rows: usize,
}

/// Lazy sequence of batches.
///
/// Yields the first error raised by any row and then ends. Dropping the stream
/// stops the workers and joins their threads.
pub struct BatchStream {
    batches: Option<Receiver<Result<Batch>>>,
    handles: Vec<JoinHandle<()>>,
    report: LoadReport,
    done: bool,
}

impl BatchStream {
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    fn join_workers(&mut self) -> Result<()> {
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(DataError::Worker(format!(
                "{} pipeline thread(s) panicked",
                panicked
            )));
        }
        Ok(())
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let received = self.batches.as_ref().map(|rx| rx.recv());
        match received {
            Some(Ok(Ok(batch))) => Some(Ok(batch)),
            Some(Ok(Err(e))) => {
                self.done = true;
                self.batches = None;
                Some(Err(e))
            }
            Some(Err(_)) | None => {
                // Channel closed: either every batch was delivered or a worker died.
                self.done = true;
                self.batches = None;
                self.join_workers().err().map(Err)
            }
        }
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        self.batches = None;
        if let Err(e) = self.join_workers() {
            log::error!("{}", e);
        }
    }
}

/// Builds batched sample streams from label tables
pub struct TemporalSampleLoader<O> {
    config: Arc<LoaderConfig>,
    opener: Arc<O>,
}

impl<O> TemporalSampleLoader<O>
where
    O: DatasetOpener + 'static,
{
    pub fn new(config: LoaderConfig, opener: O) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            opener: Arc::new(opener),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load a label CSV and stream its batches once
    pub fn load(&self, label_path: impl AsRef<Path>, options: &LoadOptions) -> Result<BatchStream> {
        options.validate()?;
        let table = load_labels(label_path, None)?;
        self.prepare(table, options, false)?.epoch()
    }

    /// Stream batches for an already loaded label table once
    pub fn load_table(&self, table: LabelTable, options: &LoadOptions) -> Result<BatchStream> {
        self.prepare(table, options, false)?.epoch()
    }

    /// Prepare a label CSV for iteration over several epochs
    pub fn dataset(
        &self,
        label_path: impl AsRef<Path>,
        options: &LoadOptions,
    ) -> Result<SampleDataset<O>> {
        options.validate()?;
        let table = load_labels(label_path, None)?;
        self.dataset_from_table(table, options)
    }

    /// Prepare an already loaded label table for iteration over several epochs
    pub fn dataset_from_table(
        &self,
        table: LabelTable,
        options: &LoadOptions,
    ) -> Result<SampleDataset<O>> {
        self.prepare(table, options, options.cache)
    }

    /// Load one row with its time axis kept, failing on a missing time step
    pub fn load_single(&self, row: &LabelRow) -> Result<Sample> {
        let paths = resolve_paths(&row.path, &self.config.previous_hours)?;
        if let Some(missing) = first_missing(&paths) {
            return Err(DataError::InvalidPath(missing.clone()));
        }
        load_row(&self.config, self.opener.as_ref(), row, &paths)
    }

    /// Run the leadtime filter, the existence gate and the balancer
    fn prepare(
        &self,
        table: LabelTable,
        options: &LoadOptions,
        cache: bool,
    ) -> Result<SampleDataset<O>> {
        options.validate()?;
        let table = match &options.leadtimes {
            Some(leadtimes) => table.filter_leadtimes(leadtimes),
            None => table,
        };
        let labels_loaded = table.len();
        let has_other_tc_column = table.has_other_tc_column;

        let mut rows = Vec::with_capacity(table.len());
        let mut dropped = 0;
        for row in table.rows {
            let paths = resolve_paths(&row.path, &self.config.previous_hours)?;
            match first_missing(&paths) {
                Some(missing) => {
                    log::debug!("Dropping {}: missing {}", row.path.display(), missing.display());
                    dropped += 1;
                }
                None => rows.push((row, paths)),
            }
        }
        if dropped > 0 {
            log::warn!(
                "Dropped {} of {} rows with missing time step files",
                dropped,
                labels_loaded
            );
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let ratios = options.ratios();
        let rows = balance(rows, has_other_tc_column, &ratios, &mut rng, |(row, _)| row)?;

        let report = LoadReport {
            labels_loaded,
            dropped_missing_files: dropped,
            balanced_rows: rows.len(),
        };
        log::info!(
            "Loading {} rows in batches of {} ({} workers, shuffle: {}, cache: {})",
            report.balanced_rows,
            options.batch_size,
            self.config.num_workers,
            options.shuffle,
            cache
        );

        Ok(SampleDataset {
            config: Arc::clone(&self.config),
            opener: Arc::clone(&self.opener),
            rows: Arc::new(rows),
            options: options.clone(),
            report,
            rng,
            cache: cache.then(|| Arc::new(OnceLock::new())),
        })
    }
}

/// Samples recorded during one loading pass.
///
/// The set is published to the shared slot once every row has loaded, so an
/// epoch that fails or is dropped early leaves the slot empty.
struct CacheFill {
    expected: usize,
    samples: Mutex<Vec<Sample>>,
    slot: Arc<OnceLock<Arc<Vec<Sample>>>>,
}

impl CacheFill {
    fn record(&self, sample: &Sample) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push(sample.clone());
        if samples.len() == self.expected {
            let complete = std::mem::take(&mut *samples);
            log::debug!("Cached {} samples", complete.len());
            let _ = self.slot.set(Arc::new(complete));
        }
    }
}

/// Balanced rows of one load, iterable once per epoch.
///
/// Filtering, the existence gate and balancing run once, when the dataset is
/// built. With caching on, the first complete epoch keeps its samples in memory
/// and later epochs replay them through shuffle and batching without opening
/// any file.
pub struct SampleDataset<O> {
    config: Arc<LoaderConfig>,
    opener: Arc<O>,
    rows: Arc<Vec<(LabelRow, Vec<PathBuf>)>>,
    options: LoadOptions,
    report: LoadReport,
    rng: StdRng,
    cache: Option<Arc<OnceLock<Arc<Vec<Sample>>>>>,
}

impl<O> SampleDataset<O>
where
    O: DatasetOpener + 'static,
{
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Rows yielded by every epoch
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True once a complete epoch has been cached
    pub fn is_cached(&self) -> bool {
        self.cache.as_ref().is_some_and(|slot| slot.get().is_some())
    }

    /// Start the next pass over the dataset
    pub fn epoch(&mut self) -> Result<BatchStream> {
        let batch_size = self.options.batch_size;
        let cached = self.cache.as_ref().and_then(|slot| slot.get()).cloned();

        let (samples, producer) = match cached {
            Some(samples) => {
                log::debug!("Replaying {} cached samples", samples.len());
                let indices: Vec<usize> = (0..samples.len()).collect();
                spawn_mapper(indices, 1, batch_size, move |i: &usize| Ok(samples[*i].clone()))?
            }
            None => {
                let config = Arc::clone(&self.config);
                let opener = Arc::clone(&self.opener);
                let rows = Arc::clone(&self.rows);
                let monitor = progress(rows.len());
                let fill = self.cache.as_ref().map(|slot| CacheFill {
                    expected: rows.len(),
                    samples: Mutex::new(Vec::with_capacity(rows.len())),
                    slot: Arc::clone(slot),
                });
                let indices: Vec<usize> = (0..rows.len()).collect();
                spawn_mapper(indices, self.config.num_workers, batch_size, move |i: &usize| {
                    let (row, paths) = &rows[*i];
                    let sample = load_row(&config, opener.as_ref(), row, paths);
                    monitor.increment();
                    if let (Ok(sample), Some(fill)) = (&sample, &fill) {
                        fill.record(sample);
                    }
                    sample
                })?
            }
        };

        let shuffle = self.options.shuffle.then(|| {
            ShuffleBuffer::new(
                SHUFFLE_BUFFER_BATCHES * batch_size,
                StdRng::from_rng(&mut self.rng),
            )
        });
        let squeeze = self.config.previous_hours.is_empty();
        let (batches, batcher) = spawn_batcher(
            samples,
            batch_size,
            shuffle,
            self.config.prefetch,
            move |group| assemble(group, squeeze),
        )?;

        Ok(BatchStream {
            batches: Some(batches),
            handles: vec![producer, batcher],
            report: self.report,
            done: false,
        })
    }
}

/// Open every time step of a row, stack its channels and synthesize its target.
///
/// Each file is opened, read and dropped before the next one is touched. The
/// grid target uses the coordinates of the base (last) time step.
fn load_row<O: DatasetOpener + ?Sized>(
    config: &LoaderConfig,
    opener: &O,
    row: &LabelRow,
    paths: &[PathBuf],
) -> Result<Sample> {
    let [nlat, nlon, nchan] = config.data_shape;
    let mut steps = Vec::with_capacity(paths.len());
    let mut axes = None;

    for (i, path) in paths.iter().enumerate() {
        let source = opener.open(path)?;
        let step = extract(&source, &config.subset)?;
        if step.shape() != [nlat, nlon, nchan] {
            return Err(DataError::ShapeMismatch {
                expected: config.data_shape.to_vec(),
                actual: step.shape().to_vec(),
            });
        }
        if i + 1 == paths.len() && matches!(config.target, TargetConfig::Grid(_)) {
            axes = Some((source.latitudes()?, source.longitudes()?));
        }
        steps.push(step);
    }

    let views: Vec<_> = steps.iter().map(|s| s.view()).collect();
    let features = stack(Axis(0), &views)
        .map_err(|e| DataError::Config(format!("failed to stack time steps: {}", e)))?;

    let target = match &config.target {
        TargetConfig::Grid(grid) => {
            let (lats, lons) =
                axes.ok_or_else(|| DataError::Config("row has no time steps".to_string()))?;
            if lats.len() != nlat || lons.len() != nlon {
                return Err(DataError::ShapeMismatch {
                    expected: vec![nlat, nlon],
                    actual: vec![lats.len(), lons.len()],
                });
            }
            GroundTruth::Grid(synthesize_grid(&lats, &lons, &row.centers, row.tc, grid))
        }
        TargetConfig::Location => GroundTruth::Location(synthesize_location(row.tc, &row.centers)),
    };

    Ok(Sample { features, target })
}

fn stack_dyn(arrays: &[ArrayD<f32>], what: &str) -> Result<ArrayD<f32>> {
    let views: Vec<ArrayView<f32, IxDyn>> = arrays.iter().map(|a| a.view()).collect();
    stack(Axis(0), &views)
        .map_err(|e| DataError::Config(format!("failed to batch {}: {}", what, e)))
}

/// Stack samples into a batch, dropping the time axis when `squeeze` is set
fn assemble(samples: Vec<Sample>, squeeze: bool) -> Result<Batch> {
    let mut features = Vec::with_capacity(samples.len());
    let mut targets = Vec::with_capacity(samples.len());
    for sample in samples {
        features.push(sample.features.into_dyn());
        targets.push(sample.target.into_dyn());
    }

    let mut features = stack_dyn(&features, "features")?;
    if squeeze {
        features = features.index_axis_move(Axis(1), 0);
    }
    let targets = stack_dyn(&targets, "targets")?;
    Ok(Batch { features, targets })
}
