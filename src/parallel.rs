use crate::error::{DataError, Result};
use crossbeam_channel::{self, Receiver, Sender};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Build a dedicated pool so pipeline work does not contend with the global one
pub fn build_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("row-loader-{}", i))
        .build()
        .map_err(|e| DataError::Worker(format!("failed to create thread pool: {}", e)))
}

/// Monitor row-loading progress
pub struct ProgressMonitor {
    total_tasks: usize,
    completed_tasks: AtomicUsize,
    start_time: Instant,
}

impl ProgressMonitor {
    pub fn new(total_tasks: usize) -> Self {
        Self {
            total_tasks,
            completed_tasks: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed_tasks.load(Ordering::Relaxed)
    }

    pub fn increment(&self) {
        let completed = self.completed_tasks.fetch_add(1, Ordering::Relaxed) + 1;

        if completed % 100 == 0 || completed == self.total_tasks {
            let elapsed = self.start_time.elapsed();
            let rate = completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            log::debug!(
                "Progress: {}/{} ({:.1}%) - Rate: {:.1} rows/s",
                completed,
                self.total_tasks,
                completed as f64 / self.total_tasks.max(1) as f64 * 100.0,
                rate
            );
        }
    }
}

/// Forward one result; `Err` means the stage should stop
fn forward<R>(tx: &Sender<Result<R>>, result: Result<R>) -> std::result::Result<(), ()> {
    let failed = result.is_err();
    tx.send(result).map_err(|_| ())?;
    if failed {
        Err(())
    } else {
        Ok(())
    }
}

/// Map `items` on a producer thread, streaming results through a bounded channel.
///
/// With more than one worker the map runs on a dedicated rayon pool and results
/// arrive in completion order. With one worker they arrive in item order. The
/// first error is forwarded and stops the stage, as does dropping the receiver.
pub fn spawn_mapper<T, R, F>(
    items: Vec<T>,
    num_workers: usize,
    capacity: usize,
    map: F,
) -> Result<(Receiver<Result<R>>, JoinHandle<()>)>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&T) -> Result<R> + Send + Sync + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let pool = if num_workers > 1 {
        Some(build_pool(num_workers)?)
    } else {
        None
    };

    let handle = thread::Builder::new()
        .name("row-producer".to_string())
        .spawn(move || match pool {
            Some(pool) => pool.install(|| {
                let _ = items
                    .par_iter()
                    .try_for_each_with(tx, |tx, item| forward(tx, map(item)));
            }),
            None => {
                for item in &items {
                    if forward(&tx, map(item)).is_err() {
                        break;
                    }
                }
            }
        })?;

    Ok((rx, handle))
}

/// Bounded shuffle buffer.
///
/// Items are held until the buffer is full; after that each pushed item evicts
/// a uniformly chosen resident. Larger buffers shuffle better and cost memory.
pub struct ShuffleBuffer<T> {
    capacity: usize,
    items: Vec<T>,
    rng: StdRng,
}

impl<T> ShuffleBuffer<T> {
    pub fn new(capacity: usize, rng: StdRng) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add an item, returning an evicted one once the buffer is full
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.items.len() < self.capacity {
            self.items.push(item);
            return None;
        }
        let idx = self.rng.random_range(0..self.items.len());
        Some(std::mem::replace(&mut self.items[idx], item))
    }

    /// Remaining items in random order
    pub fn drain(mut self) -> Vec<T> {
        self.items.shuffle(&mut self.rng);
        self.items
    }
}

/// Group items from `input` into batches on a dedicated thread.
///
/// Items optionally pass through a shuffle buffer first. The last batch may be
/// short. `assemble` turns each group into the batch value; the first error from
/// upstream or from `assemble` is forwarded and ends the stage.
pub fn spawn_batcher<R, B, F>(
    input: Receiver<Result<R>>,
    batch_size: usize,
    shuffle: Option<ShuffleBuffer<R>>,
    prefetch: usize,
    assemble: F,
) -> Result<(Receiver<Result<B>>, JoinHandle<()>)>
where
    R: Send + 'static,
    B: Send + 'static,
    F: Fn(Vec<R>) -> Result<B> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(prefetch.max(1));
    let batch_size = batch_size.max(1);

    let handle = thread::Builder::new()
        .name("batcher".to_string())
        .spawn(move || {
            let mut buffer = shuffle;
            let mut pending = Vec::with_capacity(batch_size);

            let accept = |item: R, pending: &mut Vec<R>| -> std::result::Result<(), ()> {
                pending.push(item);
                if pending.len() == batch_size {
                    let group = std::mem::replace(pending, Vec::with_capacity(batch_size));
                    forward(&tx, assemble(group))?;
                }
                Ok(())
            };

            for result in input.iter() {
                let item = match result {
                    Ok(item) => item,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                let ready = match buffer.as_mut() {
                    Some(buffer) => buffer.push(item),
                    None => Some(item),
                };
                if let Some(item) = ready {
                    if accept(item, &mut pending).is_err() {
                        return;
                    }
                }
            }

            if let Some(buffer) = buffer.take() {
                for item in buffer.drain() {
                    if accept(item, &mut pending).is_err() {
                        return;
                    }
                }
            }
            if !pending.is_empty() {
                let _ = forward(&tx, assemble(pending));
            }
        })?;

    Ok((rx, handle))
}

/// Shared counter handle for progress reporting across workers
pub fn progress(total: usize) -> Arc<ProgressMonitor> {
    Arc::new(ProgressMonitor::new(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_sequential_mapper_keeps_order() {
        let items: Vec<u32> = (0..20).collect();
        let (rx, handle) = spawn_mapper(items, 1, 4, |x| Ok(x * 2)).unwrap();
        let out: Vec<u32> = rx.iter().map(|r| r.unwrap()).collect();
        handle.join().unwrap();
        assert_eq!(out, (0..20).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_mapper_yields_everything() {
        let (rx, handle) = spawn_mapper((0..200).collect::<Vec<u32>>(), 4, 8, |x| Ok(*x)).unwrap();
        let mut out: Vec<u32> = rx.iter().map(|r| r.unwrap()).collect();
        handle.join().unwrap();
        out.sort_unstable();
        assert_eq!(out, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_mapper_stops_after_error() {
        let (rx, handle) = spawn_mapper((0..10).collect::<Vec<u32>>(), 1, 2, |x| {
            if *x == 3 {
                Err(DataError::Config("row 3".to_string()))
            } else {
                Ok(*x)
            }
        })
        .unwrap();
        let results: Vec<_> = rx.iter().collect();
        handle.join().unwrap();
        assert_eq!(results.len(), 4);
        assert!(results[3].is_err());
    }

    #[test]
    fn test_mapper_stops_when_receiver_dropped() {
        let items: Vec<u32> = (0..10_000).collect();
        let (rx, handle) = spawn_mapper(items, 2, 1, |x| Ok(*x)).unwrap();
        let first = rx.recv().unwrap().unwrap();
        assert!(first < 10_000);
        drop(rx);
        handle.join().unwrap();
    }

    #[test]
    fn test_shuffle_buffer_is_a_permutation() {
        let mut buffer = ShuffleBuffer::new(8, StdRng::seed_from_u64(11));
        let mut out = Vec::new();
        for i in 0..50 {
            out.extend(buffer.push(i));
        }
        assert_eq!(buffer.len(), 8);
        out.extend(buffer.drain());
        assert_ne!(out, (0..50).collect::<Vec<_>>());
        out.sort_unstable();
        assert_eq!(out, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_batcher_groups_with_short_tail() {
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..10u32 {
            tx.send(Ok(i)).unwrap();
        }
        drop(tx);
        let (batches, handle) = spawn_batcher(rx, 4, None, 1, Ok).unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.unwrap().len()).collect();
        handle.join().unwrap();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_batcher_forwards_upstream_error() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Ok(1u32)).unwrap();
        tx.send(Err(DataError::Config("bad row".to_string()))).unwrap();
        tx.send(Ok(2u32)).unwrap();
        drop(tx);
        let (batches, handle) = spawn_batcher(rx, 4, None, 1, Ok).unwrap();
        let results: Vec<_> = batches.iter().collect();
        handle.join().unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(DataError::Config(_))));
    }

    #[test]
    fn test_progress_monitor_counts() {
        let monitor = progress(3);
        for _ in 0..3 {
            monitor.increment();
        }
        assert_eq!(monitor.completed(), 3);
    }
}
