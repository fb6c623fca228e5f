//! Memory-bounded buffering of routed records into per-bucket files.
//!
//! Each bucket buffers its serialized records in memory.
//! The store tracks the total number of buffered bytes across buckets.
//! When the total exceeds the memory budget, the thread that crossed it runs a flush cycle:
//! it swaps out the largest buffers until the total is at most half of the budget and appends them to the bucket files.
//!
//! Bucket files are opened only for the duration of a write, so the number of buckets is not limited by file descriptors.
//! The first write to a bucket file truncates it; later writes append.
//!
//! ### Concurrency
//!
//! Appends to different buckets only share the atomic byte counter.
//! Selecting buckets and swapping out their buffers happens under a store-wide flush lock, but the writes happen after releasing it.
//! Each swapped-out batch gets a ticket from its bucket, and batches are written in ticket order.
//! Hence records appear in each bucket file in the order they were appended, even when several threads flush the same bucket.

use crate::bucket::BucketKey;
use crate::error::{Result, RouterError};
use crate::record::AlignmentPair;
use crate::utils;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Parameters for [`BucketStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreParams {
    /// Maximum number of buffered bytes before a flush cycle starts.
    pub memory_budget: u64,
    /// Directory for the bucket files.
    pub output_dir: PathBuf,
    /// Prefix of bucket file names.
    pub prefix: String,
}

impl StoreParams {
    /// Default for `memory_budget` (8 GiB).
    pub const DEFAULT_MEMORY_BUDGET: u64 = 8 * utils::GIB;
    /// Default for `prefix`.
    pub const DEFAULT_PREFIX: &'static str = "hydra";

    /// Creates parameters with the default memory budget.
    pub fn new<P: AsRef<Path>>(output_dir: P, prefix: &str) -> Self {
        StoreParams {
            memory_budget: Self::DEFAULT_MEMORY_BUDGET,
            output_dir: output_dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
        }
    }

    /// Returns the path of the file for the bucket.
    pub fn bucket_file(&self, key: &BucketKey) -> PathBuf {
        self.output_dir.join(key.file_name(&self.prefix))
    }
}

impl Default for StoreParams {
    fn default() -> Self {
        Self::new(".", Self::DEFAULT_PREFIX)
    }
}

//-----------------------------------------------------------------------------

/// Statistics on the buffering and writing of a [`BucketStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    /// Number of buckets created.
    pub buckets: usize,
    /// Currently buffered bytes.
    pub buffered_bytes: u64,
    /// Largest number of buffered bytes observed after an append.
    pub peak_buffered_bytes: u64,
    /// Number of flush cycles triggered by the memory budget.
    pub flush_cycles: usize,
    /// Number of batches written to bucket files.
    pub batches_written: usize,
    /// Number of records written to bucket files.
    pub records_written: usize,
    /// Number of bytes written to bucket files.
    pub bytes_written: u64,
}

//-----------------------------------------------------------------------------

// Poisoning only happens if another thread panicked; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|err| err.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|err| err.into_inner())
}

// Records waiting in memory.
#[derive(Debug, Default)]
struct PendingRecords {
    buffer: Vec<u8>,
    records: usize,
    next_ticket: u64,
}

// Progress of writing to the bucket file.
#[derive(Debug, Default)]
struct FileState {
    tickets_written: u64,
    records: usize,
    bytes: u64,
    failed: bool,
}

#[derive(Debug)]
struct Bucket {
    key: BucketKey,
    path: PathBuf,
    pending: Mutex<PendingRecords>,
    file: Mutex<FileState>,
    turn: Condvar,
}

// Records swapped out of a bucket.
struct Batch {
    bucket: Arc<Bucket>,
    data: Vec<u8>,
    records: usize,
    ticket: u64,
}

impl Bucket {
    fn new(key: BucketKey, path: PathBuf) -> Self {
        Bucket {
            key, path,
            pending: Mutex::new(PendingRecords::default()),
            file: Mutex::new(FileState::default()),
            turn: Condvar::new(),
        }
    }

    fn buffered(&self) -> usize {
        lock(&self.pending).buffer.len()
    }

    // Swaps out the pending records, or returns `None` if there are none.
    // The caller must subtract the size of the batch from the buffered bytes.
    fn take_batch(self: &Arc<Self>) -> Option<Batch> {
        let mut pending = lock(&self.pending);
        if pending.buffer.is_empty() {
            return None;
        }
        let ticket = pending.next_ticket;
        pending.next_ticket += 1;
        let records = pending.records;
        pending.records = 0;
        Some(Batch {
            bucket: self.clone(),
            data: std::mem::take(&mut pending.buffer),
            records,
            ticket,
        })
    }

    // Writes the batch once all earlier batches of this bucket have been written.
    // The turn always advances, even if the write fails.
    fn write_batch(&self, data: &[u8], records: usize, ticket: u64) -> Result<()> {
        let mut file = lock(&self.file);
        while file.tickets_written != ticket {
            file = self.turn.wait(file).unwrap_or_else(|err| err.into_inner());
        }

        let result = if file.failed {
            Err(RouterError::InvalidState(format!("an earlier write to {} failed", self.path.display())))
        } else {
            self.append_to_file(data, file.tickets_written == 0)
        };
        match result {
            Ok(_) => {
                file.records += records;
                file.bytes += data.len() as u64;
            },
            Err(_) => file.failed = true,
        }
        file.tickets_written += 1;
        self.turn.notify_all();
        result
    }

    fn append_to_file(&self, data: &[u8], first: bool) -> Result<()> {
        let mut options = OpenOptions::new();
        if first {
            options.write(true).create(true).truncate(true);
        } else {
            options.append(true).create(true);
        }
        let mut file = options.open(&self.path).map_err(|x| RouterError::io(&self.path, x))?;
        file.write_all(data).map_err(|x| RouterError::io(&self.path, x))?;
        file.flush().map_err(|x| RouterError::io(&self.path, x))?;
        Ok(())
    }
}

//-----------------------------------------------------------------------------

/// Buffers routed records per bucket and writes them to bucket files under a global memory budget.
///
/// Buckets are created lazily when the first record is appended to them.
/// The store can be shared between threads.
/// [`BucketStore::finalize`] flushes the remaining records and returns the non-empty bucket files.
/// It consumes the store, so no records can be appended after it.
///
/// # Examples
///
/// ```
/// use hydra_router::{AlignmentPair, PairEnd, Strand, BucketStore, StoreParams, resolve};
/// use std::{env, fs};
///
/// let output_dir = env::temp_dir().join(format!("hydra-store-doctest-{}", std::process::id()));
/// fs::create_dir_all(&output_dir).unwrap();
/// let store = BucketStore::new(StoreParams::new(&output_dir, "example"));
///
/// let first = PairEnd::new("chr1", 100, 200, Strand::Forward, 0);
/// let second = PairEnd::new("chr2", 500, 600, Strand::Reverse, 1);
/// let record = AlignmentPair::new("s1", "read1", first, second);
/// let key = resolve(&record, false);
/// store.append(&key, &record).unwrap();
/// assert_eq!(store.buckets(), 1);
///
/// let files = store.finalize().unwrap();
/// assert_eq!(files, vec![output_dir.join("example.chr1.chr2.pm.bedpe")]);
/// let contents = fs::read_to_string(&files[0]).unwrap();
/// assert!(contents.starts_with("chr1\t100\t200\tchr2\t500\t600\tread1"));
/// fs::remove_dir_all(&output_dir).unwrap();
/// ```
#[derive(Debug)]
pub struct BucketStore {
    params: StoreParams,
    buckets: RwLock<HashMap<BucketKey, Arc<Bucket>>>,
    buffered: AtomicU64,
    peak: AtomicU64,
    flush_lock: Mutex<()>,
    flush_cycles: AtomicUsize,
    batches_written: AtomicUsize,
}

impl BucketStore {
    /// Creates an empty store.
    pub fn new(params: StoreParams) -> Self {
        BucketStore {
            params,
            buckets: RwLock::new(HashMap::new()),
            buffered: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
            flush_cycles: AtomicUsize::new(0),
            batches_written: AtomicUsize::new(0),
        }
    }

    /// Returns the parameters.
    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    /// Returns the number of buckets.
    pub fn buckets(&self) -> usize {
        read(&self.buckets).len()
    }

    /// Returns the number of bytes currently buffered in memory.
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered.load(Ordering::SeqCst)
    }

    // Returns the bucket for the key, creating it if necessary.
    fn bucket(&self, key: &BucketKey) -> Arc<Bucket> {
        if let Some(bucket) = read(&self.buckets).get(key) {
            return bucket.clone();
        }
        let mut buckets = write(&self.buckets);
        buckets.entry(key.clone()).or_insert_with(|| {
            Arc::new(Bucket::new(key.clone(), self.params.bucket_file(key)))
        }).clone()
    }

    /// Appends the record to the bucket.
    ///
    /// If the buffered bytes exceed the memory budget after the append, this thread runs a flush cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Io`] if the flush cycle fails to write a bucket file.
    pub fn append(&self, key: &BucketKey, record: &AlignmentPair) -> Result<()> {
        let bucket = self.bucket(key);
        let total = {
            // The counter is updated while holding the bucket lock, so that a concurrent swap never subtracts bytes that were not added yet.
            let mut pending = lock(&bucket.pending);
            let before = pending.buffer.len();
            record.append_bedpe(&mut pending.buffer);
            pending.records += 1;
            let len = (pending.buffer.len() - before) as u64;
            self.buffered.fetch_add(len, Ordering::SeqCst) + len
        };
        self.peak.fetch_max(total, Ordering::SeqCst);

        if total > self.params.memory_budget {
            self.flush_cycle()?;
        }
        Ok(())
    }

    /// Flushes the largest buffers until the buffered bytes are at most half of the memory budget.
    ///
    /// Does nothing if the buffered bytes are already within the budget.
    /// Returns the number of batches written.
    pub fn flush_cycle(&self) -> Result<usize> {
        let batches = {
            let _guard = lock(&self.flush_lock);
            let buffered = self.buffered_bytes();
            if buffered <= self.params.memory_budget {
                return Ok(0);
            }
            let target = self.params.memory_budget / 2;

            let mut candidates: Vec<(usize, Arc<Bucket>)> = read(&self.buckets).values()
                .map(|bucket| (bucket.buffered(), bucket.clone()))
                .filter(|(size, _)| *size > 0)
                .collect();
            candidates.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.key.cmp(&b.1.key)));

            let mut batches = Vec::new();
            for (_, bucket) in candidates {
                if self.buffered_bytes() <= target {
                    break;
                }
                if let Some(batch) = bucket.take_batch() {
                    self.buffered.fetch_sub(batch.data.len() as u64, Ordering::SeqCst);
                    batches.push(batch);
                }
            }
            self.flush_cycles.fetch_add(1, Ordering::SeqCst);
            batches
        };

        let count = batches.len();
        debug!(
            "Flush cycle: writing {} batches ({} still buffered)",
            count, utils::human_readable_size(self.buffered_bytes())
        );
        self.write_batches(batches)?;
        Ok(count)
    }

    /// Writes all buffered records to the bucket files.
    pub fn flush_all(&self) -> Result<()> {
        let batches: Vec<Batch> = {
            let _guard = lock(&self.flush_lock);
            let mut buckets: Vec<Arc<Bucket>> = read(&self.buckets).values().cloned().collect();
            buckets.sort_unstable_by(|a, b| a.key.cmp(&b.key));
            buckets.iter().filter_map(|bucket| {
                let batch = bucket.take_batch()?;
                self.buffered.fetch_sub(batch.data.len() as u64, Ordering::SeqCst);
                Some(batch)
            }).collect()
        };
        self.write_batches(batches)
    }

    // Writes the batches and returns the first error.
    // Every batch is processed, so that the write turns of the buckets keep advancing.
    fn write_batches(&self, batches: Vec<Batch>) -> Result<()> {
        let mut result = Ok(());
        for batch in batches {
            let written = batch.bucket.write_batch(&batch.data, batch.records, batch.ticket);
            if written.is_ok() {
                self.batches_written.fetch_add(1, Ordering::SeqCst);
            }
            if result.is_ok() {
                result = written;
            }
        }
        result
    }

    /// Returns the current statistics.
    pub fn statistics(&self) -> StoreStatistics {
        let buckets = read(&self.buckets);
        let mut statistics = StoreStatistics {
            buckets: buckets.len(),
            buffered_bytes: self.buffered_bytes(),
            peak_buffered_bytes: self.peak.load(Ordering::SeqCst),
            flush_cycles: self.flush_cycles.load(Ordering::SeqCst),
            batches_written: self.batches_written.load(Ordering::SeqCst),
            ..StoreStatistics::default()
        };
        for bucket in buckets.values() {
            let file = lock(&bucket.file);
            statistics.records_written += file.records;
            statistics.bytes_written += file.bytes;
        }
        statistics
    }

    /// Flushes the remaining records and returns the files of non-empty buckets in key order.
    ///
    /// Consumes the store and closes all buckets.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidState`] if an earlier write to any bucket file failed, as the file is incomplete.
    pub fn finalize(self) -> Result<Vec<PathBuf>> {
        self.flush_all()?;
        let buckets = self.buckets.into_inner().unwrap_or_else(|err| err.into_inner());
        if let Some(bucket) = buckets.values().find(|bucket| lock(&bucket.file).failed) {
            return Err(RouterError::InvalidState(format!("bucket file {} is incomplete", bucket.path.display())));
        }
        let mut written: Vec<(BucketKey, PathBuf)> = buckets.into_values()
            .filter(|bucket| lock(&bucket.file).records > 0)
            .map(|bucket| (bucket.key.clone(), bucket.path.clone()))
            .collect();
        written.sort_unstable();
        Ok(written.into_iter().map(|(_, path)| path).collect())
    }
}

//-----------------------------------------------------------------------------
