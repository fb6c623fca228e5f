//! Routing the discordant mappings of all samples into bucket files.
//!
//! [`RoutingEngine`] owns the library profiles, the classifier, and the bucket store.
//! It moves through the states of [`RouterState`]:
//!
//! 1. `Idle`: created without profiles.
//! 2. `Loading`: reading the configuration file.
//! 3. `Routing`: accepting records.
//! 4. `Flushing`: writing the remaining buffers.
//! 5. `Finalized`: all bucket files are complete.
//!
//! Any fatal error moves the engine to `Failed`, after which every operation fails.
//! Malformed records are not fatal; they are counted in the [`RoutingSummary`] and skipped.
//!
//! [`route_discordant_mappings`] runs the whole pipeline and writes the manifest.

use crate::classify::{Classification, ClassifierOptions, DiscordanceClassifier};
use crate::error::{Result, RouterError};
use crate::manifest;
use crate::profile::{LibraryProfile, LibraryProfileTable};
use crate::record::{AlignmentPair, PairReader};
use crate::router::BucketRouter;
use crate::store::{BucketStore, StoreParams, StoreStatistics};
use crate::utils;

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};


//-----------------------------------------------------------------------------

/// Parameters for a routing run.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterParams {
    /// Options for classifying alignment pairs.
    pub classifier: ClassifierOptions,
    /// Route the `+-` and `-+` configurations of a chromosome pair to the same bucket.
    pub lump_inversions: bool,
    /// Parameters for the bucket store.
    pub store: StoreParams,
    /// Number of worker threads.
    pub threads: usize,
    /// Fail a sample if the fraction of malformed records exceeds this.
    pub max_skip_fraction: Option<f64>,
    /// Log progress information for each sample.
    pub progress: bool,
}

impl RouterParams {
    /// Default for `threads`.
    pub const DEFAULT_THREADS: usize = 1;

    /// Returns default parameters with bucket files placed next to the manifest.
    ///
    /// The bucket file prefix is the file name of the manifest without the extension.
    ///
    /// # Examples
    ///
    /// ```
    /// use hydra_router::RouterParams;
    /// use std::path::Path;
    ///
    /// let params = RouterParams::for_manifest("out/routed.txt");
    /// assert_eq!(params.store.output_dir, Path::new("out"));
    /// assert_eq!(params.store.prefix, "routed");
    /// ```
    pub fn for_manifest<P: AsRef<Path>>(manifest: P) -> Self {
        let manifest = manifest.as_ref();
        let output_dir = match manifest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = manifest.file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| StoreParams::DEFAULT_PREFIX.to_string());
        RouterParams {
            store: StoreParams::new(output_dir, &prefix),
            ..RouterParams::default()
        }
    }
}

impl Default for RouterParams {
    fn default() -> Self {
        RouterParams {
            classifier: ClassifierOptions::default(),
            lump_inversions: false,
            store: StoreParams::default(),
            threads: Self::DEFAULT_THREADS,
            max_skip_fraction: None,
            progress: false,
        }
    }
}

//-----------------------------------------------------------------------------

/// Lifecycle state of a [`RoutingEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouterState {
    /// Created without library profiles.
    Idle,
    /// Loading the library profiles.
    Loading,
    /// Accepting records.
    Routing,
    /// Writing the remaining buffers.
    Flushing,
    /// All bucket files are complete.
    Finalized,
    /// A fatal error occurred.
    Failed,
}

impl Display for RouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RouterState::Idle => "idle",
            RouterState::Loading => "loading",
            RouterState::Routing => "routing",
            RouterState::Flushing => "flushing",
            RouterState::Finalized => "finalized",
            RouterState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

//-----------------------------------------------------------------------------

/// Record counts for a sample.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleSummary {
    /// Sample identifier.
    pub sample: String,
    /// Records read, including malformed ones.
    pub records: usize,
    /// Malformed records that were skipped.
    pub skipped: usize,
    /// Discordant records routed to buckets.
    pub discordant: usize,
    /// Concordant records.
    pub concordant: usize,
    /// Records with less support than required.
    pub unsupported: usize,
    /// Records for a sample without a library profile.
    pub unknown_sample: usize,
}

impl SampleSummary {
    /// Creates an empty summary for the sample.
    pub fn new(sample: &str) -> Self {
        SampleSummary { sample: sample.to_string(), ..SampleSummary::default() }
    }

    /// Returns the fraction of records that were skipped.
    pub fn skipped_fraction(&self) -> f64 {
        if self.records == 0 { 0.0 } else { self.skipped as f64 / self.records as f64 }
    }

    // Adds the counts from the other summary.
    fn add(&mut self, other: &SampleSummary) {
        self.records += other.records;
        self.skipped += other.skipped;
        self.discordant += other.discordant;
        self.concordant += other.concordant;
        self.unsupported += other.unsupported;
        self.unknown_sample += other.unknown_sample;
    }

    fn count(&mut self, classification: Classification) {
        match classification {
            Classification::Discordant => self.discordant += 1,
            Classification::Concordant => self.concordant += 1,
            Classification::Unsupported => self.unsupported += 1,
        }
    }
}

impl Display for SampleSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f, "{}: {} records, {} discordant, {} concordant, {} unsupported, {} skipped",
            self.sample, self.records, self.discordant, self.concordant, self.unsupported, self.skipped
        )?;
        if self.unknown_sample > 0 {
            write!(f, ", {} without a profile", self.unknown_sample)?;
        }
        Ok(())
    }
}

/// Summary of a routing run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingSummary {
    /// Per-sample counts in the order the samples were first routed.
    pub samples: Vec<SampleSummary>,
    /// Statistics from the bucket store, available after finalization.
    pub store: StoreStatistics,
}

impl RoutingSummary {
    /// Returns the counts for the sample.
    pub fn sample(&self, sample: &str) -> Option<&SampleSummary> {
        self.samples.iter().find(|summary| summary.sample == sample)
    }

    /// Returns the counts over all samples.
    pub fn total(&self) -> SampleSummary {
        let mut result = SampleSummary::new("total");
        for summary in self.samples.iter() {
            result.add(summary);
        }
        result
    }

    // Adds the counts to the existing entry for the sample or creates a new entry.
    fn record(&mut self, summary: &SampleSummary) {
        match self.samples.iter_mut().find(|existing| existing.sample == summary.sample) {
            Some(existing) => existing.add(summary),
            None => self.samples.push(summary.clone()),
        }
    }
}

//-----------------------------------------------------------------------------

/// Engine for routing discordant alignment pairs into bucket files.
///
/// # Examples
///
/// ```
/// use hydra_router::{AlignmentPair, PairEnd, Strand, LibraryProfile, LibraryProfileTable};
/// use hydra_router::{RouterParams, RouterState, RoutingEngine};
/// use std::{env, fs, process};
/// use std::path::Path;
///
/// let output_dir = env::temp_dir().join(format!("hydra-engine-doc-{}", process::id()));
/// fs::create_dir_all(&output_dir).unwrap();
/// let params = RouterParams::for_manifest(output_dir.join("routed.txt"));
///
/// let mut profiles = LibraryProfileTable::new();
/// profiles.insert(LibraryProfile::new("s1", Path::new("s1.bedpe"), 500.0, 50.0, 3.0));
/// let mut engine = RoutingEngine::with_profiles(params, profiles);
/// assert_eq!(engine.state(), RouterState::Routing);
///
/// let first = PairEnd::new("chr1", 10_000, 10_100, Strand::Forward, 0);
/// let second = PairEnd::new("chr1", 11_900, 12_000, Strand::Forward, 0);
/// let record = AlignmentPair::new("s1", "read1", first, second);
/// let summaries = engine.route_records(vec![record]).unwrap();
/// assert_eq!(summaries[0].discordant, 1);
///
/// let files = engine.finalize().unwrap();
/// assert_eq!(files, vec![output_dir.join("routed.chr1.chr1.pp.bedpe")]);
/// assert!(engine.route_records(Vec::new()).is_err());
/// fs::remove_dir_all(&output_dir).unwrap();
/// ```
#[derive(Debug)]
pub struct RoutingEngine {
    params: RouterParams,
    classifier: DiscordanceClassifier,
    profiles: LibraryProfileTable,
    store: Option<BucketStore>,
    state: RouterState,
    summary: RoutingSummary,
}

impl RoutingEngine {
    // Log at most this many malformed records per sample.
    const MAX_SKIP_WARNINGS: usize = 10;

    /// Creates an engine without library profiles.
    pub fn new(params: RouterParams) -> Self {
        let classifier = DiscordanceClassifier::new(params.classifier.clone());
        Self::with_classifier(params, classifier)
    }

    /// Creates an engine with a custom classifier.
    ///
    /// The classifier replaces the one that would be built from `params.classifier`.
    pub fn with_classifier(params: RouterParams, classifier: DiscordanceClassifier) -> Self {
        let store = BucketStore::new(params.store.clone());
        RoutingEngine {
            params,
            classifier,
            profiles: LibraryProfileTable::new(),
            store: Some(store),
            state: RouterState::Idle,
            summary: RoutingSummary::default(),
        }
    }

    /// Creates an engine that is ready to route records for the given profiles.
    pub fn with_profiles(params: RouterParams, profiles: LibraryProfileTable) -> Self {
        let mut result = Self::new(params);
        result.profiles = profiles;
        result.state = RouterState::Routing;
        result
    }

    /// Returns the parameters.
    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    /// Returns the current state.
    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Returns the library profiles.
    pub fn profiles(&self) -> &LibraryProfileTable {
        &self.profiles
    }

    /// Returns the summary of the records routed so far.
    pub fn summary(&self) -> &RoutingSummary {
        &self.summary
    }

    /// Consumes the engine and returns the summary.
    pub fn into_summary(self) -> RoutingSummary {
        self.summary
    }

    fn require(&self, state: RouterState, operation: &str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(RouterError::InvalidState(format!("cannot {} in state {}", operation, self.state)))
        }
    }

    fn fail(&mut self, error: RouterError) -> RouterError {
        warn!("Routing failed: {}", error);
        self.state = RouterState::Failed;
        error
    }

    fn store(&self) -> Result<&BucketStore> {
        self.store.as_ref().ok_or_else(|| RouterError::InvalidState(String::from("the bucket store has been closed")))
    }

    //-------------------------------------------------------------------------

    /// Loads the library profiles from the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] if the file cannot be read or parsed, and [`RouterError::InvalidState`] if the engine is not idle.
    pub fn load_profiles<P: AsRef<Path>>(&mut self, config: P) -> Result<()> {
        self.require(RouterState::Idle, "load profiles")?;
        self.state = RouterState::Loading;
        info!("Loading library profiles from {}", config.as_ref().display());
        match LibraryProfileTable::load(&config) {
            Ok(profiles) => {
                info!("Loaded {} library profiles", profiles.len());
                self.profiles = profiles;
                self.state = RouterState::Routing;
                Ok(())
            },
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Routes the records in the file as records of the given sample.
    ///
    /// If the sample has no profile, the records are counted and skipped.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the file cannot be read, a bucket file cannot be written, or there are too many malformed records.
    /// The engine is then in the `Failed` state.
    pub fn route_file<P: AsRef<Path>>(&mut self, sample: &str, filename: P) -> Result<SampleSummary> {
        self.require(RouterState::Routing, "route records")?;
        let cancel = AtomicBool::new(false);
        match self.process_file(sample, filename.as_ref(), &cancel) {
            Ok(summary) => {
                self.summary.record(&summary);
                Ok(summary)
            },
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Routes a stream of records.
    ///
    /// Consecutive records with the same sample and read identifier form a read group for support assignment.
    /// Returns the counts for each sample in the stream.
    pub fn route_records<I: IntoIterator<Item = AlignmentPair>>(&mut self, records: I) -> Result<Vec<SampleSummary>> {
        self.require(RouterState::Routing, "route records")?;
        match self.process_records(records) {
            Ok(summaries) => {
                for summary in summaries.iter() {
                    self.summary.record(summary);
                }
                Ok(summaries)
            },
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Routes the files of all samples in the profile table using the configured number of threads.
    ///
    /// The first fatal error stops the remaining workers and is returned.
    pub fn route_all(&mut self) -> Result<()> {
        self.require(RouterState::Routing, "route samples")?;
        let start_time = Instant::now();
        match self.process_all() {
            Ok(summaries) => {
                for summary in summaries.iter() {
                    self.summary.record(summary);
                }
                let total = self.summary.total();
                info!(
                    "Routed {} discordant records from {} samples in {:.2} seconds",
                    total.discordant, summaries.len(), start_time.elapsed().as_secs_f64()
                );
                Ok(())
            },
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Writes the remaining buffers and returns the non-empty bucket files in key order.
    ///
    /// No records can be routed after finalization.
    pub fn finalize(&mut self) -> Result<Vec<PathBuf>> {
        self.require(RouterState::Routing, "finalize")?;
        self.state = RouterState::Flushing;
        let store = match self.store.take() {
            Some(store) => store,
            None => return Err(self.fail(RouterError::InvalidState(String::from("the bucket store has been closed")))),
        };
        if let Err(err) = store.flush_all() {
            return Err(self.fail(err));
        }
        self.summary.store = store.statistics();
        match store.finalize() {
            Ok(files) => {
                self.state = RouterState::Finalized;
                info!(
                    "Wrote {} records ({}) to {} bucket files",
                    self.summary.store.records_written, utils::human_readable_size(self.summary.store.bytes_written), files.len()
                );
                Ok(files)
            },
            Err(err) => Err(self.fail(err)),
        }
    }

    //-------------------------------------------------------------------------

    fn process_all(&self) -> Result<Vec<SampleSummary>> {
        let profiles: Vec<&LibraryProfile> = self.profiles.iter().collect();
        let threads = self.params.threads.clamp(1, profiles.len().max(1));
        info!("Routing {} samples using {} threads", profiles.len(), threads);

        let next = AtomicUsize::new(0);
        let cancel = AtomicBool::new(false);
        let results: Vec<Result<Vec<(usize, SampleSummary)>>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(threads);
            for _ in 0..threads {
                handles.push(scope.spawn(|| self.worker(&profiles, &next, &cancel)));
            }
            handles.into_iter().map(|handle| {
                handle.join().unwrap_or_else(|_| Err(RouterError::InvalidState(String::from("a worker thread panicked"))))
            }).collect()
        });

        let mut routed: Vec<(usize, SampleSummary)> = Vec::with_capacity(profiles.len());
        for result in results {
            routed.extend(result?);
        }
        routed.sort_unstable_by_key(|(index, _)| *index);
        Ok(routed.into_iter().map(|(_, summary)| summary).collect())
    }

    // Takes samples from the shared queue until it is empty or another worker has failed.
    fn worker(&self, profiles: &[&LibraryProfile], next: &AtomicUsize, cancel: &AtomicBool) -> Result<Vec<(usize, SampleSummary)>> {
        let mut result = Vec::new();
        while !cancel.load(Ordering::SeqCst) {
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(profile) = profiles.get(index) else {
                break;
            };
            match self.process_file(&profile.sample, &profile.file, cancel) {
                Ok(summary) => result.push((index, summary)),
                Err(err) => {
                    cancel.store(true, Ordering::SeqCst);
                    return Err(err);
                },
            }
        }
        Ok(result)
    }

    fn process_file(&self, sample: &str, filename: &Path, cancel: &AtomicBool) -> Result<SampleSummary> {
        let store = self.store()?;
        let router = BucketRouter::new(store, self.params.lump_inversions);
        let profile = self.profiles.get(sample);
        let mut summary = SampleSummary::new(sample);
        let start_time = Instant::now();
        if self.params.progress {
            info!("Routing sample {} from {}", sample, filename.display());
        }

        let mut reader = PairReader::open(filename, sample)?;
        let mut group: Vec<AlignmentPair> = Vec::new();
        while let Some(result) = reader.next() {
            if cancel.load(Ordering::Relaxed) {
                return Ok(summary);
            }
            summary.records += 1;
            let record = match result {
                Ok(record) => record,
                Err(err) if !err.is_fatal() => {
                    Self::skip(&mut summary, &err);
                    continue;
                },
                Err(err) => return Err(err),
            };
            if self.classifier.requires_mapping_count() && record.mappings.is_none() {
                let err = RouterError::RecordFormat {
                    path: filename.to_path_buf(),
                    line: reader.lines_read(),
                    reason: String::from("missing number of mappings"),
                };
                Self::skip(&mut summary, &err);
                continue;
            }
            if group.last().is_some_and(|last| last.read != record.read) {
                self.route_group(&router, profile, &mut group, &mut summary)?;
            }
            group.push(record);
        }
        self.route_group(&router, profile, &mut group, &mut summary)?;

        if let Some(limit) = self.params.max_skip_fraction {
            if summary.skipped_fraction() > limit {
                return Err(RouterError::SkipLimit {
                    path: filename.to_path_buf(),
                    skipped: summary.skipped,
                    total: summary.records,
                    limit,
                });
            }
        }
        if summary.unknown_sample > 0 {
            warn!("Skipped {} records for sample {} without a library profile", summary.unknown_sample, sample);
        }
        if self.params.progress {
            info!("{} ({:.2} seconds)", summary, start_time.elapsed().as_secs_f64());
        } else {
            debug!("{}", summary);
        }
        Ok(summary)
    }

    fn process_records<I: IntoIterator<Item = AlignmentPair>>(&self, records: I) -> Result<Vec<SampleSummary>> {
        let store = self.store()?;
        let router = BucketRouter::new(store, self.params.lump_inversions);
        let mut summaries: Vec<SampleSummary> = Vec::new();
        let mut group: Vec<AlignmentPair> = Vec::new();

        for record in records {
            let index = Self::summary_index(&mut summaries, &record.sample);
            summaries[index].records += 1;
            if self.classifier.requires_mapping_count() && record.mappings.is_none() {
                summaries[index].skipped += 1;
                warn!("Skipping read {} of sample {}: missing number of mappings", record.read, record.sample);
                continue;
            }
            if group.last().is_some_and(|last| last.sample != record.sample || last.read != record.read) {
                self.route_stream_group(&router, &mut group, &mut summaries)?;
            }
            group.push(record);
        }
        self.route_stream_group(&router, &mut group, &mut summaries)?;
        Ok(summaries)
    }

    fn summary_index(summaries: &mut Vec<SampleSummary>, sample: &str) -> usize {
        match summaries.iter().position(|summary| summary.sample == sample) {
            Some(index) => index,
            None => {
                summaries.push(SampleSummary::new(sample));
                summaries.len() - 1
            },
        }
    }

    fn route_stream_group(&self, router: &BucketRouter, group: &mut Vec<AlignmentPair>, summaries: &mut Vec<SampleSummary>) -> Result<()> {
        let Some(first) = group.first() else {
            return Ok(());
        };
        let sample = first.sample.clone();
        let index = Self::summary_index(summaries, &sample);
        self.route_group(router, self.profiles.get(&sample), group, &mut summaries[index])
    }

    // Assigns support to the read group, classifies the alignments, and routes the discordant ones.
    // The group is empty afterwards.
    fn route_group(
        &self, router: &BucketRouter, profile: Option<&LibraryProfile>,
        group: &mut Vec<AlignmentPair>, summary: &mut SampleSummary
    ) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        let Some(profile) = profile else {
            summary.unknown_sample += group.len();
            group.clear();
            return Ok(());
        };

        self.classifier.assign_support(group);
        for record in group.drain(..) {
            let classification = self.classifier.classify(&record, profile);
            summary.count(classification);
            router.route(record, classification)?;
        }
        Ok(())
    }

    fn skip(summary: &mut SampleSummary, error: &RouterError) {
        summary.skipped += 1;
        if summary.skipped <= Self::MAX_SKIP_WARNINGS {
            warn!("Skipping a record: {}", error);
        } else if summary.skipped == Self::MAX_SKIP_WARNINGS + 1 {
            warn!("Not reporting further malformed records for sample {}", summary.sample);
        }
    }
}

//-----------------------------------------------------------------------------

/// Routes the discordant mappings of all samples in the configuration file and writes the manifest.
///
/// The output directory is created if necessary.
/// The manifest is written only if routing succeeds.
///
/// # Errors
///
/// Returns the first fatal error.
/// Bucket files written before the error may remain on disk.
///
/// # Examples
///
/// ```no_run
/// use hydra_router::{route_discordant_mappings, RouterParams};
///
/// let params = RouterParams::for_manifest("routed.txt");
/// let summary = route_discordant_mappings("samples.cfg", "routed.txt", &params).unwrap();
/// println!("{}", summary.total());
/// ```
pub fn route_discordant_mappings<P: AsRef<Path>, Q: AsRef<Path>>(
    config: P,
    manifest: Q,
    params: &RouterParams,
) -> Result<RoutingSummary> {
    let output_dir = &params.store.output_dir;
    fs::create_dir_all(output_dir).map_err(|err| RouterError::io(output_dir, err))?;

    let mut engine = RoutingEngine::new(params.clone());
    engine.load_profiles(config)?;
    engine.route_all()?;
    let files = engine.finalize()?;
    manifest::write_manifest(&manifest, &files)?;
    info!("Wrote {} bucket files to manifest {}", files.len(), manifest.as_ref().display());

    let summary = engine.into_summary();
    for sample in summary.samples.iter() {
        info!("{}", sample);
    }
    Ok(summary)
}

//-----------------------------------------------------------------------------
