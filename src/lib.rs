//! # Hydra router: partitioning discordant paired-end mappings for breakpoint clustering.
//!
//! Structural variant callers such as Hydra look for clusters of discordant read pairs: pairs whose ends map to different chromosomes, or too far apart, or with an unexpected orientation.
//! Before clustering, the discordant mappings of all samples are routed into bucket files.
//! Each bucket holds the pairs that share a chromosome pair and a strand pair, so that the clustering stage can process one bucket at a time.
//!
//! The routing pipeline consists of the following steps:
//!
//! 1. [`LibraryProfileTable`] loads the insert-size statistics of each sample from a configuration file.
//! 2. [`PairReader`] reads the discordant mapping file of a sample as [`AlignmentPair`] records.
//! 3. [`DiscordanceClassifier`] assigns support to the alignments of each read and decides which pairs are [`Classification::Discordant`].
//! 4. [`resolve`] maps a pair to its [`BucketKey`], which is the same for the pair and its mirror image.
//! 5. [`BucketRouter`] appends the discordant pairs to a [`BucketStore`], which buffers the records within a memory budget and appends them to the bucket files.
//! 6. [`write_manifest`] lists the non-empty bucket files.
//!
//! [`RoutingEngine`] ties the steps together and distributes the samples over worker threads.
//! [`route_discordant_mappings`] runs the entire pipeline.
//!
//! ### File formats
//!
//! See [`profile`] for the configuration file and [`record`] for the alignment pair format.
//! Bucket files use the same format as the input, with the ends in canonical order and two extra fields: sample id and support.
//! Input files may be gzip-compressed.

pub mod bucket;
pub mod classify;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod profile;
pub mod record;
pub mod router;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod internal;

pub use bucket::{resolve, BucketKey, StrandPair};
pub use classify::{classify, Classification, ClassifierOptions, DiscordanceClassifier};
pub use classify::{BestMappings, GivenMappings, MappingUsage, PairOrientation, SupportPolicy};
pub use engine::{route_discordant_mappings, RouterParams, RouterState, RoutingEngine, RoutingSummary, SampleSummary};
pub use error::{Result, RouterError};
pub use manifest::{read_manifest, write_manifest};
pub use profile::{LibraryProfile, LibraryProfileTable};
pub use record::{AlignmentPair, PairEnd, PairReader, Strand};
pub use router::BucketRouter;
pub use store::{BucketStore, StoreParams, StoreStatistics};
