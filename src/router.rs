//! Routing classified alignment pairs to their buckets.

use crate::bucket::{self, BucketKey};
use crate::classify::Classification;
use crate::error::Result;
use crate::record::AlignmentPair;
use crate::store::BucketStore;

//-----------------------------------------------------------------------------

/// Routes discordant pairs into a [`BucketStore`].
///
/// The router is stateless apart from the store it delegates to.
/// Each pair is written in canonical orientation, so all records in a bucket file list the chromosomes in the same order.
#[derive(Clone, Copy, Debug)]
pub struct BucketRouter<'a> {
    store: &'a BucketStore,
    lump_inversions: bool,
}

impl<'a> BucketRouter<'a> {
    /// Creates a router for the store.
    pub fn new(store: &'a BucketStore, lump_inversions: bool) -> Self {
        BucketRouter { store, lump_inversions }
    }

    /// Returns `true` if inversion strand configurations share a bucket.
    pub fn lump_inversions(&self) -> bool {
        self.lump_inversions
    }

    /// Returns the bucket for the pair.
    pub fn key(&self, record: &AlignmentPair) -> BucketKey {
        bucket::resolve(record, self.lump_inversions)
    }

    /// Appends the pair to its bucket if it was classified as discordant.
    ///
    /// Returns the bucket key, or `None` if the pair was not routed.
    pub fn route(&self, mut record: AlignmentPair, classification: Classification) -> Result<Option<BucketKey>> {
        if !classification.is_discordant() {
            return Ok(None);
        }
        bucket::canonical_order(&mut record);
        let key = self.key(&record);
        self.store.append(&key, &record)?;
        Ok(Some(key))
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
