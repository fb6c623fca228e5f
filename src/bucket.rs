//! Canonical bucket identities for alignment pairs.
//!
//! A pair and its mirror image (ends swapped) describe the same fragment.
//! Both must end up in the same bucket, so the ends are first put into a canonical order:
//! by chromosome name, then start, end, and strand.
//! The bucket is then identified by the chromosomes and strands of the canonically ordered ends.
//! With inversion lumping, the two mixed-strand configurations `+-` and `-+` share a bucket.

use crate::record::{AlignmentPair, PairEnd, Strand};

use std::cmp::Ordering;
use std::fmt::Display;

//-----------------------------------------------------------------------------

/// Strands of the canonically ordered ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrandPair {
    /// `++`
    ForwardForward,
    /// `+-`
    ForwardReverse,
    /// `-+`
    ReverseForward,
    /// `--`
    ReverseReverse,
    /// `+-` or `-+` with inversion lumping.
    Mixed,
}

impl StrandPair {
    /// All strand pairs that can appear in a bucket key.
    pub const ALL: [StrandPair; 5] = [
        StrandPair::ForwardForward, StrandPair::ForwardReverse,
        StrandPair::ReverseForward, StrandPair::ReverseReverse,
        StrandPair::Mixed,
    ];

    /// Returns the strand pair for the given strands.
    pub fn new(first: Strand, second: Strand) -> Self {
        match (first, second) {
            (Strand::Forward, Strand::Forward) => StrandPair::ForwardForward,
            (Strand::Forward, Strand::Reverse) => StrandPair::ForwardReverse,
            (Strand::Reverse, Strand::Forward) => StrandPair::ReverseForward,
            (Strand::Reverse, Strand::Reverse) => StrandPair::ReverseReverse,
        }
    }

    /// Folds the mixed-strand configurations into [`StrandPair::Mixed`].
    pub fn lumped(self) -> Self {
        match self {
            StrandPair::ForwardReverse | StrandPair::ReverseForward => StrandPair::Mixed,
            other => other,
        }
    }

    /// Returns the label used in bucket file names.
    pub fn label(&self) -> &'static str {
        match self {
            StrandPair::ForwardForward => "pp",
            StrandPair::ForwardReverse => "pm",
            StrandPair::ReverseForward => "mp",
            StrandPair::ReverseReverse => "mm",
            StrandPair::Mixed => "mixed",
        }
    }
}

impl Display for StrandPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrandPair::ForwardForward => write!(f, "++"),
            StrandPair::ForwardReverse => write!(f, "+-"),
            StrandPair::ReverseForward => write!(f, "-+"),
            StrandPair::ReverseReverse => write!(f, "--"),
            StrandPair::Mixed => write!(f, "+-/-+"),
        }
    }
}

//-----------------------------------------------------------------------------

/// Identity of a bucket: chromosome pair and strand pair of the canonically ordered ends.
///
/// Keys order by chromosome names and then by strand pair.
/// This is also the order of the bucket files in the manifest.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    /// Chromosome of the canonical first end.
    pub first_chrom: String,
    /// Chromosome of the canonical second end.
    pub second_chrom: String,
    /// Strands of the canonical ends.
    pub strands: StrandPair,
}

impl BucketKey {
    /// Extension of bucket files.
    pub const EXTENSION: &'static str = "bedpe";

    /// Creates a new key.
    pub fn new(first_chrom: &str, second_chrom: &str, strands: StrandPair) -> Self {
        BucketKey {
            first_chrom: first_chrom.to_string(),
            second_chrom: second_chrom.to_string(),
            strands,
        }
    }

    /// Returns the file name for the bucket.
    ///
    /// Chromosome names are percent-encoded outside `[A-Za-z0-9_-]`, so distinct keys always get distinct names.
    ///
    /// # Examples
    ///
    /// ```
    /// use hydra_router::{BucketKey, StrandPair};
    ///
    /// let key = BucketKey::new("chr1", "chrUn_gl000220.1", StrandPair::ForwardReverse);
    /// assert_eq!(key.file_name("sample"), "sample.chr1.chrUn_gl000220%2E1.pm.bedpe");
    /// ```
    pub fn file_name(&self, prefix: &str) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            prefix, encode_name(&self.first_chrom), encode_name(&self.second_chrom),
            self.strands.label(), Self::EXTENSION
        )
    }
}

impl Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} {}", self.first_chrom, self.second_chrom, self.strands)
    }
}

fn encode_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            result.push(byte as char);
        } else {
            result.push_str(&format!("%{:02X}", byte));
        }
    }
    result
}

//-----------------------------------------------------------------------------

// Total order on ends used for canonicalization.
pub(crate) fn compare_ends(a: &PairEnd, b: &PairEnd) -> Ordering {
    (&a.chrom, a.start, a.end, a.strand).cmp(&(&b.chrom, b.start, b.end, b.strand))
}

/// Returns `true` if the ends of the pair are in canonical order.
pub fn is_canonical(record: &AlignmentPair) -> bool {
    compare_ends(&record.first, &record.second) != Ordering::Greater
}

/// Puts the ends of the pair into canonical order.
///
/// Returns `true` if the ends were swapped.
pub fn canonical_order(record: &mut AlignmentPair) -> bool {
    if is_canonical(record) {
        false
    } else {
        record.mirror();
        true
    }
}

/// Returns the bucket key for the pair.
///
/// The key is the same for a pair and its mirror image.
/// With `lump_inversions`, the `+-` and `-+` configurations of a chromosome pair share a key.
///
/// # Examples
///
/// ```
/// use hydra_router::{AlignmentPair, PairEnd, Strand};
/// use hydra_router::{resolve, BucketKey, StrandPair};
///
/// let first = PairEnd::new("chr2", 500, 600, Strand::Forward, 0);
/// let second = PairEnd::new("chr1", 100, 200, Strand::Reverse, 0);
/// let record = AlignmentPair::new("s1", "read", first, second);
///
/// let key = resolve(&record, false);
/// assert_eq!(key, BucketKey::new("chr1", "chr2", StrandPair::ReverseForward));
/// let lumped = resolve(&record, true);
/// assert_eq!(lumped, BucketKey::new("chr1", "chr2", StrandPair::Mixed));
/// ```
pub fn resolve(record: &AlignmentPair, lump_inversions: bool) -> BucketKey {
    let (first, second) = if is_canonical(record) {
        (&record.first, &record.second)
    } else {
        (&record.second, &record.first)
    };
    let mut strands = StrandPair::new(first.strand, second.strand);
    if lump_inversions {
        strands = strands.lumped();
    }
    BucketKey::new(&first.chrom, &second.chrom, strands)
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
