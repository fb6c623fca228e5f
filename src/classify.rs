//! Deciding whether an alignment pair is discordant.
//!
//! Classification happens in two steps.
//! First a [`SupportPolicy`] assigns support to all alignments of a read.
//! Then [`classify`] compares each alignment against the library profile of its sample.
//!
//! Support counts the alignments of a single read, so a uniquely mapped pair has support 1.
//! The default minimum support is therefore 1; larger values keep only reads with several near-best alignments.

use crate::bucket;
use crate::record::{AlignmentPair, Strand};
use crate::profile::LibraryProfile;

use std::cmp::Ordering;
use std::fmt::{Debug, Display};
use std::str::FromStr;

//-----------------------------------------------------------------------------

/// How support is assigned to the alignments of a read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MappingUsage {
    /// Count the near-best alignments of each read.
    #[default]
    Best,
    /// Trust the number of mappings given in the input.
    Given,
}

/// Expected orientation of a concordant pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PairOrientation {
    /// Orientation is not used for classification.
    #[default]
    Unchecked,
    /// The leftmost end is on the forward strand and the rightmost on the reverse strand.
    ///
    /// Ends with the same start are ordered as in bucket keys, so a pair and its mirror image agree.
    ForwardReverse,
    /// Both ends are on the same strand.
    SameStrand,
}

impl PairOrientation {
    /// Returns `true` if the orientation of a same-chromosome pair matches the expectation.
    pub fn is_expected(&self, record: &AlignmentPair) -> bool {
        match self {
            PairOrientation::Unchecked => true,
            PairOrientation::ForwardReverse => {
                let (left, right) = if bucket::compare_ends(&record.first, &record.second) != Ordering::Greater {
                    (&record.first, &record.second)
                } else {
                    (&record.second, &record.first)
                };
                left.strand == Strand::Forward && right.strand == Strand::Reverse
            },
            PairOrientation::SameStrand => record.first.strand == record.second.strand,
        }
    }
}

impl FromStr for PairOrientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unchecked" => Ok(PairOrientation::Unchecked),
            "fr" => Ok(PairOrientation::ForwardReverse),
            "ss" => Ok(PairOrientation::SameStrand),
            _ => Err(format!("Invalid orientation '{}'; expected 'unchecked', 'fr', or 'ss'", s)),
        }
    }
}

//-----------------------------------------------------------------------------

/// Options for classifying alignment pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierOptions {
    /// Treat every supported pair as discordant regardless of insert size and orientation.
    pub ignore_size: bool,
    /// How support is assigned.
    pub mapping_usage: MappingUsage,
    /// Alignments within this many edits of the best one count as near-best.
    pub edit_beyond_best: u32,
    /// Minimum support required to keep a pair.
    pub min_support: u32,
    /// Expected orientation of concordant pairs.
    pub orientation: PairOrientation,
    /// Also treat pairs shorter than the expected range as discordant.
    pub flag_short_inserts: bool,
}

impl ClassifierOptions {
    /// Default for `min_support`.
    pub const DEFAULT_MIN_SUPPORT: u32 = 1;
    /// Default for `edit_beyond_best`.
    pub const DEFAULT_EDIT_BEYOND_BEST: u32 = 0;
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        ClassifierOptions {
            ignore_size: false,
            mapping_usage: MappingUsage::Best,
            edit_beyond_best: Self::DEFAULT_EDIT_BEYOND_BEST,
            min_support: Self::DEFAULT_MIN_SUPPORT,
            orientation: PairOrientation::Unchecked,
            flag_short_inserts: false,
        }
    }
}

//-----------------------------------------------------------------------------

/// Outcome of classifying an alignment pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Classification {
    /// The pair is a candidate structural variant signal and should be routed.
    Discordant,
    /// The pair agrees with the library profile.
    Concordant,
    /// The pair has less support than required.
    Unsupported,
}

impl Classification {
    /// Returns `true` if the pair should be routed.
    pub fn is_discordant(&self) -> bool {
        *self == Classification::Discordant
    }
}

impl Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Discordant => write!(f, "discordant"),
            Classification::Concordant => write!(f, "concordant"),
            Classification::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Classifies an alignment pair with already assigned support.
///
/// # Examples
///
/// ```
/// use hydra_router::{AlignmentPair, PairEnd, Strand, LibraryProfile};
/// use hydra_router::{classify, Classification, ClassifierOptions};
/// use std::path::Path;
///
/// let profile = LibraryProfile::new("s1", Path::new("s1.bedpe"), 500.0, 50.0, 3.0);
/// let options = ClassifierOptions::default();
///
/// let first = PairEnd::new("chr1", 10_000, 10_100, Strand::Forward, 0);
/// let second = PairEnd::new("chr1", 11_900, 12_000, Strand::Forward, 0);
/// let record = AlignmentPair::new("s1", "read1", first, second);
/// assert_eq!(record.insert_size, 2000);
/// assert_eq!(classify(&record, &profile, &options), Classification::Discordant);
/// ```
pub fn classify(record: &AlignmentPair, profile: &LibraryProfile, options: &ClassifierOptions) -> Classification {
    if record.support < options.min_support {
        return Classification::Unsupported;
    }
    if options.ignore_size || record.is_interchromosomal() || !options.orientation.is_expected(record) {
        return Classification::Discordant;
    }

    let insert_size = record.insert_size as f64;
    if insert_size > profile.max_expected_insert() {
        Classification::Discordant
    } else if options.flag_short_inserts && insert_size < profile.min_expected_insert() {
        Classification::Discordant
    } else {
        Classification::Concordant
    }
}

//-----------------------------------------------------------------------------

/// Assigns support to the alignments of a single read.
///
/// The alignments are consecutive records with the same read identifier.
/// An implementation sets [`AlignmentPair::support`] for each alignment.
pub trait SupportPolicy: Debug + Send + Sync {
    /// Assigns support to each alignment of the read.
    fn assign(&self, alignments: &mut [AlignmentPair]);
}

/// Support is the number of near-best alignments of the read.
///
/// The best alignment has the smallest total edit distance.
/// Alignments within `edit_beyond_best` edits of it are near-best.
/// Other alignments get support 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BestMappings {
    /// Tolerance for near-best alignments.
    pub edit_beyond_best: u32,
}

impl SupportPolicy for BestMappings {
    fn assign(&self, alignments: &mut [AlignmentPair]) {
        let Some(best) = alignments.iter().map(|aln| aln.edit_distance()).min() else {
            return;
        };
        let limit = best.saturating_add(self.edit_beyond_best);
        let near_best = alignments.iter().filter(|aln| aln.edit_distance() <= limit).count() as u32;
        for aln in alignments.iter_mut() {
            aln.support = if aln.edit_distance() <= limit { near_best } else { 0 };
        }
    }
}

/// Support is the number of mappings given in the input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GivenMappings;

impl SupportPolicy for GivenMappings {
    fn assign(&self, alignments: &mut [AlignmentPair]) {
        for aln in alignments.iter_mut() {
            if let Some(mappings) = aln.mappings {
                aln.support = mappings;
            }
        }
    }
}

//-----------------------------------------------------------------------------

/// Classifier combining [`ClassifierOptions`] with a [`SupportPolicy`].
#[derive(Debug)]
pub struct DiscordanceClassifier {
    options: ClassifierOptions,
    policy: Box<dyn SupportPolicy>,
}

impl DiscordanceClassifier {
    /// Creates a classifier with the support policy selected by `options.mapping_usage`.
    pub fn new(options: ClassifierOptions) -> Self {
        let policy: Box<dyn SupportPolicy> = match options.mapping_usage {
            MappingUsage::Best => Box::new(BestMappings { edit_beyond_best: options.edit_beyond_best }),
            MappingUsage::Given => Box::new(GivenMappings),
        };
        Self::with_policy(options, policy)
    }

    /// Creates a classifier with a custom support policy.
    pub fn with_policy(options: ClassifierOptions, policy: Box<dyn SupportPolicy>) -> Self {
        DiscordanceClassifier { options, policy }
    }

    /// Returns the options.
    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    /// Returns `true` if input records must carry a mapping count.
    pub fn requires_mapping_count(&self) -> bool {
        self.options.mapping_usage == MappingUsage::Given
    }

    /// Assigns support to the alignments of a read.
    pub fn assign_support(&self, alignments: &mut [AlignmentPair]) {
        self.policy.assign(alignments);
    }

    /// Classifies an alignment pair with already assigned support.
    pub fn classify(&self, record: &AlignmentPair, profile: &LibraryProfile) -> Classification {
        classify(record, profile, &self.options)
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::record::PairEnd;
    use std::path::Path;

    fn profile() -> LibraryProfile {
        LibraryProfile::new("s1", Path::new("s1.bedpe"), 500.0, 50.0, 3.0)
    }

    fn pair(chroms: (&str, &str), starts: (u64, u64), strands: (Strand, Strand), edits: (u32, u32)) -> AlignmentPair {
        let first = PairEnd::new(chroms.0, starts.0, starts.0 + 100, strands.0, edits.0);
        let second = PairEnd::new(chroms.1, starts.1, starts.1 + 100, strands.1, edits.1);
        AlignmentPair::new("s1", "read", first, second)
    }

    const PLUS: Strand = Strand::Forward;
    const MINUS: Strand = Strand::Reverse;

    #[test]
    fn large_insert_is_discordant() {
        let record = pair(("chr1", "chr1"), (10_000, 11_900), (PLUS, PLUS), (0, 0));
        assert_eq!(record.insert_size, 2000);
        assert_eq!(classify(&record, &profile(), &ClassifierOptions::default()), Classification::Discordant);
    }

    #[test]
    fn expected_insert_is_concordant() {
        let record = pair(("chr1", "chr1"), (10_000, 10_500), (PLUS, PLUS), (0, 0));
        assert_eq!(record.insert_size, 600);
        assert_eq!(classify(&record, &profile(), &ClassifierOptions::default()), Classification::Concordant);
    }

    #[test]
    fn boundary_is_concordant() {
        let record = pair(("chr1", "chr1"), (10_000, 10_550), (PLUS, MINUS), (0, 0));
        assert_eq!(record.insert_size, 650);
        assert_eq!(classify(&record, &profile(), &ClassifierOptions::default()), Classification::Concordant);
    }

    #[test]
    fn interchromosomal_is_discordant() {
        let record = pair(("chr1", "chr2"), (10_000, 10_000), (PLUS, MINUS), (0, 0));
        assert_eq!(classify(&record, &profile(), &ClassifierOptions::default()), Classification::Discordant);
    }

    #[test]
    fn orientation_test() {
        let fr = ClassifierOptions { orientation: PairOrientation::ForwardReverse, ..ClassifierOptions::default() };
        let ss = ClassifierOptions { orientation: PairOrientation::SameStrand, ..ClassifierOptions::default() };

        let inward = pair(("chr1", "chr1"), (10_000, 10_400), (PLUS, MINUS), (0, 0));
        let swapped = pair(("chr1", "chr1"), (10_400, 10_000), (MINUS, PLUS), (0, 0));
        let everted = pair(("chr1", "chr1"), (10_000, 10_400), (MINUS, PLUS), (0, 0));
        let same = pair(("chr1", "chr1"), (10_000, 10_400), (MINUS, MINUS), (0, 0));

        assert_eq!(classify(&inward, &profile(), &fr), Classification::Concordant);
        assert_eq!(classify(&swapped, &profile(), &fr), Classification::Concordant);
        assert_eq!(classify(&everted, &profile(), &fr), Classification::Discordant);
        assert_eq!(classify(&same, &profile(), &fr), Classification::Discordant);

        assert_eq!(classify(&same, &profile(), &ss), Classification::Concordant);
        assert_eq!(classify(&inward, &profile(), &ss), Classification::Discordant);
    }

    #[test]
    fn orientation_with_equal_starts() {
        let fr = ClassifierOptions { orientation: PairOrientation::ForwardReverse, ..ClassifierOptions::default() };
        let first = PairEnd::new("chr1", 1000, 1100, PLUS, 0);
        let second = PairEnd::new("chr1", 1000, 1300, MINUS, 0);
        let record = AlignmentPair::new("s1", "read", first, second);
        let mut mirrored = record.clone();
        mirrored.mirror();
        assert_eq!(mirrored.first.end, 1300);

        let expected = classify(&record, &profile(), &fr);
        assert_eq!(expected, Classification::Concordant);
        assert_eq!(classify(&mirrored, &profile(), &fr), expected, "Mirrored pair classified differently");
    }

    #[test]
    fn short_inserts() {
        let record = pair(("chr1", "chr1"), (10_000, 10_100), (PLUS, PLUS), (0, 0));
        assert_eq!(record.insert_size, 200);
        assert_eq!(classify(&record, &profile(), &ClassifierOptions::default()), Classification::Concordant);
        let options = ClassifierOptions { flag_short_inserts: true, ..ClassifierOptions::default() };
        assert_eq!(classify(&record, &profile(), &options), Classification::Discordant);
    }

    #[test]
    fn ignore_size() {
        let options = ClassifierOptions { ignore_size: true, ..ClassifierOptions::default() };
        let record = pair(("chr1", "chr1"), (10_000, 10_200), (PLUS, MINUS), (0, 0));
        assert_eq!(classify(&record, &profile(), &options), Classification::Discordant);
    }

    #[test]
    fn min_support() {
        let options = ClassifierOptions { min_support: 3, ..ClassifierOptions::default() };
        let mut record = pair(("chr1", "chr1"), (10_000, 11_900), (PLUS, PLUS), (0, 0));
        record.support = 2;
        assert_eq!(classify(&record, &profile(), &options), Classification::Unsupported);
        record.support = 4;
        assert_eq!(classify(&record, &profile(), &options), Classification::Discordant);

        // Support is checked before size.
        let mut concordant = pair(("chr1", "chr1"), (10_000, 10_100), (PLUS, MINUS), (0, 0));
        concordant.support = 1;
        assert_eq!(classify(&concordant, &profile(), &options), Classification::Unsupported);
    }

    #[test]
    fn best_mappings_policy() {
        let mut alignments = vec![
            pair(("chr1", "chr2"), (100, 100), (PLUS, MINUS), (1, 1)),
            pair(("chr1", "chr3"), (100, 100), (PLUS, MINUS), (0, 1)),
            pair(("chr1", "chr4"), (100, 100), (PLUS, MINUS), (2, 2)),
        ];

        BestMappings { edit_beyond_best: 0 }.assign(&mut alignments);
        let support: Vec<u32> = alignments.iter().map(|aln| aln.support).collect();
        assert_eq!(support, vec![0, 1, 0]);

        BestMappings { edit_beyond_best: 1 }.assign(&mut alignments);
        let support: Vec<u32> = alignments.iter().map(|aln| aln.support).collect();
        assert_eq!(support, vec![2, 2, 0]);

        BestMappings { edit_beyond_best: 10 }.assign(&mut alignments);
        let support: Vec<u32> = alignments.iter().map(|aln| aln.support).collect();
        assert_eq!(support, vec![3, 3, 3]);
    }

    #[test]
    fn given_mappings_policy() {
        let mut alignments = vec![
            pair(("chr1", "chr2"), (100, 100), (PLUS, MINUS), (5, 5)),
            pair(("chr1", "chr3"), (100, 100), (PLUS, MINUS), (0, 0)),
        ];
        alignments[0].mappings = Some(7);
        alignments[1].mappings = Some(2);
        let classifier = DiscordanceClassifier::new(ClassifierOptions {
            mapping_usage: MappingUsage::Given,
            ..ClassifierOptions::default()
        });
        assert!(classifier.requires_mapping_count());
        classifier.assign_support(&mut alignments);
        assert_eq!(alignments[0].support, 7);
        assert_eq!(alignments[1].support, 2);
    }

    #[derive(Debug)]
    struct FixedSupport(u32);

    impl SupportPolicy for FixedSupport {
        fn assign(&self, alignments: &mut [AlignmentPair]) {
            for aln in alignments.iter_mut() {
                aln.support = self.0;
            }
        }
    }

    #[test]
    fn custom_policy() {
        let options = ClassifierOptions { min_support: 5, ..ClassifierOptions::default() };
        let classifier = DiscordanceClassifier::with_policy(options, Box::new(FixedSupport(5)));
        let mut alignments = vec![pair(("chr1", "chr2"), (100, 100), (PLUS, MINUS), (0, 0))];
        classifier.assign_support(&mut alignments);
        assert_eq!(classifier.classify(&alignments[0], &profile()), Classification::Discordant);
    }

    #[test]
    fn parse_orientation() {
        assert_eq!("fr".parse::<PairOrientation>(), Ok(PairOrientation::ForwardReverse));
        assert_eq!("SS".parse::<PairOrientation>(), Ok(PairOrientation::SameStrand));
        assert_eq!("unchecked".parse::<PairOrientation>(), Ok(PairOrientation::Unchecked));
        assert!("rf".parse::<PairOrientation>().is_err());
    }
}

//-----------------------------------------------------------------------------
