//! Per-sample insert-size profiles loaded from the configuration file.
//!
//! The configuration file is a whitespace-delimited table with one row per sample:
//!
//! 1. Sample id (string)
//! 2. Discordant mapping file (path)
//! 3. Mean insert size (float)
//! 4. Standard deviation of the insert size (float)
//! 5. Number of standard deviations allowed (float)
//!
//! Empty lines and lines starting with `#` are ignored.

use crate::error::{Result, RouterError};
use crate::utils;

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::warn;

//-----------------------------------------------------------------------------

/// Insert-size statistics for the sequencing library of a sample.
#[derive(Clone, Debug, PartialEq)]
pub struct LibraryProfile {
    /// Sample identifier.
    pub sample: String,
    /// File containing the discordant mappings of the sample.
    pub file: PathBuf,
    /// Mean insert size.
    pub mean: f64,
    /// Standard deviation of the insert size.
    pub std: f64,
    /// Number of standard deviations that still count as concordant.
    pub num_std: f64,
}

impl LibraryProfile {
    /// Number of columns in a configuration row.
    pub const COLUMNS: usize = 5;

    /// Creates a new profile.
    pub fn new(sample: &str, file: &Path, mean: f64, std: f64, num_std: f64) -> Self {
        LibraryProfile {
            sample: sample.to_string(),
            file: file.to_path_buf(),
            mean, std, num_std,
        }
    }

    /// Returns the largest insert size expected from a concordant pair.
    pub fn max_expected_insert(&self) -> f64 {
        self.mean + self.num_std * self.std
    }

    /// Returns the smallest insert size expected from a concordant pair.
    pub fn min_expected_insert(&self) -> f64 {
        (self.mean - self.num_std * self.std).max(0.0)
    }

    // Parses a row of the configuration table.
    fn parse(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != Self::COLUMNS {
            return Err(format!("expected {} columns, found {}", Self::COLUMNS, fields.len()));
        }
        let mean = Self::parse_statistic(fields[2], "mean")?;
        let std = Self::parse_statistic(fields[3], "standard deviation")?;
        let num_std = Self::parse_statistic(fields[4], "number of standard deviations")?;
        Ok(LibraryProfile::new(fields[0], Path::new(fields[1]), mean, std, num_std))
    }

    fn parse_statistic(field: &str, name: &str) -> std::result::Result<f64, String> {
        match field.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
            _ => Err(format!("invalid {}: {}", name, field)),
        }
    }
}

//-----------------------------------------------------------------------------

/// Library profiles for all samples, in configuration order.
///
/// Sample ids are unique within the table.
/// If the configuration lists the same sample more than once, the last row wins but keeps the position of the first one.
///
/// # Examples
///
/// ```
/// use hydra_router::{LibraryProfile, LibraryProfileTable};
/// use std::path::Path;
///
/// let mut table = LibraryProfileTable::new();
/// table.insert(LibraryProfile::new("NA12878", Path::new("na12878.bedpe"), 500.0, 50.0, 3.0));
/// let profile = table.get("NA12878").unwrap();
/// assert_eq!(profile.max_expected_insert(), 650.0);
/// assert!(table.get("NA12891").is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LibraryProfileTable {
    profiles: Vec<LibraryProfile>,
    index: HashMap<String, usize>,
}

impl LibraryProfileTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the table from a configuration file, which may be gzip-compressed.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] if the file cannot be opened or read, a row has the wrong number of columns, or a statistic is not a non-negative number.
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let path = filename.as_ref();
        let reader = utils::open_file(path).map_err(|err| match err {
            RouterError::Io { source, .. } => RouterError::config(path, format!("cannot open: {}", source)),
            other => other,
        })?;

        let mut table = LibraryProfileTable::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|x| RouterError::config(path, format!("cannot read line {}: {}", line_num + 1, x)))?;
            if utils::is_comment_or_empty(line.as_bytes()) {
                continue;
            }
            let profile = LibraryProfile::parse(&line).map_err(|x| {
                RouterError::config(path, format!("line {}: {}", line_num + 1, x))
            })?;
            table.insert(profile);
        }

        Ok(table)
    }

    /// Inserts a profile, replacing any earlier profile for the same sample.
    pub fn insert(&mut self, profile: LibraryProfile) {
        if let Some(&offset) = self.index.get(&profile.sample) {
            warn!("Sample {} listed multiple times; using the last entry", profile.sample);
            self.profiles[offset] = profile;
        } else {
            self.index.insert(profile.sample.clone(), self.profiles.len());
            self.profiles.push(profile);
        }
    }

    /// Returns the profile for the sample.
    pub fn get(&self, sample: &str) -> Option<&LibraryProfile> {
        self.index.get(sample).map(|&offset| &self.profiles[offset])
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Returns an iterator over the profiles in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &LibraryProfile> {
        self.profiles.iter()
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
