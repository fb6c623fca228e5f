//! Discordant alignment pairs and the BEDPE reader that produces them.
//!
//! An input line has the following tab-separated fields:
//!
//! 1. Chromosome of the first end
//! 2. Start of the first end (0-based)
//! 3. End of the first end (exclusive)
//! 4. Chromosome of the second end
//! 5. Start of the second end
//! 6. End of the second end
//! 7. Read identifier
//! 8. Which mate is the first end (`1` or `2`)
//! 9. Strand of the first end (`+` or `-`)
//! 10. Strand of the second end
//! 11. Edit distance of the first end
//! 12. Edit distance of the second end
//! 13. Number of mappings for the pair (optional)
//!
//! Alignments of the same read are expected on consecutive lines.
//! Routed records are written in the same format with two extra fields: sample id and support.

use crate::error::{Result, RouterError};
use crate::utils;

use std::fmt::Display;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str;

//-----------------------------------------------------------------------------

/// Strand of an aligned read end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strand {
    /// `+`
    Forward,
    /// `-`
    Reverse,
}

impl Strand {
    /// Parses a strand from `+` or `-`.
    pub fn parse(field: &[u8]) -> Option<Strand> {
        match field {
            b"+" => Some(Strand::Forward),
            b"-" => Some(Strand::Reverse),
            _ => None,
        }
    }

    /// Returns the character used for the strand in text formats.
    pub fn symbol(self) -> u8 {
        match self {
            Strand::Forward => b'+',
            Strand::Reverse => b'-',
        }
    }
}

impl Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol() as char)
    }
}

//-----------------------------------------------------------------------------

/// One aligned end of a read pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairEnd {
    /// Chromosome name.
    pub chrom: String,
    /// Start position (0-based).
    pub start: u64,
    /// End position (exclusive).
    pub end: u64,
    /// Strand of the alignment.
    pub strand: Strand,
    /// Edit distance of the alignment.
    pub edit: u32,
}

impl PairEnd {
    /// Creates a new end.
    pub fn new(chrom: &str, start: u64, end: u64, strand: Strand, edit: u32) -> Self {
        PairEnd { chrom: chrom.to_string(), start, end, strand, edit }
    }
}

//-----------------------------------------------------------------------------

/// An alignment of a read pair, as read from the discordant mapping file of a sample.
///
/// The record is immutable once read, except for the support assigned by a [`crate::SupportPolicy`] and the end order chosen by [`crate::bucket::canonical_order`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignmentPair {
    /// Sample the record was read for.
    pub sample: String,
    /// Read identifier.
    pub read: String,
    /// Which mate (1 or 2) is the first end.
    pub first_mate: u8,
    /// First end.
    pub first: PairEnd,
    /// Second end.
    pub second: PairEnd,
    /// Number of mappings given in the input, if any.
    pub mappings: Option<u32>,
    /// Number of supporting mappings.
    pub support: u32,
    /// Insert size, or 0 for ends on different chromosomes.
    pub insert_size: u64,
}

impl AlignmentPair {
    /// Minimum number of fields in a line.
    pub const MANDATORY_FIELDS: usize = 12;

    /// Creates a new record with support 1 and a computed insert size.
    pub fn new(sample: &str, read: &str, first: PairEnd, second: PairEnd) -> Self {
        let mut result = AlignmentPair {
            sample: sample.to_string(),
            read: read.to_string(),
            first_mate: 1,
            first, second,
            mappings: None,
            support: 1,
            insert_size: 0,
        };
        result.insert_size = result.compute_insert_size();
        result
    }

    /// Returns `true` if the ends are on different chromosomes.
    pub fn is_interchromosomal(&self) -> bool {
        self.first.chrom != self.second.chrom
    }

    /// Returns the total edit distance of the pair.
    pub fn edit_distance(&self) -> u32 {
        self.first.edit.saturating_add(self.second.edit)
    }

    fn compute_insert_size(&self) -> u64 {
        if self.is_interchromosomal() {
            return 0;
        }
        let start = self.first.start.min(self.second.start);
        let end = self.first.end.max(self.second.end);
        end - start
    }

    /// Swaps the ends of the pair.
    pub fn mirror(&mut self) {
        std::mem::swap(&mut self.first, &mut self.second);
        self.first_mate = 3 - self.first_mate;
    }

    /// Parses a record from a BEDPE line.
    ///
    /// The trailing newline is optional.
    /// Support is initialized from the mapping count if present and to 1 otherwise.
    pub fn from_bedpe(line: &[u8], sample: &str) -> std::result::Result<Self, String> {
        let fields = utils::split_fields(line);
        if fields.len() < Self::MANDATORY_FIELDS {
            return Err(format!("expected at least {} fields, found {}", Self::MANDATORY_FIELDS, fields.len()));
        }

        let first_strand = Strand::parse(fields[8]).ok_or_else(|| {
            format!("invalid first strand: {}", String::from_utf8_lossy(fields[8]))
        })?;
        let second_strand = Strand::parse(fields[9]).ok_or_else(|| {
            format!("invalid second strand: {}", String::from_utf8_lossy(fields[9]))
        })?;
        let first = Self::parse_end(
            &fields[0..3], first_strand, fields[10], "first"
        )?;
        let second = Self::parse_end(
            &fields[3..6], second_strand, fields[11], "second"
        )?;

        let read = Self::parse_string(fields[6], "read name")?;
        let first_mate = match fields[7] {
            b"1" => 1,
            b"2" => 2,
            _ => return Err(format!("invalid mate: {}", String::from_utf8_lossy(fields[7]))),
        };

        let mut result = AlignmentPair::new(sample, &read, first, second);
        result.first_mate = first_mate;
        if let Some(field) = fields.get(Self::MANDATORY_FIELDS) {
            let mappings = Self::parse_number(field, "number of mappings")?;
            let mappings = u32::try_from(mappings).map_err(|_| format!("number of mappings too large: {}", mappings))?;
            result.mappings = Some(mappings);
            result.support = mappings;
        }
        Ok(result)
    }

    fn parse_end(fields: &[&[u8]], strand: Strand, edit: &[u8], name: &str) -> std::result::Result<PairEnd, String> {
        let chrom = Self::parse_string(fields[0], "chromosome")?;
        let start = Self::parse_number(fields[1], "start")?;
        let end = Self::parse_number(fields[2], "end")?;
        if start > end {
            return Err(format!("{} end has start {} > end {}", name, start, end));
        }
        let edit = Self::parse_number(edit, "edit distance")?;
        let edit = u32::try_from(edit).map_err(|_| format!("edit distance too large: {}", edit))?;
        Ok(PairEnd { chrom, start, end, strand, edit })
    }

    fn parse_string(field: &[u8], field_name: &str) -> std::result::Result<String, String> {
        if field.is_empty() {
            return Err(format!("empty {}", field_name));
        }
        String::from_utf8(field.to_vec()).map_err(|err| {
            format!("invalid {}: {}", field_name, err)
        })
    }

    fn parse_number(field: &[u8], field_name: &str) -> std::result::Result<u64, String> {
        let number = str::from_utf8(field).map_err(|err| {
            format!("invalid {}: {}", field_name, err)
        })?;
        number.parse().map_err(|err| {
            format!("invalid {} {}: {}", field_name, number, err)
        })
    }

    /// Appends the record as a routed BEDPE line to the buffer.
    ///
    /// The line includes the trailing newline.
    pub fn append_bedpe(&self, buffer: &mut Vec<u8>) {
        for end in [&self.first, &self.second] {
            let _ = write!(buffer, "{}\t{}\t{}\t", end.chrom, end.start, end.end);
        }
        let _ = write!(
            buffer, "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            self.read, self.first_mate, self.first.strand, self.second.strand,
            self.first.edit, self.second.edit, self.sample, self.support
        );
    }
}

//-----------------------------------------------------------------------------

/// A reader over the alignment pairs in the discordant mapping file of a sample.
///
/// The iterator yields [`RouterError::RecordFormat`] for malformed lines and continues after them.
/// Read errors are reported as [`RouterError::Io`], after which the iterator is exhausted.
pub struct PairReader {
    reader: Box<dyn BufRead + Send>,
    path: PathBuf,
    sample: String,
    line_num: usize,
    done: bool,
}

impl PairReader {
    /// Opens the file, which may be gzip-compressed.
    pub fn open<P: AsRef<Path>>(filename: P, sample: &str) -> Result<Self> {
        let reader = utils::open_file(&filename)?;
        Ok(Self::new(reader, filename.as_ref(), sample))
    }

    /// Creates a reader over an existing input stream.
    pub fn new(reader: Box<dyn BufRead + Send>, path: &Path, sample: &str) -> Self {
        PairReader {
            reader,
            path: path.to_path_buf(),
            sample: sample.to_string(),
            line_num: 0,
            done: false,
        }
    }

    /// Returns the number of lines read so far.
    pub fn lines_read(&self) -> usize {
        self.line_num
    }
}

impl Iterator for PairReader {
    type Item = Result<AlignmentPair>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf: Vec<u8> = Vec::new();
        while !self.done {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.done = true;
                },
                Ok(_) => {
                    self.line_num += 1;
                    if utils::is_comment_or_empty(&buf) {
                        continue;
                    }
                    let record = AlignmentPair::from_bedpe(&buf, &self.sample).map_err(|reason| {
                        RouterError::RecordFormat { path: self.path.clone(), line: self.line_num, reason }
                    });
                    return Some(record);
                },
                Err(err) => {
                    self.done = true;
                    return Some(Err(RouterError::io(&self.path, err)));
                },
            }
        }
        None
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
