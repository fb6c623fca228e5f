// Shared helpers for unit tests.

use crate::{utils, AlignmentPair, PairEnd, Strand};

use simple_sds::serialize;

use rand::Rng;

use std::fs;
use std::path::{Path, PathBuf};

//-----------------------------------------------------------------------------

// Temporary files and directories.

pub(crate) fn write_temp_file(name_part: &str, contents: &str) -> PathBuf {
    let filename = serialize::temp_file_name(name_part);
    assert!(!utils::file_exists(&filename), "Temporary file {} already exists", filename.display());
    let result = fs::write(&filename, contents);
    assert!(result.is_ok(), "Failed to write {}: {}", filename.display(), result.unwrap_err());
    filename
}

pub(crate) fn create_temp_dir(name_part: &str) -> PathBuf {
    let dirname = serialize::temp_file_name(name_part);
    assert!(!utils::file_exists(&dirname), "Temporary directory {} already exists", dirname.display());
    let result = fs::create_dir_all(&dirname);
    assert!(result.is_ok(), "Failed to create {}: {}", dirname.display(), result.unwrap_err());
    dirname
}

pub(crate) fn remove_temp_dir(dirname: &Path) {
    let _ = fs::remove_dir_all(dirname);
}

// Returns the names of the files in the directory in sorted order.
pub(crate) fn list_files(dirname: &Path) -> Vec<PathBuf> {
    let entries = fs::read_dir(dirname);
    assert!(entries.is_ok(), "Failed to list {}: {}", dirname.display(), entries.unwrap_err());
    let mut result: Vec<PathBuf> = entries.unwrap().map(|entry| entry.unwrap().path()).collect();
    result.sort_unstable();
    result
}

pub(crate) fn read_lines(filename: &Path) -> Vec<String> {
    let contents = fs::read_to_string(filename);
    assert!(contents.is_ok(), "Failed to read {}: {}", filename.display(), contents.unwrap_err());
    contents.unwrap().lines().map(String::from).collect()
}

//-----------------------------------------------------------------------------

// Synthetic alignment pairs.

pub(crate) const CHROMS: [&str; 4] = ["chr1", "chr2", "chr10", "chrX"];

pub(crate) fn end(chrom: &str, start: u64, strand: Strand) -> PairEnd {
    PairEnd::new(chrom, start, start + 100, strand, 0)
}

pub(crate) fn pair(sample: &str, read: &str, first: PairEnd, second: PairEnd) -> AlignmentPair {
    AlignmentPair::new(sample, read, first, second)
}

fn random_end<R: Rng>(rng: &mut R) -> PairEnd {
    let chrom = CHROMS[rng.gen_range(0..CHROMS.len())];
    let strand = if rng.gen_bool(0.5) { Strand::Forward } else { Strand::Reverse };
    let mut result = end(chrom, rng.gen_range(0..1_000_000), strand);
    result.edit = rng.gen_range(0..4);
    result
}

// Random pairs with unique read names `{prefix}{i}`.
pub(crate) fn random_pairs<R: Rng>(rng: &mut R, sample: &str, prefix: &str, count: usize) -> Vec<AlignmentPair> {
    (0..count).map(|i| {
        let read = format!("{}{}", prefix, i);
        pair(sample, &read, random_end(rng), random_end(rng))
    }).collect()
}

// Writes the pairs as an input BEDPE file.
pub(crate) fn write_bedpe(name_part: &str, pairs: &[AlignmentPair]) -> PathBuf {
    let mut contents = String::new();
    for aln in pairs {
        contents.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            aln.first.chrom, aln.first.start, aln.first.end,
            aln.second.chrom, aln.second.start, aln.second.end,
            aln.read, aln.first_mate, aln.first.strand, aln.second.strand,
            aln.first.edit, aln.second.edit
        ));
        if let Some(mappings) = aln.mappings {
            contents.push_str(&format!("\t{}", mappings));
        }
        contents.push('\n');
    }
    write_temp_file(name_part, &contents)
}

// Read name in a routed line.
pub(crate) fn routed_read(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    assert!(fields.len() >= 14, "Routed line has too few fields: {}", line);
    fields[6].to_string()
}

//-----------------------------------------------------------------------------
