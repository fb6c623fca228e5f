//! Utility functions and structures.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::io::{BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;

use crate::error::{Result, RouterError};

//-----------------------------------------------------------------------------

/// Returns the full file name for a specific test file.
pub fn get_test_data(filename: &'static str) -> PathBuf {
    let mut buf = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    buf.push("test-data");
    buf.push(filename);
    buf
}

//-----------------------------------------------------------------------------

// Utilities for working with files.

const SIZE_UNITS: [(f64, &str); 6] = [
    (1.0, "B"),
    (1024.0, "KiB"),
    (1024.0 * 1024.0, "MiB"),
    (1024.0 * 1024.0 * 1024.0, "GiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0, "TiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0, "PiB"),
];

/// Number of bytes in a GiB.
pub const GIB: u64 = 1 << 30;

/// Returns a human-readable representation of the given number of bytes.
pub fn human_readable_size(bytes: u64) -> String {
    let mut unit = 0;
    let value = bytes as f64;
    while unit + 1 < SIZE_UNITS.len() && value >= SIZE_UNITS[unit + 1].0 {
        unit += 1;
    }
    format!("{:.3} {}", value / SIZE_UNITS[unit].0, SIZE_UNITS[unit].1)
}

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns `true` if the file appears to be gzip-compressed.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    let Ok(file) = File::open(filename) else {
        return false;
    };
    let mut reader = BufReader::new(file);
    let mut magic = [0; 2];
    let len = reader.read(&mut magic).ok();
    len == Some(2) && magic == [0x1F, 0x8B]
}

/// Returns a buffered reader for the file, which may be gzip-compressed.
pub fn open_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(&filename).map_err(|x| RouterError::io(&filename, x))?;
    let inner = BufReader::new(file);
    if is_gzipped(&filename) {
        let inner = MultiGzDecoder::new(inner);
        Ok(Box::new(BufReader::new(inner)))
    } else {
        Ok(Box::new(inner))
    }
}

//-----------------------------------------------------------------------------

/// Returns the tab-separated fields of a line without the trailing line terminator.
pub fn split_fields(line: &[u8]) -> Vec<&[u8]> {
    let mut line = line;
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\n' || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line.split(|&c| c == b'\t').collect()
}

/// Returns `true` if the line contains no data.
pub fn is_comment_or_empty(line: &[u8]) -> bool {
    line.iter().all(|c| c.is_ascii_whitespace()) || line.first() == Some(&b'#')
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_units() {
        assert_eq!(human_readable_size(512), "512.000 B");
        assert_eq!(human_readable_size(1536), "1.500 KiB");
        assert_eq!(human_readable_size(8 * GIB), "8.000 GiB");
    }

    #[test]
    fn field_splitting() {
        let fields = split_fields(b"chr1\t100\t200\r\n");
        assert_eq!(fields, vec![&b"chr1"[..], &b"100"[..], &b"200"[..]]);
        assert!(is_comment_or_empty(b"   \n"));
        assert!(is_comment_or_empty(b"# header\n"));
        assert!(!is_comment_or_empty(b"chr1\t1\n"));
    }

    #[test]
    fn gzipped_input() {
        let plain = get_test_data("sample1.bedpe");
        let gzipped = get_test_data("sample1.bedpe.gz");
        assert!(!is_gzipped(&plain));
        assert!(is_gzipped(&gzipped));

        let mut plain_lines = Vec::new();
        open_file(&plain).unwrap().read_to_end(&mut plain_lines).unwrap();
        let mut gzipped_lines = Vec::new();
        open_file(&gzipped).unwrap().read_to_end(&mut gzipped_lines).unwrap();
        assert_eq!(plain_lines, gzipped_lines, "Gzip-compressed input differs from plain input");
    }
}

//-----------------------------------------------------------------------------
