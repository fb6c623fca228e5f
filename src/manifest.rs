//! The manifest lists the bucket files produced by a routing run, one path per line.

use crate::error::{Result, RouterError};
use crate::utils;

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

//-----------------------------------------------------------------------------

/// Writes the bucket files to the manifest in the given order.
///
/// # Errors
///
/// Returns [`RouterError::Io`] if the manifest cannot be created or written.
pub fn write_manifest<P: AsRef<Path>>(filename: P, bucket_files: &[PathBuf]) -> Result<()> {
    let path = filename.as_ref();
    let file = File::create(path).map_err(|x| RouterError::io(path, x))?;
    let mut writer = BufWriter::new(file);
    for bucket_file in bucket_files {
        writeln!(writer, "{}", bucket_file.display()).map_err(|x| RouterError::io(path, x))?;
    }
    writer.flush().map_err(|x| RouterError::io(path, x))?;
    Ok(())
}

/// Reads the bucket files listed in a manifest.
pub fn read_manifest<P: AsRef<Path>>(filename: P) -> Result<Vec<PathBuf>> {
    let path = filename.as_ref();
    let reader = utils::open_file(path)?;
    let mut result = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|x| RouterError::io(path, x))?;
        if !line.is_empty() {
            result.push(PathBuf::from(line));
        }
    }
    Ok(result)
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
