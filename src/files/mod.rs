// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! File model: the FITS codec, DRS file descriptions and DPRTYPE identification.

mod drs_file;
pub mod fingerprint;
pub mod fits;
pub mod identify;

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

pub use drs_file::{
    output_directory, stem, BoundFile, DrsFile, DrsFileSpec, FileKind, FITS_EXTENSION,
};
pub use identify::{is_indexable, DprtypeIdentifier, DprtypeRule};

/// Size and modification time of a file as the index records them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub size: i64,
    /// Seconds since the Unix epoch.
    pub mtime: f64,
}

pub fn stat(path: &Path) -> io::Result<FileStat> {
    let metadata = fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(FileStat {
        size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
        mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stat_reports_size_and_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.fits");
        fs::write(&path, vec![0u8; 2880]).unwrap();

        let found = stat(&path).unwrap();
        assert_eq!(found.size, 2880);
        assert!(found.mtime > 0.0);
        assert!(stat(&dir.path().join("missing.fits")).is_err());
    }
}
