// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! SHA-256 fingerprints used for skip-if-done and hashed product names.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

fn hex(digest: impl AsRef<[u8]>) -> String {
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

/// Fingerprint of an ordered list of names.
pub fn names<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    hex(hasher.finalize())
}

/// Fingerprint of a JSON document. `serde_json` keeps object keys sorted, so
/// equal values always serialize identically.
pub fn json(value: &serde_json::Value) -> String {
    hex(Sha256::digest(value.to_string().as_bytes()))
}

/// Fingerprint of file contents, in the given order, each tagged with its name.
pub fn contents<'a>(files: impl IntoIterator<Item = (&'a str, &'a Path)>) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    for (name, path) in files {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        let mut file = File::open(path)?;
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }
    Ok(hex(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_names_are_order_sensitive() {
        assert_eq!(names(["a", "b"]), names(["a", "b"]));
        assert_ne!(names(["a", "b"]), names(["b", "a"]));
        assert_ne!(names(["ab"]), names(["a", "b"]));
        assert_eq!(names(["a"]).len(), 64);
    }

    #[test]
    fn test_json_ignores_insertion_order() {
        let a = serde_json::json!({"x": 1, "y": [1, 2]});
        let b = serde_json::json!({"y": [1, 2], "x": 1});
        assert_eq!(json(&a), json(&b));
    }

    #[test]
    fn test_contents_change_with_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.fits");
        fs::write(&path, b"one").unwrap();
        let first = contents([("f.fits", path.as_path())]).unwrap();
        assert_eq!(first, contents([("f.fits", path.as_path())]).unwrap());

        fs::write(&path, b"two").unwrap();
        assert_ne!(first, contents([("f.fits", path.as_path())]).unwrap());
        assert!(contents([("gone", dir.path().join("gone").as_path())]).is_err());
    }
}
