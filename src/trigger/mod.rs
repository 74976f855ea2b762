// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Raw-tree watcher: index new raw files and process nights once they settle.

mod scan;
mod watcher;

pub use scan::{RawScanner, ScanReport};
pub use watcher::{NightOutcome, Trigger};
