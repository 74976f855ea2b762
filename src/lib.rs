// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod calib;      // calibration lookup + used-calibration records
pub mod cli;        // the apero command line
pub mod config;     // profiles, instrument tables, parameters, run tables
pub mod db;         // typed SQLite stores
pub mod engine;     // supervisor, workers, commit
pub mod errors;     // error handling
pub mod files;      // FITS codec, file descriptions, identification
pub mod lock;       // cross-process named locks
pub mod observability;
pub mod planner;    // run table -> ordered plan
pub mod recipes;    // recipe definitions and built-in registry
pub mod traits;     // seams between the scheduler and its workers
pub mod trigger;    // raw-tree watcher
