// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Named cross-process mutex with an on-disk wait queue.
//!
//! Every database write and every move into a shared output directory runs
//! under one of these locks. A lock is a directory under the lock root:
//!
//! ```text
//! <lock_root>/<clean name>/
//!     queue/<nanos>-<pid>-<seq>.tok   one token per waiter, oldest first
//!     active                          "<pid>\n<token>\n" of the holder
//! ```
//!
//! # Algorithm
//!
//! 1. The caller drops a token file into `queue/` (`create_new`, so tokens are
//!    never shared).
//! 2. It polls with exponential backoff until its token sorts first and no
//!    `active` marker exists, then creates the marker.
//! 3. Release removes the marker, then the token.
//!
//! An `active` marker whose pid is dead is a stale holder. The default
//! [`StalePolicy::Reclaim`] removes it and proceeds; [`StalePolicy::Fail`]
//! surfaces `LockError::Stale`. Queue tokens of dead pids are purged on every
//! poll.
//!
//! Locks are reentrant for the acquiring thread: nested acquisitions only bump
//! a depth counter, and the directory entries go away when the outermost
//! guard is released.

mod manager;
pub mod process;

pub use manager::{LockGuard, LockManager, LockOptions, StalePolicy};

/// Make a lock name safe to use as a directory name.
///
/// # Examples
///
/// ```rust
/// use apero::lock::clean_name;
///
/// assert_eq!(clean_name("outdir:/data/reduced/2021-07-01"), "outdir:_data_reduced_2021-07-01");
/// assert_eq!(clean_name("db calib.sqlite"), "db_calib_sqlite");
/// ```
pub fn clean_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '.' | ',' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
