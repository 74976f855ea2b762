// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Time-matched calibration lookup.
//!
//! Given `(key, fiber, query time, policy)` the lookup returns the best row of
//! calibDB (or telluDB for telluric products):
//!
//! * `closest` - smallest `|mid_obs_time - query_time|`
//! * `older`   - latest `mid_obs_time <= query_time`
//! * `newer`   - earliest `mid_obs_time >= query_time`
//!
//! Rows are compared in insertion order, so the earlier row wins a tie and
//! repeated queries return the same file until a row is added. Every match
//! is recorded in [`UsedCalibrations`] and ends up in the product header.

mod lookup;
mod used;

pub use lookup::{
    select, CalibLookup, CalibMatch, CalibQuery, MatchPolicy, CALIB_MATCH_PARAM,
    TELLU_MATCH_PARAM, USE_UNUSED_PARAM,
};
pub use used::UsedCalibrations;
