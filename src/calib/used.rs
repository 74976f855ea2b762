// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

use super::lookup::CalibMatch;
use crate::config::Instrument;
use crate::files::fits::Header;

const FILE_PREFIX: &str = "CDB";
const TIME_PREFIX: &str = "CDT";

/// The calibrations an invocation consumed, in lookup order.
///
/// Stamped into every product header as `CDB<code>` (file name) and
/// `CDT<code>` (mid-obs time). When one key is used for several fibers the
/// fiber is appended to the card name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsedCalibrations {
    entries: Vec<CalibMatch>,
}

impl UsedCalibrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup result, replacing an earlier one for the same key and fiber.
    pub fn record(&mut self, found: CalibMatch) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.key == found.key && e.fiber == found.fiber)
        {
            Some(existing) => *existing = found,
            None => self.entries.push(found),
        }
    }

    pub fn get(&self, key: &str, fiber: Option<&str>) -> Option<&CalibMatch> {
        self.entries
            .iter()
            .find(|e| e.key == key && e.fiber.as_deref() == fiber)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibMatch> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(file card, time card)` names for one entry.
    pub fn card_names(&self, instrument: &Instrument, entry: &CalibMatch) -> (String, String) {
        let code = instrument.calib_card_code(&entry.key);
        let shared = self
            .entries
            .iter()
            .filter(|e| e.key == entry.key)
            .count()
            > 1;
        let suffix = match (&entry.fiber, shared) {
            (Some(fiber), true) => format!("_{fiber}"),
            _ => String::new(),
        };
        (
            format!("{FILE_PREFIX}{code}{suffix}"),
            format!("{TIME_PREFIX}{code}{suffix}"),
        )
    }

    pub fn stamp(&self, header: &mut Header, instrument: &Instrument) {
        for entry in &self.entries {
            let (file_card, time_card) = self.card_names(instrument, entry);
            let comment = format!("{} calibration used", entry.key);
            header.set(&file_card, entry.filename.as_str(), Some(comment.as_str()));
            header.set(&time_card, entry.mid_obs_time, Some("mid-obs MJD of calibration"));
        }
    }
}
