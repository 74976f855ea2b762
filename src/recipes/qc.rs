// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

use crate::files::fits::Header;

pub const QC_ALL_CARD: &str = "QCC_ALL";

/// One quality-control measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcCheck {
    pub name: String,
    pub value: f64,
    /// Human-readable predicate, e.g. `DARK_MED < 0.5`.
    pub logic: String,
    pub passed: bool,
}

/// Quality-control results of one invocation, stamped into every product.
///
/// Cards are `QCC_ALL` plus, for the n-th check, `QCC{n:03}V` (value),
/// `QCC{n:03}N` (name), `QCC{n:03}L` (logic) and `QCC{n:03}P` (pass flag).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QcSet {
    checks: Vec<QcCheck>,
}

impl QcSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, name: &str, value: f64, logic: &str, passed: bool) -> bool {
        self.checks.push(QcCheck {
            name: name.to_string(),
            value,
            logic: logic.to_string(),
            passed,
        });
        passed
    }

    /// All checks passed. An empty set passes.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &QcCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn checks(&self) -> &[QcCheck] {
        &self.checks
    }

    pub fn stamp(&self, header: &mut Header) {
        header.set(QC_ALL_CARD, self.passed(), Some("all quality control passed"));
        for (n, check) in self.checks.iter().enumerate() {
            let n = n + 1;
            header.set(&format!("QCC{n:03}V"), check.value, Some("QC value"));
            header.set(&format!("QCC{n:03}N"), check.name.as_str(), Some("QC name"));
            header.set(&format!("QCC{n:03}L"), check.logic.as_str(), Some("QC logic"));
            header.set(&format!("QCC{n:03}P"), check.passed, Some("QC passed"));
        }
    }

    /// One line per failed check, for error messages.
    pub fn summary(&self) -> String {
        self.failures()
            .map(|c| format!("{}={} fails {}", c.name, c.value, c.logic))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_writes_triplets() {
        let mut qc = QcSet::new();
        assert!(qc.check("DARK_MED", 0.2, "DARK_MED < 0.5", true));
        assert!(!qc.check("DARK_DEAD", 12.0, "DARK_DEAD < 10.0", false));

        let mut header = Header::new();
        qc.stamp(&mut header);

        assert_eq!(header.get(QC_ALL_CARD), Some(&false.into()));
        assert_eq!(header.get_str("QCC001N").as_deref(), Some("DARK_MED"));
        assert_eq!(header.get_f64("QCC002V"), Some(12.0));
        assert_eq!(header.get_str("QCC002L").as_deref(), Some("DARK_DEAD < 10.0"));
        assert_eq!(header.get("QCC002P"), Some(&false.into()));
        assert_eq!(qc.summary(), "DARK_DEAD=12 fails DARK_DEAD < 10.0");
    }

    #[test]
    fn test_empty_set_passes() {
        let qc = QcSet::new();
        assert!(qc.passed());
        let mut header = Header::new();
        qc.stamp(&mut header);
        assert_eq!(header.get(QC_ALL_CARD), Some(&true.into()));
    }
}
