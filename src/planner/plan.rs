// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::invocation::Invocation;

/// A grouped invocation removed because an input can never exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedInvocation {
    pub rule_id: String,
    pub recipe: String,
    pub night: String,
    pub missing: String,
}

/// An enabled rule that produced no invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnboundRule {
    pub rule_id: String,
    pub recipe: String,
    pub reason: String,
}

/// A topologically ordered set of invocations.
///
/// Every invocation appears after all of its upstream invocations, and among
/// independent invocations the order follows (priority, night, recipe).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub invocations: Vec<Invocation>,
    pub dropped: Vec<DroppedInvocation>,
    pub unbound: Vec<UnboundRule>,
}

impl Plan {
    /// A plan of one hand-invoked recipe call.
    pub fn single(invocation: Invocation) -> Self {
        Self {
            id: format!("PLAN-{}", invocation.pid.trim_start_matches("PID-")),
            invocations: vec![invocation],
            dropped: vec![],
            unbound: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn get(&self, pid: &str) -> Option<&Invocation> {
        self.invocations.iter().find(|i| i.pid == pid)
    }

    /// Position of `pid` in plan order.
    pub fn position(&self, pid: &str) -> Option<usize> {
        self.invocations.iter().position(|i| i.pid == pid)
    }

    pub fn nights(&self) -> BTreeSet<&str> {
        self.invocations.iter().map(|i| i.night.as_str()).collect()
    }

    /// Direct dependents of every invocation, by plan position.
    pub fn downstream(&self) -> Vec<Vec<usize>> {
        let positions: HashMap<&str, usize> = self
            .invocations
            .iter()
            .enumerate()
            .map(|(i, inv)| (inv.pid.as_str(), i))
            .collect();
        let mut downstream = vec![Vec::new(); self.invocations.len()];
        for (i, inv) in self.invocations.iter().enumerate() {
            for up in &inv.upstream {
                if let Some(&p) = positions.get(up.as_str()) {
                    downstream[p].push(i);
                }
            }
        }
        downstream
    }
}
