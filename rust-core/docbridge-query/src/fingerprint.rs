// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query fingerprints.
//!
//! A fingerprint is a SHA-256 digest of the query's shape: namespace,
//! clauses, selected columns, grouping, ordering, paging and aggregate.
//! Two plans with the same shape always produce the same fingerprint, so
//! callers can key an external result cache on it. Projection and
//! passthrough options are not part of the shape.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::QueryError;
use crate::plan::QueryPlan;

/// Hex-encoded SHA-256 of a query shape.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The full 64-character hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fp_{}", &self.0[..12.min(self.0.len())])
    }
}

/// Fingerprint `plan` within `namespace` (usually `database.collection`).
pub fn fingerprint(namespace: &str, plan: &QueryPlan) -> Result<Fingerprint, QueryError> {
    let shape = (
        namespace,
        &plan.clauses,
        &plan.columns,
        &plan.groups,
        &plan.orders,
        plan.skip,
        plan.limit,
        &plan.aggregate,
    );
    let bytes = serde_json::to_vec(&shape)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    Ok(Fingerprint(
        digest.iter().map(|b| format!("{:02x}", b)).collect(),
    ))
}
