//! Validity of a stored artifact against the current records.
//!
//! Fingerprint equality already implies equal markers for entries found by
//! key; this check additionally bounds artifact age and guards against a
//! relation being swapped for a different entity.

use std::time::{Duration, SystemTime};

use crate::fingerprint::{EntityRole, VersionSnapshot};
use crate::infra::cache::ArtifactEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// A relation now points at a different entity.
    IdentityChanged,
    /// Same entity, newer (or older) last-modified marker.
    MarkerChanged,
    /// The snapshots do not cover the same chain of roles.
    ShapeChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Expired { age: Duration },
    Stale {
        role: Option<EntityRole>,
        reason: StaleReason,
    },
}

impl Freshness {
    pub fn is_valid(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessValidator {
    max_age: Duration,
}

impl FreshnessValidator {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn check(
        &self,
        entry: &ArtifactEntry,
        current: &VersionSnapshot,
    ) -> Freshness {
        self.check_at(entry, current, SystemTime::now())
    }

    pub fn is_valid(
        &self,
        entry: &ArtifactEntry,
        current: &VersionSnapshot,
    ) -> bool {
        self.check(entry, current).is_valid()
    }

    pub fn check_at(
        &self,
        entry: &ArtifactEntry,
        current: &VersionSnapshot,
        now: SystemTime,
    ) -> Freshness {
        // A creation time in the future (clock skew) counts as age zero.
        let age = now.duration_since(entry.created_at).unwrap_or_default();
        // Zero disables the age bound, as it does for the sweep.
        if !self.max_age.is_zero() && age > self.max_age {
            return Freshness::Expired { age };
        }

        compare_snapshots(&entry.snapshot, current)
    }
}

fn compare_snapshots(
    stored: &VersionSnapshot,
    current: &VersionSnapshot,
) -> Freshness {
    let stored = stored.stamps();
    let current = current.stamps();
    if stored.len() != current.len() {
        return Freshness::Stale {
            role: None,
            reason: StaleReason::ShapeChanged,
        };
    }

    for (then, now) in stored.iter().zip(current) {
        if then.role != now.role {
            return Freshness::Stale {
                role: Some(now.role),
                reason: StaleReason::ShapeChanged,
            };
        }
        if then.id != now.id {
            return Freshness::Stale {
                role: Some(now.role),
                reason: StaleReason::IdentityChanged,
            };
        }
        if then.updated_at != now.updated_at {
            return Freshness::Stale {
                role: Some(now.role),
                reason: StaleReason::MarkerChanged,
            };
        }
    }

    Freshness::Fresh
}
