use std::time::Duration;

/// Process-wide bounds on the artifact store.
///
/// A zero `max_age` or `max_total_bytes` disables that bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    pub max_age: Duration,
    pub max_total_bytes: u64,
}

impl CacheBudget {
    pub const fn new(max_age: Duration, max_total_bytes: u64) -> Self {
        Self {
            max_age,
            max_total_bytes,
        }
    }

    pub(crate) fn max_age_ms(&self) -> u64 {
        self.max_age.as_millis().min(u128::from(u64::MAX)) as u64
    }
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            max_total_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Expired,
    OverBudget,
}

#[derive(Debug, Clone)]
pub struct CandidateEntry {
    pub key: String,
    pub size_bytes: u64,
    pub created_ms: u64,
    pub last_access_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PlannedEviction {
    pub key: String,
    pub size_bytes: u64,
    pub reason: EvictionReason,
}

#[derive(Debug, Default)]
pub struct EvictionPlan {
    pub planned: Vec<PlannedEviction>,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
}

/// Expired entries go first, whatever the size pressure. If the survivors
/// still exceed the byte budget, the least recently accessed go next.
pub fn plan_evictions(
    entries: Vec<CandidateEntry>,
    now_ms: u64,
    budget: &CacheBudget,
) -> EvictionPlan {
    let mut plan = EvictionPlan::default();
    let max_age_ms = budget.max_age_ms();
    let max_bytes = budget.max_total_bytes;

    let mut total_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();
    plan.total_bytes_before = total_bytes;

    let mut kept: Vec<CandidateEntry> = Vec::with_capacity(entries.len());
    for e in entries {
        let age_ms = now_ms.saturating_sub(e.created_ms);
        if max_age_ms > 0 && age_ms > max_age_ms {
            total_bytes = total_bytes.saturating_sub(e.size_bytes);
            plan.planned.push(PlannedEviction {
                key: e.key,
                size_bytes: e.size_bytes,
                reason: EvictionReason::Expired,
            });
        } else {
            kept.push(e);
        }
    }

    if max_bytes > 0 && total_bytes > max_bytes {
        // Ties on access time fall back to creation order.
        kept.sort_by_key(|e| (e.last_access_ms, e.created_ms));
        for e in kept {
            if total_bytes <= max_bytes {
                break;
            }
            total_bytes = total_bytes.saturating_sub(e.size_bytes);
            plan.planned.push(PlannedEviction {
                key: e.key,
                size_bytes: e.size_bytes,
                reason: EvictionReason::OverBudget,
            });
        }
    }

    plan.total_bytes_after = total_bytes;
    plan
}
