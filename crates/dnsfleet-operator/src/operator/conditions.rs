use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use super::crd::Condition;

pub const AVAILABLE: &str = "Available";
pub const PROGRESSING: &str = "Progressing";
pub const DEGRADED: &str = "Degraded";
pub const UPGRADEABLE: &str = "Upgradeable";

pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Status, reason and message; the transition time is bookkeeping.
pub fn same_substance(a: &Condition, b: &Condition) -> bool {
    a.status == b.status && a.reason == b.reason && a.message == b.message
}

/// Merges `updates` into `existing`. A type appears at most once in the result.
/// An updated condition keeps the stored transition time unless its substance
/// changed, in which case it is stamped with `now`.
pub fn merge_conditions(
    existing: &[Condition],
    updates: Vec<Condition>,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let mut merged: BTreeMap<String, Condition> = BTreeMap::new();
    for condition in existing {
        merged
            .entry(condition.type_.clone())
            .or_insert_with(|| condition.clone());
    }
    for mut condition in updates {
        condition.last_transition_time = match merged.get(&condition.type_) {
            Some(old) if same_substance(old, &condition) => old.last_transition_time.or(Some(now)),
            _ => Some(now),
        };
        merged.insert(condition.type_.clone(), condition);
    }
    merged.into_values().collect()
}

fn by_type(conditions: &[Condition]) -> BTreeMap<&str, &Condition> {
    conditions.iter().map(|c| (c.type_.as_str(), c)).collect()
}

/// Order-insensitive comparison ignoring transition times. Callers pass an empty
/// slice for a missing condition list. A list repeating a type never equals
/// one that does not, so a stored duplicate gets rewritten.
pub fn conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    let (left, right) = (by_type(a), by_type(b));
    left.len() == a.len()
        && right.len() == b.len()
        && left.len() == right.len()
        && left.iter().all(|(type_, l)| {
            right
                .get(type_)
                .map_or(false, |r| same_substance(l, r))
        })
}

/// Holds back a flip to Degraded=True while the previous recovery is younger
/// than `toleration`, so a flapping workload does not flap the condition.
/// Returns the condition to store and whether it was held back.
pub fn tolerate_degraded(
    computed: Condition,
    previous: Option<&Condition>,
    now: DateTime<Utc>,
    toleration: Duration,
) -> (Condition, bool) {
    let Some(previous) = previous else {
        return (computed, false);
    };
    if !computed.is_true() || !previous.is_false() {
        return (computed, false);
    }
    match previous.last_transition_time {
        Some(recovered_at) if now - recovered_at < toleration => (previous.clone(), true),
        _ => (computed, false),
    }
}
