//! Three-way conflict detection and resolution over record payloads.
//!
//! Everything here is pure: the orchestrator feeds in the local, remote and
//! last-synced payloads and persists whatever comes out.

use std::collections::BTreeSet;

use serde_json::{Number, Value};

use crate::models::{Payload, ResolutionStrategy, SyncConflict};
use crate::{Error, Result};

/// Outcome of diffing a local and a remote payload against their common base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    /// Fields both sides changed to different values, sorted by name
    pub conflicting_fields: Vec<String>,
    /// Every non-conflicting change applied; conflicting fields hold the local value
    pub merged: Payload,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicting_fields.is_empty()
    }
}

/// Result of applying a strategy to a conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Payload),
    Deferred,
}

/// Diff `local` and `remote` against `base` field by field.
///
/// A field conflicts when both sides moved away from the base to different
/// values. An absent field is distinct from an explicit `null`.
pub fn detect(local: &Payload, remote: &Payload, base: &Payload) -> ConflictReport {
    let fields: BTreeSet<&String> = local.keys().chain(remote.keys()).chain(base.keys()).collect();

    let mut merged = Payload::new();
    let mut conflicting_fields = Vec::new();

    for field in fields {
        let local_value = local.get(field);
        let remote_value = remote.get(field);
        let base_value = base.get(field);

        let chosen = if local_value == remote_value || remote_value == base_value {
            local_value
        } else if local_value == base_value {
            remote_value
        } else {
            conflicting_fields.push(field.clone());
            local_value
        };

        if let Some(value) = chosen {
            merged.insert(field.clone(), value.clone());
        }
    }

    ConflictReport {
        conflicting_fields,
        merged,
    }
}

/// Apply `strategy` to a conflict.
///
/// `ManualMerge` requires `manual` to carry every conflicting field; the
/// conflict is left untouched on error.
pub fn resolve(
    conflict: &SyncConflict,
    strategy: ResolutionStrategy,
    manual: Option<&Payload>,
) -> Result<Resolution> {
    let report = detect(
        &conflict.local_data,
        &conflict.remote_data,
        &conflict.base_data,
    );
    let mut merged = report.merged;

    match strategy {
        ResolutionStrategy::Defer => return Ok(Resolution::Deferred),
        ResolutionStrategy::ManualMerge => {
            let manual = manual.ok_or_else(|| {
                Error::Validation("manual merge requires a resolved payload".to_string())
            })?;
            let missing = conflict
                .conflicting_fields
                .iter()
                .filter(|field| !manual.contains_key(*field))
                .cloned()
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                return Err(Error::Validation(format!(
                    "manual payload is missing conflicting fields: {}",
                    missing.join(", ")
                )));
            }
            return Ok(Resolution::Resolved(manual.clone()));
        }
        ResolutionStrategy::LocalWins => {
            for field in &conflict.conflicting_fields {
                set_field(&mut merged, field, conflict.local_data.get(field).cloned());
            }
        }
        ResolutionStrategy::RemoteWins => {
            for field in &conflict.conflicting_fields {
                set_field(&mut merged, field, conflict.remote_data.get(field).cloned());
            }
        }
        ResolutionStrategy::AutomaticMerge => {
            for field in &conflict.conflicting_fields {
                let value = merge_field(
                    conflict.base_data.get(field),
                    conflict.local_data.get(field),
                    conflict.remote_data.get(field),
                );
                set_field(&mut merged, field, value);
            }
        }
    }

    Ok(Resolution::Resolved(merged))
}

fn set_field(payload: &mut Payload, field: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            payload.insert(field.to_string(), value);
        }
        None => {
            payload.remove(field);
        }
    }
}

/// A side that dropped the field yields to the side that kept it.
fn merge_field(base: Option<&Value>, local: Option<&Value>, remote: Option<&Value>) -> Option<Value> {
    match (local, remote) {
        (Some(local), Some(remote)) => Some(merge_values(base, local, remote)),
        (Some(value), None) | (None, Some(value)) => Some(value.clone()),
        (None, None) => None,
    }
}

/// Type-aware merge of two concurrently edited values.
///
/// Arrays are unioned (base, local, remote order, no duplicates), objects
/// merge recursively, numbers average, strings keep the longer one with ties
/// going to local. Anything else keeps local.
pub fn merge_values(base: Option<&Value>, local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Array(local_items), Value::Array(remote_items)) => {
            let base_items = base.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
            let mut union: Vec<Value> = Vec::new();
            for item in base_items.iter().chain(local_items).chain(remote_items) {
                if !union.contains(item) {
                    union.push(item.clone());
                }
            }
            Value::Array(union)
        }
        (Value::Object(local_fields), Value::Object(remote_fields)) => {
            let empty = Payload::new();
            let base_fields = base.and_then(Value::as_object).unwrap_or(&empty);
            let report = detect(local_fields, remote_fields, base_fields);
            let mut merged = report.merged;
            for field in &report.conflicting_fields {
                let value = merge_field(
                    base_fields.get(field),
                    local_fields.get(field),
                    remote_fields.get(field),
                );
                set_field(&mut merged, field, value);
            }
            Value::Object(merged)
        }
        (Value::Number(a), Value::Number(b)) => average(a, b).unwrap_or_else(|| local.clone()),
        (Value::String(a), Value::String(b)) => {
            if b.chars().count() > a.chars().count() {
                remote.clone()
            } else {
                local.clone()
            }
        }
        _ => local.clone(),
    }
}

/// Mean of two numbers, staying an integer when the mean is integral.
fn average(a: &Number, b: &Number) -> Option<Value> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let sum = i128::from(a) + i128::from(b);
        if sum % 2 == 0 {
            return i64::try_from(sum / 2).ok().map(Value::from);
        }
    }

    let mean = (a.as_f64()? + b.as_f64()?) / 2.0;
    Number::from_f64(mean).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn conflict(local: Value, remote: Value, base: Value) -> SyncConflict {
        let local = payload(local);
        let remote = payload(remote);
        let base = payload(base);
        let fields = detect(&local, &remote, &base).conflicting_fields;
        SyncConflict::new("notes", "n1", local, remote, base, 2, fields)
    }

    fn resolved(resolution: Resolution) -> Payload {
        match resolution {
            Resolution::Resolved(payload) => payload,
            Resolution::Deferred => panic!("expected a resolved payload"),
        }
    }

    #[test]
    fn test_disjoint_changes_merge_without_conflict() {
        let report = detect(
            &payload(json!({"a": 2, "b": 1})),
            &payload(json!({"a": 1, "b": 2})),
            &payload(json!({"a": 1, "b": 1})),
        );
        assert!(!report.has_conflicts());
        assert_eq!(report.merged, payload(json!({"a": 2, "b": 2})));
    }

    #[test]
    fn test_divergent_change_is_reported() {
        let report = detect(
            &payload(json!({"a": 2})),
            &payload(json!({"a": 3})),
            &payload(json!({"a": 1})),
        );
        assert_eq!(report.conflicting_fields, vec!["a".to_string()]);
        assert_eq!(report.merged, payload(json!({"a": 2})));
    }

    #[test]
    fn test_identical_change_is_not_a_conflict() {
        let report = detect(
            &payload(json!({"a": 5})),
            &payload(json!({"a": 5})),
            &payload(json!({"a": 1})),
        );
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_conflicting_fields_are_sorted() {
        let report = detect(
            &payload(json!({"zeta": 1, "alpha": 1, "mid": 1})),
            &payload(json!({"zeta": 2, "alpha": 2, "mid": 2})),
            &Payload::new(),
        );
        assert_eq!(report.conflicting_fields, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_absent_is_distinct_from_null() {
        let report = detect(
            &payload(json!({"a": null})),
            &payload(json!({"a": 3})),
            &payload(json!({})),
        );
        assert_eq!(report.conflicting_fields, vec!["a".to_string()]);
    }

    #[test]
    fn test_one_sided_removal_is_applied() {
        let report = detect(
            &payload(json!({"a": 1})),
            &payload(json!({"a": 1, "b": 1})),
            &payload(json!({"a": 1, "b": 1})),
        );
        assert!(!report.has_conflicts());
        assert_eq!(report.merged, payload(json!({"a": 1})));
    }

    #[test]
    fn test_local_and_remote_wins() {
        let conflict = conflict(
            json!({"a": 2, "b": "local"}),
            json!({"a": 3, "b": "remote", "c": true}),
            json!({"a": 1, "b": "base"}),
        );

        let local = resolved(resolve(&conflict, ResolutionStrategy::LocalWins, None).unwrap());
        assert_eq!(local, payload(json!({"a": 2, "b": "local", "c": true})));

        let remote = resolved(resolve(&conflict, ResolutionStrategy::RemoteWins, None).unwrap());
        assert_eq!(remote, payload(json!({"a": 3, "b": "remote", "c": true})));
    }

    #[test]
    fn test_local_wins_keeps_local_removal() {
        let conflict = conflict(json!({}), json!({"a": 3}), json!({"a": 1}));
        let local = resolved(resolve(&conflict, ResolutionStrategy::LocalWins, None).unwrap());
        assert_eq!(local, Payload::new());
    }

    #[test]
    fn test_automatic_merge_heuristics() {
        let conflict = conflict(
            json!({"tags": ["a", "b"], "count": 2, "title": "short", "flag": true}),
            json!({"tags": ["a", "c"], "count": 4, "title": "much longer", "flag": false}),
            json!({"tags": ["a"], "count": 1, "title": "t", "flag": null}),
        );

        let merged =
            resolved(resolve(&conflict, ResolutionStrategy::AutomaticMerge, None).unwrap());
        assert_eq!(
            merged,
            payload(json!({
                "tags": ["a", "b", "c"],
                "count": 3,
                "title": "much longer",
                "flag": true,
            }))
        );
    }

    #[test]
    fn test_automatic_merge_recurses_into_objects() {
        let merged = merge_values(
            Some(&json!({"x": 1, "y": 1})),
            &json!({"x": 2, "y": 1}),
            &json!({"x": 1, "y": 5, "z": 0}),
        );
        assert_eq!(merged, json!({"x": 2, "y": 5, "z": 0}));
    }

    #[test]
    fn test_number_average_keeps_fraction_when_needed() {
        assert_eq!(merge_values(None, &json!(1), &json!(2)), json!(1.5));
        assert_eq!(merge_values(None, &json!(-2), &json!(6)), json!(2));
    }

    #[test]
    fn test_string_tie_keeps_local() {
        assert_eq!(merge_values(None, &json!("abc"), &json!("xyz")), json!("abc"));
    }

    #[test]
    fn test_manual_merge_requires_every_conflicting_field() {
        let conflict = conflict(
            json!({"a": 2, "b": 2}),
            json!({"a": 3, "b": 3}),
            json!({"a": 1, "b": 1}),
        );

        let missing = resolve(&conflict, ResolutionStrategy::ManualMerge, None);
        assert!(matches!(missing, Err(Error::Validation(_))));

        let partial = payload(json!({"a": 9}));
        let incomplete = resolve(&conflict, ResolutionStrategy::ManualMerge, Some(&partial));
        assert!(matches!(incomplete, Err(Error::Validation(_))));

        let full = payload(json!({"a": 9, "b": 8}));
        let merged =
            resolved(resolve(&conflict, ResolutionStrategy::ManualMerge, Some(&full)).unwrap());
        assert_eq!(merged, full);
    }

    #[test]
    fn test_defer_resolves_nothing() {
        let conflict = conflict(json!({"a": 2}), json!({"a": 3}), json!({"a": 1}));
        assert_eq!(
            resolve(&conflict, ResolutionStrategy::Defer, None).unwrap(),
            Resolution::Deferred
        );
    }
}
