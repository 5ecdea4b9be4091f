//! Field-level change lists for UPDATE records.
//!
//! Both snapshots are compared as JSON.  Nested objects are walked and
//! reported with dotted paths (`location.site`); arrays and scalars are
//! compared whole.  Numbers compare with a small tolerance so a value that
//! went through an `f64` round trip does not show up as changed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const FLOAT_EPSILON: f64 = 1e-9;

/// Fields never worth reporting as changed.
pub const DEFAULT_EXCLUDED: &[&str] = &["id", "updated_at"];

/// One changed field between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

impl FieldChange {
    /// `from` rendered as a plain string, for `AuditEntry::old_value`.
    pub fn from_text(&self) -> Option<String> {
        scalar_text(&self.from)
    }

    /// `to` rendered as a plain string, for `AuditEntry::new_value`.
    pub fn to_text(&self) -> Option<String> {
        scalar_text(&self.to)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => (fx - fy).abs() < FLOAT_EPSILON,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(vx, vy)| values_equal(vx, vy))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, vx)| y.get(key).is_some_and(|vy| values_equal(vx, vy)))
        }
        _ => a == b,
    }
}

fn diff_into(from: &Value, to: &Value, path: &str, changes: &mut Vec<FieldChange>) {
    match (from, to) {
        (Value::Object(from_obj), Value::Object(to_obj)) => {
            let keys: BTreeSet<&String> = from_obj.keys().chain(to_obj.keys()).collect();
            for key in keys {
                let field = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                let before = from_obj.get(key).unwrap_or(&Value::Null);
                let after = to_obj.get(key).unwrap_or(&Value::Null);
                diff_into(before, after, &field, changes);
            }
        }
        _ => {
            if !values_equal(from, to) {
                changes.push(FieldChange {
                    field: path.to_string(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
    }
}

/// Every field that differs between `old` and `new`, sorted by path.
///
/// Top-level keys listed in `exclude` are skipped.
pub fn field_changes(old: &Value, new: &Value, exclude: &[&str]) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    diff_into(old, new, "", &mut changes);
    changes.retain(|c| {
        let top = c.field.split('.').next().unwrap_or_default();
        !exclude.contains(&top)
    });
    changes
}

/// Wrap `changes` as the `additional_data` payload of an UPDATE record.
pub fn changes_payload(changes: &[FieldChange]) -> Value {
    json!({ "changes": changes })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
