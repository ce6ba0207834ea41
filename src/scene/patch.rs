//! Structured text patches for scene files.
//!
//! Each operation is decoded from JSON and applied to an in-memory copy
//! before the next one is looked at, so the first bad operation in list
//! order is the one reported. The caller writes the result only when every
//! operation applied.

use serde_json::{Map, Value};

/// One decoded patch operation.
#[derive(Debug, Clone, PartialEq)]
enum PatchOp {
    Replace { old: String, new: String, count: usize },
    InsertBefore { anchor: String, text: String, occurrence: usize },
    InsertAfter { anchor: String, text: String, occurrence: usize },
    Append { text: String },
    Prepend { text: String },
}

/// Why a patch was rejected. `message` is the short hint, `error` the detail.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchFailure {
    pub message: &'static str,
    pub error: String,
}

impl PatchFailure {
    fn new(message: &'static str, error: impl Into<String>) -> Self {
        Self {
            message,
            error: error.into(),
        }
    }
}

/// Decode and apply `patch` (one operation object or a non-empty list of
/// them) to `original`. Returns the patched text and the operation count.
pub fn apply(original: &str, patch: &Value) -> Result<(String, usize), PatchFailure> {
    let items: Vec<&Value> = match patch {
        Value::Array(items) if !items.is_empty() => items.iter().collect(),
        Value::Object(_) => vec![patch],
        _ => {
            return Err(PatchFailure::new(
                "Invalid patch format.",
                "patch must be a dict or a non-empty list of dicts",
            ));
        }
    };
    let mut text = original.to_string();
    for item in &items {
        text = apply_op(text, &parse_op(item)?)?;
    }
    Ok((text, items.len()))
}

fn parse_op(item: &Value) -> Result<PatchOp, PatchFailure> {
    let Value::Object(obj) = item else {
        return Err(PatchFailure::new(
            "Invalid patch operation.",
            "Each patch operation must be an object/dict",
        ));
    };

    let name = ["op", "type"]
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .ok_or_else(|| PatchFailure::new("Invalid patch operation.", "Missing patch field 'op'"))?;

    match name {
        "replace" => {
            let bad = || PatchFailure::new("Invalid replace operation.", "replace op requires string fields 'old' and 'new'");
            let old = str_field(obj, "old").ok_or_else(bad)?;
            let new = str_field(obj, "new").ok_or_else(bad)?;
            let count = positive_field(obj, "count")
                .map_err(|_| PatchFailure::new("Invalid replace operation.", "replace op 'count' must be an int >= 1"))?;
            Ok(PatchOp::Replace { old, new, count })
        }
        "insert_before" | "insert_after" => {
            let bad = || PatchFailure::new("Invalid insert operation.", "insert op requires string fields 'anchor' and 'text'");
            let anchor = str_field(obj, "anchor").ok_or_else(bad)?;
            let text = str_field(obj, "text").ok_or_else(bad)?;
            let occurrence = positive_field(obj, "occurrence")
                .map_err(|_| PatchFailure::new("Invalid insert operation.", "insert op 'occurrence' must be an int >= 1"))?;
            Ok(if name == "insert_before" {
                PatchOp::InsertBefore { anchor, text, occurrence }
            } else {
                PatchOp::InsertAfter { anchor, text, occurrence }
            })
        }
        "append" | "prepend" => {
            let text = str_field(obj, "text").ok_or_else(|| {
                PatchFailure::new(
                    "Invalid append/prepend operation.",
                    "append/prepend op requires string field 'text'",
                )
            })?;
            Ok(if name == "append" {
                PatchOp::Append { text }
            } else {
                PatchOp::Prepend { text }
            })
        }
        other => Err(PatchFailure::new("Unsupported patch operation.", format!("Unsupported op: {other}"))),
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Missing ⇒ 1; present must be an integer >= 1. `true` counts as 1.
fn positive_field(obj: &Map<String, Value>, key: &str) -> Result<usize, ()> {
    match obj.get(key) {
        None | Some(Value::Bool(true)) => Ok(1),
        Some(v) => v
            .as_u64()
            .filter(|n| *n >= 1)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(()),
    }
}

/// Byte index of the `n`-th (1-based) non-overlapping occurrence of `needle`.
fn find_nth(haystack: &str, needle: &str, n: usize) -> Option<usize> {
    haystack.match_indices(needle).nth(n.checked_sub(1)?).map(|(i, _)| i)
}

fn apply_op(text: String, op: &PatchOp) -> Result<String, PatchFailure> {
    Ok(match op {
        PatchOp::Replace { old, new, count } => {
            if old.is_empty() || !text.contains(old.as_str()) {
                return Err(PatchFailure::new("Patch could not be applied.", "replace target not found"));
            }
            text.replacen(old.as_str(), new, *count)
        }
        PatchOp::InsertBefore { anchor, text: ins, occurrence }
        | PatchOp::InsertAfter { anchor, text: ins, occurrence } => {
            let idx = if anchor.is_empty() { None } else { find_nth(&text, anchor, *occurrence) };
            let Some(idx) = idx else {
                return Err(PatchFailure::new("Patch could not be applied.", "insert anchor not found"));
            };
            let at = match op {
                PatchOp::InsertBefore { .. } => idx,
                _ => idx + anchor.len(),
            };
            let mut out = String::with_capacity(text.len() + ins.len());
            out.push_str(&text[..at]);
            out.push_str(ins);
            out.push_str(&text[at..]);
            out
        }
        PatchOp::Append { text: add } => text + add,
        PatchOp::Prepend { text: add } => format!("{add}{text}"),
    })
}
