use std::fmt;

use serde::{Deserialize, Serialize};

/// A single field or tag value carried by a [`Point`](crate::dag) — the
/// closed set named in spec.md §3: int64, float64, bool, or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Bool(_) | FieldValue::Str(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `any -> string` coercion, used by Sideload (spec.md §4.5) and tag
    /// promotion in Eval (spec.md §4.5).
    pub fn to_display_string(&self) -> String {
        match self {
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Str(s) => s.clone(),
        }
    }

    /// `string -> int/float/bool` coercion with the other safe numeric
    /// coercions named in spec.md §4.5 (Sideload).
    pub fn coerce_to(&self, kind: FieldKind) -> Option<FieldValue> {
        match (self, kind) {
            (FieldValue::Int(_), FieldKind::Int)
            | (FieldValue::Float(_), FieldKind::Float)
            | (FieldValue::Bool(_), FieldKind::Bool)
            | (FieldValue::Str(_), FieldKind::Str) => Some(self.clone()),
            (FieldValue::Int(i), FieldKind::Float) => Some(FieldValue::Float(*i as f64)),
            (FieldValue::Float(f), FieldKind::Int) => Some(FieldValue::Int(*f as i64)),
            (FieldValue::Str(s), FieldKind::Int) => s.parse::<i64>().ok().map(FieldValue::Int),
            (FieldValue::Str(s), FieldKind::Float) => s.parse::<f64>().ok().map(FieldValue::Float),
            (FieldValue::Str(s), FieldKind::Bool) => s.parse::<bool>().ok().map(FieldValue::Bool),
            (_, FieldKind::Str) => Some(FieldValue::Str(self.to_display_string())),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Target type for [`FieldValue::coerce_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    Str,
}
