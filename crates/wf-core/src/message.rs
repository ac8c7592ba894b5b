use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wf_config::{Dbrp, FieldValue};

use crate::group::GroupKey;

/// A single measurement point (spec.md §3 Point): a measurement name, a set
/// of tags (the group-defining dimensions), a set of fields, and a
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub dbrp: Option<Dbrp>,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub time: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            dbrp: None,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Derive this point's group key for a given set of dimensions
    /// (spec.md §3 Group, §4.5 GroupBy).
    pub fn group_key(&self, dims: &wf_config::GroupDimensions) -> GroupKey {
        GroupKey::from_point(self, dims)
    }
}

/// A bounded sequence of points sharing no particular ordering guarantee
/// beyond arrival order (spec.md §3 Batch) — the unit BatchQuery and window
/// flush operations emit.
pub type Batch = Vec<Point>;

/// A watermark advancing a group's clock without carrying data (spec.md §3
/// Barrier, §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct Barrier {
    pub time: DateTime<Utc>,
}

/// The unit of flow between nodes (spec.md §4.1 C1 Message & Edge).
///
/// Every variant is tagged with the [`GroupKey`] the nearest upstream
/// StreamFrom/GroupBy established, so that a node needing independent
/// per-group state (window, join buffer, alert state machine) never has to
/// recompute it from raw tags. A `Point` carries one measurement row; a
/// `Batch` carries a pre-grouped bundle (window flush, batch-query result);
/// a `Barrier` carries no data, only a watermark advance for one group;
/// `DeleteGroup` is terminal for its group on this edge (spec.md §3
/// invariant 5) — every grouped consumer downstream must release whatever
/// per-group state it holds for it and expect no further messages for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Point(GroupKey, Point),
    Batch(GroupKey, Batch),
    Barrier(GroupKey, Barrier),
    DeleteGroup(GroupKey),
}

impl Message {
    pub fn group(&self) -> &GroupKey {
        match self {
            Message::Point(g, _)
            | Message::Batch(g, _)
            | Message::Barrier(g, _)
            | Message::DeleteGroup(g) => g,
        }
    }

    pub fn as_point(&self) -> Option<&Point> {
        match self {
            Message::Point(_, p) => Some(p),
            _ => None,
        }
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self, Message::Barrier(..))
    }

    pub fn is_delete_group(&self) -> bool {
        matches!(self, Message::DeleteGroup(_))
    }

    /// The event time this message represents, for barrier/watermark
    /// comparisons (spec.md §4.6). `DeleteGroup` carries no timestamp of its
    /// own; it is terminal, so its notional event time is "now".
    pub fn event_time(&self) -> DateTime<Utc> {
        match self {
            Message::Point(_, p) => p.time,
            Message::Batch(_, b) => b.last().map(|p| p.time).unwrap_or_else(Utc::now),
            Message::Barrier(_, b) => b.time,
            Message::DeleteGroup(_) => Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_builder_sets_tags_and_fields() {
        let p = Point::new("cpu", Utc::now())
            .with_tag("host", "a")
            .with_field("usage", 42.0);
        assert_eq!(p.tags.get("host").map(String::as_str), Some("a"));
        assert_eq!(p.fields.get("usage"), Some(&FieldValue::Float(42.0)));
    }
}
