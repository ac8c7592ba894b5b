//! The already-validated task/DAG description (spec.md §1, §3, §4.10).
//!
//! This module is the contract between the (out-of-scope) task planner and
//! the runtime: a `TaskDef` is a directed acyclic graph of `NodeDef`s joined
//! by `EdgeDef`s. Nothing here parses text — a `TaskDef` is constructed
//! directly (by a control plane, or by a test) and handed to
//! `wf-runtime`'s DAG compiler as-is.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::types::HumanDuration;
use crate::value::{FieldKind, FieldValue};

pub type TaskId = String;
pub type NodeId = String;

/// A (database, retention-policy) scope a task is allowed to consume from
/// the firehose (spec.md §3, §4.10).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dbrp {
    pub database: String,
    pub retention_policy: String,
}

impl std::fmt::Display for Dbrp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.database, self.retention_policy)
    }
}

/// Stream tasks run forever against the live firehose; batch tasks poll an
/// external store on a schedule (spec.md §3 Task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Stream,
    Batch,
}

/// A complete task DAG, as handed to the runtime by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    pub id: TaskId,
    pub kind: TaskKind,
    pub dbrps: Vec<Dbrp>,
    pub nodes: Vec<NodeDef>,
    pub edges: Vec<EdgeDef>,
}

impl TaskDef {
    /// Topologically sort node ids (Kahn's algorithm); used by the lifecycle
    /// compiler to `init` parents before children (spec.md §4.10).
    pub fn topo_order(&self) -> Result<Vec<NodeId>, String> {
        let mut indegree: HashMap<&str, usize> = self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for e in &self.edges {
            *indegree.get_mut(e.to.as_str()).ok_or_else(|| format!("edge to unknown node {}", e.to))? += 1;
            adj.entry(e.from.as_str()).or_default().push(e.to.as_str());
        }
        let mut queue: Vec<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        queue.sort();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut indegree = indegree;
        while let Some(id) = queue.pop() {
            order.push(id.to_string());
            if let Some(children) = adj.get(id) {
                let mut newly_ready = Vec::new();
                for &child in children {
                    let d = indegree.get_mut(child).expect("child must be indexed");
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(child);
                    }
                }
                newly_ready.sort();
                queue.extend(newly_ready);
            }
        }
        if order.len() != self.nodes.len() {
            return Err("DAG contains a cycle".to_string());
        }
        Ok(order)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: NodeId,
    pub to: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: NodeId,
    pub kind: NodeKind,
}

/// How a node re-keys or establishes group membership (spec.md §3 Group,
/// §4.4 StreamFrom, §4.5 GroupBy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDimensions {
    pub by_measurement: bool,
    pub spec: DimensionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DimensionSpec {
    /// Group by exactly these tag names.
    Tags(Vec<String>),
    /// Group by every tag except these (the "all tags" option with an
    /// exclude list, spec.md §4.4/§4.5).
    AllExcept(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnPredicateError {
    Drop,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeepFields {
    All,
    None,
    Named(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    None,
    Null,
    Previous,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Ok,
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailsAs {
    None,
    Tag,
    Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLevelRule {
    pub level: AlertLevel,
    pub predicate: Expr,
    /// Prevents lowering the level until satisfied (spec.md §4.8).
    pub reset: Option<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideloadField {
    pub name: String,
    pub default: FieldValue,
    pub coerce: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTrackingMode {
    Duration,
    Count,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UdfTransport {
    Process { path: String, args: Vec<String> },
    Socket { path: String },
}

/// The closed set of node kinds named in spec.md §4 (C4-C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    // --- C4 Source nodes ---
    StreamFrom {
        database: Option<String>,
        retention_policy: Option<String>,
        measurement: String,
        predicate: Option<Expr>,
        on_predicate_error: OnPredicateError,
        truncate: Option<HumanDuration>,
        round: Option<HumanDuration>,
        dimensions: GroupDimensions,
    },
    BatchQuery {
        query: String,
        period: HumanDuration,
        every: HumanDuration,
        offset: HumanDuration,
        align: bool,
    },

    // --- C5 Transform nodes ---
    GroupBy {
        dimensions: GroupDimensions,
    },
    Where {
        predicate: Expr,
        on_predicate_error: OnPredicateError,
    },
    Eval {
        exprs: Vec<(String, Expr)>,
        keep_original_fields: KeepFields,
        tags: Vec<String>,
        quiet: bool,
    },
    Default {
        fields: Vec<(String, FieldValue)>,
        tags: Vec<(String, String)>,
    },
    Delete {
        fields: Vec<String>,
        tags: Vec<String>,
    },
    Flatten {
        tolerance: HumanDuration,
        dimensions: Vec<String>,
        delimiter: String,
    },
    Combine {
        tolerance: HumanDuration,
        max_combinations: usize,
    },
    Shift {
        shift: HumanDurationSigned,
    },
    Sideload {
        source_template: String,
        fields: Vec<SideloadField>,
    },
    StateTracking {
        mode: StateTrackingMode,
        predicate: Expr,
        field_name: String,
        per_batch: bool,
    },
    Trickle,
    NoOp,

    // --- C6 Window & barrier ---
    WindowTime {
        period: HumanDuration,
        every: HumanDuration,
        align: bool,
        fill_period: bool,
    },
    WindowCount {
        period: usize,
        every: usize,
        fill_period: bool,
    },
    BarrierIdle {
        idle: HumanDuration,
        delete: bool,
    },
    BarrierPeriod {
        period: HumanDuration,
    },

    // --- C7 Join & union ---
    Join {
        tolerance: HumanDuration,
        fill: FillPolicy,
        on: Vec<String>,
    },
    Union,

    // --- C8 Sink nodes ---
    HttpOut {
        endpoint: String,
    },
    Alert {
        levels: Vec<AlertLevelRule>,
        topic: String,
        state_changes_only: bool,
        reemit_interval: Option<HumanDuration>,
        details_as: DetailsAs,
        inhibitors: Vec<String>,
    },
    InfluxOut {
        database: String,
        retention_policy: String,
        measurement: String,
        batch_size: usize,
        flush_interval: HumanDuration,
        max_concurrency: usize,
        field_overlay: Vec<(String, FieldValue)>,
        tag_overlay: Vec<(String, String)>,
    },
    Loopback {
        database: String,
        measurement: String,
        batch_size: usize,
        flush_interval: HumanDuration,
        max_concurrency: usize,
    },
    Autoscale {
        resource_tag: Option<String>,
        static_name: Option<String>,
        expr: Expr,
        min: i64,
        max: i64,
        increase_cooldown: HumanDuration,
        decrease_cooldown: HumanDuration,
    },

    // --- C9 UDF ---
    Udf {
        transport: UdfTransport,
        timeout: HumanDuration,
        options: serde_json::Value,
    },
}

/// Signed duration wrapper for Shift (spec.md §4.5: "positive or negative").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDurationSigned {
    pub nanos: i64,
}

impl HumanDurationSigned {
    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    pub fn as_nanos_signed(&self) -> i64 {
        self.nanos
    }
}

impl From<Duration> for HumanDurationSigned {
    fn from(d: Duration) -> Self {
        Self {
            nanos: d.as_nanos() as i64,
        }
    }
}
