use std::collections::HashMap;
use std::sync::Arc;

use orion_error::prelude::*;
use tokio_util::sync::CancellationToken;

use wf_config::{Dbrp, DimensionSpec, GroupDimensions, NodeDef, NodeId, NodeKind, TaskDef};
use wf_core::sink::{
    AlertSink, AlertTopicBus, AutoscaleSink, ExternalScaler, ExternalWriteStore, HttpOutCache,
    HttpOutSink, InfluxOutSink, LoopbackSink,
};
use wf_core::source::{BatchQuerySource, ExternalStore, StreamFromSource};
use wf_core::transform::{
    CombineTransform, DefaultTransform, DeleteTransform, EvalTransform, FlattenTransform,
    GroupByTransform, NoOpTransform, ShiftTransform, SideloadSource, SideloadTransform,
    StateTrackingTransform, TrickleTransform, WhereTransform,
};
use wf_core::udf::UdfBridge;
use wf_core::window::{BarrierIdle, BarrierPeriod, CountWindow, TimeWindow};
use wf_core::join::{JoinTransform, UnionTransform};
use wf_core::{EdgeAbortHandle, EdgeReceiver, EdgeSender, NodeOutputs, NodeStats, OverflowPolicy, edge};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::firehose::{Firehose, FirehoseLoopback};

use super::types::TaskGroup;

/// Capacity of a node-to-node edge. Node edges always use
/// [`OverflowPolicy::Block`] — only the firehose fork uses `DropNewest`.
const NODE_EDGE_CAPACITY: usize = 256;

/// The collaborators every compiled task DAG shares (spec.md §4.10): the
/// firehose it forks from, the external store/scaler/sideload lookups
/// `BatchQuery`/`InfluxOut`/`Autoscale`/`Sideload` nodes call out to, and the
/// alert bus every `Alert` node in every task publishes to and subscribes
/// from (an inhibitor may name another task's topic).
pub struct CompileCtx {
    pub task_id: String,
    pub firehose: Arc<Firehose>,
    pub fork_capacity: usize,
    pub store: Arc<dyn ExternalStore>,
    pub write_store: Arc<dyn ExternalWriteStore>,
    pub scaler: Arc<dyn ExternalScaler>,
    pub sideload: Arc<dyn SideloadSource>,
    pub alert_bus: AlertTopicBus,
}

/// Compile one task's DAG into a running [`TaskGroup`], returning the
/// `HttpOut` caches and per-node stats handles it registered (the latter
/// keyed by node id, for the caller to hand to [`crate::metrics::RuntimeMetrics`]).
pub async fn compile_task(
    def: &TaskDef,
    ctx: &CompileCtx,
    cancel: CancellationToken,
) -> RuntimeResult<(TaskGroup, Vec<(String, HttpOutCache)>, Vec<(NodeId, NodeStats)>)> {
    let order = def
        .topo_order()
        .map_err(|e| StructError::from(RuntimeReason::Bootstrap).with_detail(e))?;

    let mut incoming: HashMap<NodeId, Vec<EdgeReceiver>> = HashMap::new();
    let mut outgoing: HashMap<NodeId, Vec<EdgeSender>> = HashMap::new();
    for e in &def.edges {
        let (tx, rx) = edge(NODE_EDGE_CAPACITY, OverflowPolicy::Block);
        outgoing.entry(e.from.clone()).or_default().push(tx);
        incoming.entry(e.to.clone()).or_default().push(rx);
    }

    let by_id: HashMap<&str, &NodeDef> = def.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut group = TaskGroup::new(def.id.clone());
    let mut http_out_nodes = Vec::new();
    let mut node_stats = Vec::new();

    for node_id in &order {
        let node = by_id
            .get(node_id.as_str())
            .ok_or_else(|| StructError::from(RuntimeReason::Bootstrap).with_detail(format!("node {node_id} not found")))?;
        let ins = incoming.remove(node_id).unwrap_or_default();
        let outs = outgoing.remove(node_id).unwrap_or_default();
        let outputs = NodeOutputs::new(outs);

        spawn_node(&mut group, &mut http_out_nodes, &mut node_stats, &ctx.task_id, node, ins, outputs, ctx, cancel.child_token()).await?;
    }

    Ok((group, http_out_nodes, node_stats))
}

#[allow(clippy::too_many_arguments)]
async fn spawn_node(
    group: &mut TaskGroup,
    http_out_nodes: &mut Vec<(String, HttpOutCache)>,
    node_stats: &mut Vec<(NodeId, NodeStats)>,
    task_id: &str,
    node: &NodeDef,
    ins: Vec<EdgeReceiver>,
    outputs: NodeOutputs,
    ctx: &CompileCtx,
    cancel: CancellationToken,
) -> RuntimeResult<()> {
    match &node.kind {
        NodeKind::StreamFrom {
            database,
            retention_policy,
            measurement,
            predicate,
            on_predicate_error,
            truncate,
            round,
            dimensions,
        } => {
            let dbrp_filter = match (database, retention_policy) {
                (Some(d), Some(r)) => Some(Dbrp { database: d.clone(), retention_policy: r.clone() }),
                _ => None,
            };
            let input = ctx.firehose.register_fork_with_capacity(task_id, ctx.fork_capacity).await;
            let src = StreamFromSource {
                dbrp_filter,
                measurement: measurement.clone(),
                predicate: predicate.clone(),
                on_predicate_error: *on_predicate_error,
                truncate: *truncate,
                round: *round,
                dimensions: dimensions.clone(),
            };
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move {
                src.run(input, outputs, None).await.map_err(|e| anyhow::anyhow!("{e}"))
            }));
        }

        NodeKind::BatchQuery { query, period, every, offset, align } => {
            // wf_config::NodeKind::BatchQuery carries no `dimensions` field;
            // default to grouping by measurement only. A downstream GroupBy
            // node can re-key explicitly when finer grouping is needed.
            let dimensions = GroupDimensions { by_measurement: true, spec: DimensionSpec::Tags(Vec::new()) };
            let src = BatchQuerySource {
                query: query.clone(),
                period: *period,
                every: *every,
                offset: *offset,
                align: *align,
                dimensions,
                store: ctx.store.clone(),
            };
            let aborts = node_aborts(&outputs, &[]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move {
                src.run(outputs, cancel).await.map_err(|e| anyhow::anyhow!("{e}"))
            }));
        }

        NodeKind::GroupBy { dimensions } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = GroupByTransform { dimensions: dimensions.clone() };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Where { predicate, on_predicate_error } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = WhereTransform { predicate: predicate.clone(), on_predicate_error: *on_predicate_error };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Eval { exprs, keep_original_fields, tags, quiet } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = EvalTransform {
                exprs: exprs.clone(),
                keep_original_fields: keep_original_fields.clone(),
                tags: tags.clone(),
                quiet: *quiet,
            };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Default { fields, tags } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = DefaultTransform { fields: fields.clone(), tags: tags.clone() };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Delete { fields, tags } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = DeleteTransform { fields: fields.clone(), tags: tags.clone() };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Flatten { tolerance, dimensions, delimiter } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = FlattenTransform::new(*tolerance, dimensions.clone(), delimiter.clone()).with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Combine { tolerance, max_combinations } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = CombineTransform::new(*tolerance, *max_combinations).with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Shift { shift } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = ShiftTransform { shift: *shift };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Sideload { source_template, fields } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = SideloadTransform {
                source_template: source_template.clone(),
                fields: fields.clone(),
                source: ctx.sideload.clone(),
            };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::StateTracking { mode, predicate, field_name, per_batch } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = StateTrackingTransform::new(*mode, predicate.clone(), field_name.clone(), *per_batch)
                .with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Trickle => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = TrickleTransform;
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::NoOp => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = NoOpTransform;
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::WindowTime { period, every, align: _, fill_period } => {
            // `align` has no counterpart on TimeWindow; windows are always
            // anchored to the first observed barrier, not wall-clock epoch.
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = TimeWindow::new(*period, *every, *fill_period).with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::WindowCount { period, every, fill_period } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = CountWindow::new(*period, *every, *fill_period).with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::BarrierIdle { idle, delete } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = BarrierIdle::new(*idle, *delete).with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::BarrierPeriod { period } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = BarrierPeriod::new(*period).with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Join { tolerance, fill, on } => {
            // Edge order determines side: the edge that appears first among
            // this node's incoming edges feeds `left`, the second feeds
            // `right` (documented in DESIGN.md).
            let mut ins = ins;
            if ins.len() != 2 {
                return Err(StructError::from(RuntimeReason::Bootstrap)
                    .with_detail(format!("join node {} requires exactly 2 inputs, got {}", node.id, ins.len())));
            }
            let right = ins.pop().expect("checked len == 2");
            let left = ins.pop().expect("checked len == 2");
            let aborts = node_aborts(&outputs, &[&left, &right]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = JoinTransform::new(*tolerance, *fill, on.clone()).with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(left, right, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Union => {
            let input_refs: Vec<&EdgeReceiver> = ins.iter().collect();
            let aborts = node_aborts(&outputs, &input_refs);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let t = UnionTransform;
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { t.run(ins, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::HttpOut { endpoint } => {
            let input = take_single(ins, &node.id)?;
            let aborts = vec![input.abort_handle()];
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let cache = HttpOutCache::default();
            http_out_nodes.push((endpoint.clone(), cache.clone()));
            let sink = HttpOutSink { cache };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { sink.run(input).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Alert { levels, topic, state_changes_only, reemit_interval, details_as, inhibitors } => {
            let input = take_single(ins, &node.id)?;
            let aborts = vec![input.abort_handle()];
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let sink = AlertSink::new(
                task_id.to_string(),
                levels.clone(),
                topic.clone(),
                *state_changes_only,
                *reemit_interval,
                *details_as,
                inhibitors.clone(),
                ctx.alert_bus.clone(),
            )
            .with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { sink.run(input).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::InfluxOut {
            database,
            retention_policy,
            measurement,
            batch_size,
            flush_interval,
            max_concurrency,
            field_overlay,
            tag_overlay,
        } => {
            let input = take_single(ins, &node.id)?;
            let aborts = vec![input.abort_handle()];
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let sink = InfluxOutSink {
                dbrp: Dbrp { database: database.clone(), retention_policy: retention_policy.clone() },
                measurement: measurement.clone(),
                batch_size: *batch_size,
                flush_interval: *flush_interval,
                max_concurrency: *max_concurrency,
                field_overlay: field_overlay.clone(),
                tag_overlay: tag_overlay.clone(),
                store: ctx.write_store.clone(),
            };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { sink.run(input).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Loopback { database: _, measurement, batch_size, flush_interval, max_concurrency } => {
            // `database` has no counterpart on LoopbackSink: reinjection
            // always lands back on the firehose under the new measurement.
            let input = take_single(ins, &node.id)?;
            let aborts = vec![input.abort_handle()];
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let sink = LoopbackSink {
                measurement: measurement.clone(),
                batch_size: *batch_size,
                flush_interval: *flush_interval,
                max_concurrency: *max_concurrency,
                firehose: Arc::new(FirehoseLoopback::new(ctx.firehose.clone())),
            };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { sink.run(input).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Autoscale {
            resource_tag,
            static_name,
            expr,
            min,
            max,
            increase_cooldown,
            decrease_cooldown,
        } => {
            let input = take_single(ins, &node.id)?;
            let aborts = vec![input.abort_handle()];
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let sink = AutoscaleSink::new(
                resource_tag.clone(),
                static_name.clone(),
                expr.clone(),
                *min,
                *max,
                *increase_cooldown,
                *decrease_cooldown,
                ctx.scaler.clone(),
            )
            .with_stats(stats.clone());
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { sink.run(input).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }

        NodeKind::Udf { transport, timeout, options } => {
            let input = take_single(ins, &node.id)?;
            let aborts = node_aborts(&outputs, &[&input]);
            let stats = NodeStats::default();
            node_stats.push((node.id.clone(), stats.clone()));
            let bridge = UdfBridge { transport: transport.clone(), timeout: *timeout, options: options.clone() };
            group.push_node(node.id.clone(), aborts, stats.clone(), tokio::spawn(async move { bridge.run(input, outputs).await.map_err(|e| anyhow::anyhow!("{e}")) }));
        }
    }

    Ok(())
}

/// Abort handles for every edge a node touches: its outgoing edges plus
/// whichever incoming edges it was given (spec.md §4.1 `abort(err)`), so a
/// panicking node can unblock its neighbors (see [`super::types::TaskGroup`]).
fn node_aborts(outputs: &NodeOutputs, inputs: &[&EdgeReceiver]) -> Vec<EdgeAbortHandle> {
    let mut aborts = outputs.abort_handles();
    aborts.extend(inputs.iter().map(|r| r.abort_handle()));
    aborts
}

fn take_single(mut ins: Vec<EdgeReceiver>, node_id: &str) -> RuntimeResult<EdgeReceiver> {
    if ins.len() != 1 {
        return Err(StructError::from(RuntimeReason::Bootstrap)
            .with_detail(format!("node {node_id} requires exactly 1 input, got {}", ins.len())));
    }
    Ok(ins.pop().expect("checked len == 1"))
}
