use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use wf_config::MetricsConfig;
use wf_core::NodeStats;

/// Shared runtime metrics store.
///
/// Counters are lock-free atomics. Per-task label sets are fixed at compile
/// time (one entry per configured task), keeping hot-path updates
/// allocation-free — the same shape as the teacher's per-rule counters, just
/// keyed by task id instead of rule name.
pub struct RuntimeMetrics {
    ingest_points_total: AtomicU64,
    ingest_http_requests_total: AtomicU64,
    ingest_parse_errors_total: AtomicU64,
    ingest_udp_packets_total: AtomicU64,

    task_nodes: BTreeMap<String, AtomicU64>,
    task_running: BTreeMap<String, AtomicU64>,
    task_fork_dropped_total: BTreeMap<String, AtomicU64>,

    /// One `NodeStats` handle per `(task, node)`, the same handle the
    /// compiled node itself holds — so reading it here always reflects the
    /// node's live counters rather than a point-in-time copy.
    node_stats: BTreeMap<(String, String), NodeStats>,

    snapshot_saves_total: AtomicU64,
    snapshot_errors_total: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new(task_names: &[String]) -> Self {
        let make_map = || task_names.iter().map(|n| (n.clone(), AtomicU64::new(0))).collect::<BTreeMap<_, _>>();
        Self {
            ingest_points_total: AtomicU64::new(0),
            ingest_http_requests_total: AtomicU64::new(0),
            ingest_parse_errors_total: AtomicU64::new(0),
            ingest_udp_packets_total: AtomicU64::new(0),
            task_nodes: make_map(),
            task_running: make_map(),
            task_fork_dropped_total: make_map(),
            node_stats: BTreeMap::new(),
            snapshot_saves_total: AtomicU64::new(0),
            snapshot_errors_total: AtomicU64::new(0),
        }
    }

    /// Registers the stats handle a compiled node will update as it runs, so
    /// `/metrics` can report it under its `(task, node)` labels.
    pub fn register_node(&mut self, task: &str, node: &str, stats: NodeStats) {
        self.node_stats.insert((task.to_string(), node.to_string()), stats);
    }

    pub fn inc_ingest_point(&self) {
        self.ingest_points_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingest_http_request(&self) {
        self.ingest_http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingest_parse_error(&self) {
        self.ingest_parse_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingest_udp_packet(&self) {
        self.ingest_udp_packets_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_task_nodes(&self, task: &str, count: usize) {
        if let Some(v) = self.task_nodes.get(task) {
            v.store(count as u64, Ordering::Relaxed);
        }
    }

    pub fn set_task_running(&self, task: &str, running: bool) {
        if let Some(v) = self.task_running.get(task) {
            v.store(running as u64, Ordering::Relaxed);
        }
    }

    pub fn add_task_fork_dropped(&self, task: &str, count: u64) {
        if let Some(v) = self.task_fork_dropped_total.get(task) {
            v.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn inc_snapshot_save(&self) {
        self.snapshot_saves_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_snapshot_error(&self) {
        self.snapshot_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(4 * 1024);

        self.render_counter(&mut out, "wf_ingest_points_total", self.ingest_points_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "wf_ingest_http_requests_total", self.ingest_http_requests_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "wf_ingest_parse_errors_total", self.ingest_parse_errors_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "wf_ingest_udp_packets_total", self.ingest_udp_packets_total.load(Ordering::Relaxed));

        for (task, value) in &self.task_nodes {
            self.render_gauge_labeled(&mut out, "wf_task_nodes", &[("task", task)], value.load(Ordering::Relaxed));
        }
        for (task, value) in &self.task_running {
            self.render_gauge_labeled(&mut out, "wf_task_running", &[("task", task)], value.load(Ordering::Relaxed));
        }
        for (task, value) in &self.task_fork_dropped_total {
            self.render_counter_labeled(&mut out, "wf_task_fork_dropped_total", &[("task", task)], value.load(Ordering::Relaxed));
        }

        for ((task, node), stats) in &self.node_stats {
            let labels = [("task", task.as_str()), ("node", node.as_str())];
            self.render_counter_labeled(&mut out, "wf_node_errors_total", &labels, stats.errors());
            self.render_gauge_labeled(&mut out, "wf_node_exec_avg_micros", &labels, stats.avg_exec_nanos() / 1_000);
            self.render_gauge_labeled(&mut out, "wf_node_cardinality", &labels, stats.cardinality());
        }

        self.render_counter(&mut out, "wf_snapshot_saves_total", self.snapshot_saves_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "wf_snapshot_errors_total", self.snapshot_errors_total.load(Ordering::Relaxed));

        out
    }

    fn render_counter(&self, out: &mut String, name: &str, value: u64) {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }

    fn render_gauge_labeled(&self, out: &mut String, name: &str, labels: &[(&str, &str)], value: u64) {
        let _ = writeln!(out, "# TYPE {name} gauge");
        let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
    }

    fn render_counter_labeled(&self, out: &mut String, name: &str, labels: &[(&str, &str)], value: u64) {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
    }

    pub fn summary_line(&self) -> String {
        format!(
            "ingest_points={} running_tasks={} snapshot_saves={} snapshot_errors={}",
            self.ingest_points_total.load(Ordering::Relaxed),
            self.task_running.values().map(|v| v.load(Ordering::Relaxed)).sum::<u64>(),
            self.snapshot_saves_total.load(Ordering::Relaxed),
            self.snapshot_errors_total.load(Ordering::Relaxed),
        )
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut out = String::from("{");
    for (idx, (key, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push('=');
        out.push('"');
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
    out.push('}');
    out
}

/// Periodically logs a metrics summary line (spec.md §4.10). Serving
/// `/metrics` itself is handled by the ingest axum router, not this task —
/// kept separate so the summary cadence (`report_interval`) can differ from
/// how often the endpoint is scraped.
pub async fn run_metrics_summary_task(
    metrics: Arc<RuntimeMetrics>,
    config: MetricsConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(config.report_interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                wf_info!(res, summary = %metrics.summary_line(), "metrics snapshot");
            }
        }
    }
    Ok(())
}
