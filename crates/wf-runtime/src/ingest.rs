use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use wf_config::{Dbrp, FieldValue, IngestConfig, TaskId};
use wf_core::message::Point;
use wf_core::sink::{CachedResponse, HttpOutCache};

use crate::firehose::Firehose;
use crate::metrics::RuntimeMetrics;

/// Keyed by `(task_id, endpoint)`, mirroring the `GET /<task>/<endpoint>`
/// route below (spec.md §6). Populated by bootstrap as tasks compile.
pub type HttpOutRegistry = Arc<tokio::sync::RwLock<HashMap<(TaskId, String), HttpOutCache>>>;

#[derive(Clone)]
struct IngestState {
    firehose: Arc<Firehose>,
    http_out: HttpOutRegistry,
    metrics: Arc<RuntimeMetrics>,
}

/// Accepts line-protocol writes over HTTP and UDP, and serves `HttpOut`
/// caches and the Prometheus metrics text (spec.md §6).
///
/// One axum router handles both concerns — there is no separate raw
/// `TcpListener` for metrics, unlike the teacher's old standalone metrics
/// server: folding it into the same router keeps a single listen address
/// for operators to point at (see DESIGN.md).
pub struct IngestServer {
    listener: TcpListener,
    udp: Option<UdpSocket>,
    addr: SocketAddr,
    firehose: Arc<Firehose>,
    http_out: HttpOutRegistry,
    metrics: Arc<RuntimeMetrics>,
}

impl IngestServer {
    pub async fn bind(
        config: &IngestConfig,
        firehose: Arc<Firehose>,
        http_out: HttpOutRegistry,
        metrics: Arc<RuntimeMetrics>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.http_listen).await?;
        let addr = listener.local_addr()?;
        let udp = match &config.udp_listen {
            Some(udp_addr) => Some(UdpSocket::bind(udp_addr).await?),
            None => None,
        };
        Ok(Self { listener, udp, addr, firehose, http_out, metrics })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[tracing::instrument(name = "ingest", skip_all, fields(listen = %self.addr))]
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let state = IngestState {
            firehose: Arc::clone(&self.firehose),
            http_out: self.http_out,
            metrics: Arc::clone(&self.metrics),
        };
        let app = Router::new()
            .route("/write", post(write_handler))
            .route("/metrics", get(metrics_handler))
            .route("/{task_id}/{endpoint}", get(http_out_handler))
            .with_state(state);

        if let Some(udp) = self.udp {
            tokio::spawn(run_udp_listener(udp, Arc::clone(&self.firehose), Arc::clone(&self.metrics), cancel.child_token()));
        }

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    db: Option<String>,
    rp: Option<String>,
}

async fn write_handler(
    State(state): State<IngestState>,
    Query(params): Query<WriteParams>,
    body: String,
) -> impl IntoResponse {
    let dbrp = match (params.db, params.rp) {
        (Some(database), Some(retention_policy)) => Some(Dbrp { database, retention_policy }),
        _ => None,
    };
    let mut accepted = 0u64;
    for line in body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line_protocol(line, dbrp.clone()) {
            Some(point) => {
                state.firehose.publish(point).await;
                state.metrics.inc_ingest_point();
                accepted += 1;
            }
            None => state.metrics.inc_ingest_parse_error(),
        }
    }
    state.metrics.inc_ingest_http_request();
    wf_debug!(conn, accepted, "write request processed");
    StatusCode::NO_CONTENT
}

async fn http_out_handler(
    State(state): State<IngestState>,
    Path((task_id, endpoint)): Path<(String, String)>,
) -> Response {
    let cache = state.http_out.read().await.get(&(task_id.clone(), endpoint.clone())).cloned();
    let Some(cache) = cache else {
        return (StatusCode::NOT_FOUND, format!("no httpOut node {endpoint:?} on task {task_id:?}")).into_response();
    };
    let snapshot = cache.snapshot().await;
    Json(render_series(&snapshot)).into_response()
}

async fn metrics_handler(State(state): State<IngestState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], state.metrics.render_prometheus())
}

async fn run_udp_listener(socket: UdpSocket, firehose: Arc<Firehose>, metrics: Arc<RuntimeMetrics>, cancel: CancellationToken) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, _peer)) => {
                        metrics.inc_ingest_udp_packet();
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        for line in text.lines() {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match parse_line_protocol(line, None) {
                                Some(point) => {
                                    firehose.publish(point).await;
                                    metrics.inc_ingest_point();
                                }
                                None => metrics.inc_ingest_parse_error(),
                            }
                        }
                    }
                    Err(e) => wf_warn!(conn, error = %e, "udp ingest recv error"),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Render a `HttpOut` cache snapshot into the series shape clients poll
/// (spec.md §6): one entry per distinct `(measurement, tags)` pair, with a
/// shared `columns` header and one row per point.
fn render_series(snapshot: &CachedResponse) -> serde_json::Value {
    let mut series: BTreeMap<(String, Vec<(String, String)>), (Vec<String>, Vec<Vec<serde_json::Value>>)> = BTreeMap::new();
    for point in &snapshot.points {
        let tags: Vec<(String, String)> = point.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let key = (point.measurement.clone(), tags);
        let entry = series.entry(key).or_insert_with(|| {
            let mut columns = vec!["time".to_string()];
            columns.extend(point.fields.keys().cloned());
            (columns, Vec::new())
        });
        let mut row = vec![serde_json::Value::String(point.time.to_rfc3339())];
        for column in entry.0.iter().skip(1) {
            row.push(field_value_to_json(point.fields.get(column)));
        }
        entry.1.push(row);
    }
    let series: Vec<serde_json::Value> = series
        .into_iter()
        .map(|((name, tags), (columns, values))| {
            serde_json::json!({
                "name": name,
                "tags": tags.into_iter().collect::<BTreeMap<_, _>>(),
                "columns": columns,
                "values": values,
            })
        })
        .collect();
    serde_json::json!({ "series": series })
}

fn field_value_to_json(value: Option<&FieldValue>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(FieldValue::Int(i)) => serde_json::Value::from(*i),
        Some(FieldValue::Float(f)) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Some(FieldValue::Bool(b)) => serde_json::Value::Bool(*b),
        Some(FieldValue::Str(s)) => serde_json::Value::String(s.clone()),
    }
}

/// Parse one line-protocol line: `measurement[,tag=value...] field=value[,field=value...] [timestamp]`.
///
/// Handles the common cases (quoted strings, `i`-suffixed ints, bools,
/// floats) but not backslash-escaped commas/spaces inside tag or field
/// keys — real deployments speaking escaped line protocol would need a
/// fuller parser (see DESIGN.md).
fn parse_line_protocol(line: &str, dbrp: Option<Dbrp>) -> Option<Point> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key_part, rest) = split_unquoted(line, ' ')?;
    let (fields_part, ts_part) = match split_unquoted(rest, ' ') {
        Some((fields, ts)) => (fields, Some(ts.trim())),
        None => (rest, None),
    };

    let mut key_fields = key_part.split(',');
    let measurement = key_fields.next()?.to_string();
    if measurement.is_empty() {
        return None;
    }
    let mut tags = BTreeMap::new();
    for kv in key_fields {
        let (k, v) = kv.split_once('=')?;
        tags.insert(k.to_string(), v.to_string());
    }

    let mut fields = BTreeMap::new();
    for kv in fields_part.split(',') {
        let (k, v) = kv.split_once('=')?;
        fields.insert(k.to_string(), parse_field_value(v)?);
    }
    if fields.is_empty() {
        return None;
    }

    let time = match ts_part {
        Some(ts) if !ts.is_empty() => Utc.timestamp_nanos(ts.parse().ok()?),
        _ => Utc::now(),
    };

    Some(Point { measurement, dbrp, tags, fields, time })
}

fn parse_field_value(raw: &str) -> Option<FieldValue> {
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Some(FieldValue::Str(inner.to_string()));
    }
    match raw {
        "true" | "t" | "T" | "True" | "TRUE" => return Some(FieldValue::Bool(true)),
        "false" | "f" | "F" | "False" | "FALSE" => return Some(FieldValue::Bool(false)),
        _ => {}
    }
    if let Some(digits) = raw.strip_suffix('i') {
        return digits.parse::<i64>().ok().map(FieldValue::Int);
    }
    raw.parse::<f64>().ok().map(FieldValue::Float)
}

/// Split at the first unquoted occurrence of `delim`.
fn split_unquoted(s: &str, delim: char) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (idx, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == delim && !in_quotes => return Some((&s[..idx], &s[idx + ch.len_utf8()..])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_line() {
        let p = parse_line_protocol("cpu,host=a usage=42.5,count=3i 1700000000000000000", None).unwrap();
        assert_eq!(p.measurement, "cpu");
        assert_eq!(p.tags.get("host").map(String::as_str), Some("a"));
        assert_eq!(p.fields.get("usage"), Some(&FieldValue::Float(42.5)));
        assert_eq!(p.fields.get("count"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn parses_line_without_timestamp_or_tags() {
        let p = parse_line_protocol("cpu value=1", None).unwrap();
        assert_eq!(p.measurement, "cpu");
        assert!(p.tags.is_empty());
        assert_eq!(p.fields.get("value"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn rejects_line_with_no_fields() {
        assert!(parse_line_protocol("cpu,host=a", None).is_none());
    }

    #[test]
    fn parses_quoted_string_field() {
        let p = parse_line_protocol(r#"event msg="hello world""#, None).unwrap();
        assert_eq!(p.fields.get("msg"), Some(&FieldValue::Str("hello world".to_string())));
    }
}
