//! End-to-end: ingest a point over HTTP, run it through a small compiled
//! task DAG, and read the result back off an `HttpOut` endpoint.

use std::time::Duration;

use wf_config::{
    BinaryOp, Dbrp, DimensionSpec, EdgeDef, EngineConfig, Expr, GroupDimensions, IngestConfig,
    MetricsConfig, NodeDef, NodeKind, OnPredicateError, ProcessConfig, SnapshotBackend,
    SnapshotConfig, TaskDef, TaskKind,
};
use wf_runtime::lifecycle::TaskMaster;

fn task_def() -> TaskDef {
    TaskDef {
        id: "t1".to_string(),
        kind: TaskKind::Stream,
        dbrps: vec![Dbrp { database: "telegraf".to_string(), retention_policy: "autogen".to_string() }],
        nodes: vec![
            NodeDef {
                id: "in".to_string(),
                kind: NodeKind::StreamFrom {
                    database: Some("telegraf".to_string()),
                    retention_policy: Some("autogen".to_string()),
                    measurement: "cpu".to_string(),
                    predicate: None,
                    on_predicate_error: OnPredicateError::Drop,
                    truncate: None,
                    round: None,
                    dimensions: GroupDimensions { by_measurement: true, spec: DimensionSpec::Tags(vec!["host".to_string()]) },
                },
            },
            NodeDef {
                id: "hot".to_string(),
                kind: NodeKind::Where {
                    predicate: Expr::Binary(BinaryOp::Gt, Box::new(Expr::field("usage")), Box::new(Expr::lit(90.0))),
                    on_predicate_error: OnPredicateError::Drop,
                },
            },
            NodeDef { id: "out".to_string(), kind: NodeKind::HttpOut { endpoint: "hot".to_string() } },
        ],
        edges: vec![
            EdgeDef { from: "in".to_string(), to: "hot".to_string() },
            EdgeDef { from: "hot".to_string(), to: "out".to_string() },
        ],
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        process: ProcessConfig { data_dir: std::env::temp_dir(), pid_file: None },
        ingest: IngestConfig { http_listen: "127.0.0.1:0".to_string(), udp_listen: None, task_fork_capacity: 64 },
        logging: Default::default(),
        metrics: MetricsConfig { enabled: false, ..Default::default() },
        snapshot: SnapshotConfig { backend: SnapshotBackend::Memory, ..Default::default() },
    }
}

#[tokio::test]
async fn point_above_threshold_reaches_http_out() {
    let master = TaskMaster::start(engine_config(), vec![task_def()]).await.expect("bootstrap failed");
    let addr = master.listen_addr();

    // give the fork registration a moment relative to the StreamFrom task
    // spinning up before the first write lands.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let body = "cpu,host=a usage=99.0\ncpu,host=b usage=10.0\n";
    let resp = client
        .post(format!("http://{addr}/write?db=telegraf&rp=autogen"))
        .body(body)
        .send()
        .await
        .expect("write request failed");
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    // let the point cascade through the DAG.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resp = client
        .get(format!("http://{addr}/t1/hot"))
        .send()
        .await
        .expect("http_out request failed");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let payload: serde_json::Value = resp.json().await.expect("response was not json");
    let series = payload["series"].as_array().expect("series array");
    assert_eq!(series.len(), 1, "only the host=a point should have passed the where filter");
    assert_eq!(series[0]["name"], "cpu");
    assert_eq!(series[0]["tags"]["host"], "a");

    master.shutdown();
    master.wait().await.expect("shutdown failed");
}

#[tokio::test]
async fn unknown_http_out_endpoint_returns_404() {
    let master = TaskMaster::start(engine_config(), vec![task_def()]).await.expect("bootstrap failed");
    let addr = master.listen_addr();

    let client = reqwest::Client::new();
    let resp = client.get(format!("http://{addr}/t1/missing")).send().await.expect("request failed");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    master.shutdown();
    master.wait().await.expect("shutdown failed");
}
