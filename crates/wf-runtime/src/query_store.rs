use std::sync::Mutex;

use chrono::{DateTime, Utc};
use wf_core::message::Point;
use wf_core::sink::{ExternalScaler, ExternalWriteStore};
use wf_core::source::ExternalStore;
use wf_config::Dbrp;

/// HTTP-backed [`ExternalStore`]/[`ExternalWriteStore`]/[`ExternalScaler`]
/// implementations. The external time-series store and autoscale control
/// plane are named as opaque collaborators (spec.md §1 Non-goals): these
/// types only describe the wire shape a real deployment would speak, they
/// are not wired in by default (see [`InMemoryStore`]/[`NoopScaler`]).
pub struct HttpExternalStore {
    client: reqwest::Client,
    query_url: String,
}

impl HttpExternalStore {
    pub fn new(query_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            query_url: query_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl ExternalStore for HttpExternalStore {
    async fn query(&self, query: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> anyhow::Result<Vec<Point>> {
        let resp = self
            .client
            .get(&self.query_url)
            .query(&[("q", query), ("start", &start.to_rfc3339()), ("end", &end.to_rfc3339())])
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Vec<Point>>().await?)
    }
}

pub struct HttpExternalWriteStore {
    client: reqwest::Client,
    write_url: String,
}

impl HttpExternalWriteStore {
    pub fn new(write_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            write_url: write_url.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct WritePayload<'a> {
    dbrp: &'a Dbrp,
    measurement: &'a str,
    points: &'a [Point],
}

#[async_trait::async_trait]
impl ExternalWriteStore for HttpExternalWriteStore {
    async fn write(&self, dbrp: &Dbrp, measurement: &str, points: &[Point]) -> anyhow::Result<()> {
        self.client
            .post(&self.write_url)
            .json(&WritePayload { dbrp, measurement, points })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct HttpExternalScaler {
    client: reqwest::Client,
    scale_url: String,
}

impl HttpExternalScaler {
    pub fn new(scale_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            scale_url: scale_url.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct ScalePayload<'a> {
    resource: &'a str,
    replicas: i64,
}

#[async_trait::async_trait]
impl ExternalScaler for HttpExternalScaler {
    async fn resize(&self, resource: &str, replicas: i64) -> anyhow::Result<()> {
        self.client
            .post(&self.scale_url)
            .json(&ScalePayload { resource, replicas })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// In-process, in-memory store used as the default collaborator when no
/// external store is configured. Backs `BatchQuery`/`InfluxOut` in tests and
/// single-node deployments.
#[derive(Default)]
pub struct InMemoryStore {
    points: Mutex<Vec<Point>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, points: Vec<Point>) {
        self.points.lock().expect("store lock poisoned").extend(points);
    }
}

#[async_trait::async_trait]
impl ExternalStore for InMemoryStore {
    async fn query(&self, _query: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> anyhow::Result<Vec<Point>> {
        Ok(self
            .points
            .lock()
            .expect("store lock poisoned")
            .iter()
            .filter(|p| p.time >= start && p.time < end)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ExternalWriteStore for InMemoryStore {
    async fn write(&self, _dbrp: &Dbrp, measurement: &str, points: &[Point]) -> anyhow::Result<()> {
        let mut guard = self.points.lock().expect("store lock poisoned");
        for p in points {
            let mut p = p.clone();
            p.measurement = measurement.to_string();
            guard.push(p);
        }
        Ok(())
    }
}

/// No-op [`ExternalScaler`] used when no autoscale control plane is wired
/// in; logs the resize it would have performed.
#[derive(Default)]
pub struct NoopScaler;

#[async_trait::async_trait]
impl ExternalScaler for NoopScaler {
    async fn resize(&self, resource: &str, replicas: i64) -> anyhow::Result<()> {
        wf_info!(res, resource, replicas, "autoscale resize (no scaler configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryStore::new();
        let dbrp = Dbrp { database: "db".into(), retention_policy: "rp".into() };
        let now = Utc::now();
        store.write(&dbrp, "cpu", &[Point::new("cpu", now)]).await.unwrap();
        let got = store.query("select *", now - chrono::Duration::seconds(1), now + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(got.len(), 1);
    }
}
