use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;
use wf_config::{Dbrp, FieldValue, HumanDuration};

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::message::{Message, Point};

/// The write side of the opaque external time-series store named in
/// spec.md §1 (the same collaborator BatchQuery reads from via
/// [`crate::source::ExternalStore`]).
#[async_trait]
pub trait ExternalWriteStore: Send + Sync {
    async fn write(&self, dbrp: &Dbrp, measurement: &str, points: &[Point]) -> anyhow::Result<()>;
}

/// Re-injects points back into this task master's own firehose, the
/// distinguishing trait of Loopback versus InfluxOut (spec.md §4.8
/// Loopback: "feeds back into the engine for further processing").
#[async_trait]
pub trait FirehoseReinject: Send + Sync {
    async fn reinject(&self, measurement: &str, points: Vec<Point>) -> anyhow::Result<()>;
}

struct Batcher {
    batch_size: usize,
    flush_interval: HumanDuration,
    max_concurrency: usize,
}

impl Batcher {
    /// Drives `input` to completion, calling `flush` with batches bounded by
    /// `batch_size` and `flush_interval`, running up to `max_concurrency`
    /// flushes concurrently (spec.md §4.8: shared batching behavior across
    /// InfluxOut and Loopback).
    async fn run<F, Fut>(self, mut input: EdgeReceiver, flush: F) -> CoreResult<()>
    where
        F: Fn(Vec<Point>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let flush = Arc::new(flush);
        let permits = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let mut pending: Vec<Point> = Vec::new();
        let mut ticker = tokio::time::interval(self.flush_interval.as_duration().max(std::time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_msg = input.recv() => {
                    match maybe_msg {
                        Some(Message::Point(_, point)) => pending.push(point),
                        Some(Message::Batch(_, points)) => pending.extend(points),
                        Some(Message::Barrier(..)) | Some(Message::DeleteGroup(..)) => {}
                        None => {
                            if !pending.is_empty() {
                                spawn_flush(flush.clone(), permits.clone(), std::mem::take(&mut pending)).await;
                            }
                            return Ok(());
                        }
                    }
                    if pending.len() >= self.batch_size {
                        spawn_flush(flush.clone(), permits.clone(), std::mem::take(&mut pending)).await;
                    }
                }
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        spawn_flush(flush.clone(), permits.clone(), std::mem::take(&mut pending)).await;
                    }
                }
            }
        }
    }
}

async fn spawn_flush<F, Fut>(flush: Arc<F>, permits: Arc<Semaphore>, batch: Vec<Point>)
where
    F: Fn(Vec<Point>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let permit = permits.acquire_owned().await.expect("semaphore never closed");
    tokio::spawn(async move {
        let _permit = permit;
        if let Err(e) = flush(batch).await {
            warn!(error = %e, "sink flush failed");
        }
    });
}

/// Writes batches to the external time-series store (spec.md §4.8 C8
/// InfluxOut).
pub struct InfluxOutSink {
    pub dbrp: Dbrp,
    pub measurement: String,
    pub batch_size: usize,
    pub flush_interval: HumanDuration,
    pub max_concurrency: usize,
    pub field_overlay: Vec<(String, FieldValue)>,
    pub tag_overlay: Vec<(String, String)>,
    pub store: Arc<dyn ExternalWriteStore>,
}

impl InfluxOutSink {
    pub async fn run(self, input: EdgeReceiver) -> CoreResult<()> {
        let dbrp = self.dbrp.clone();
        let measurement = self.measurement.clone();
        let field_overlay = self.field_overlay.clone();
        let tag_overlay = self.tag_overlay.clone();
        let store = self.store.clone();

        let batcher = Batcher {
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            max_concurrency: self.max_concurrency,
        };
        batcher
            .run(input, move |mut points| {
                let dbrp = dbrp.clone();
                let measurement = measurement.clone();
                let field_overlay = field_overlay.clone();
                let tag_overlay = tag_overlay.clone();
                let store = store.clone();
                async move {
                    for p in &mut points {
                        for (k, v) in &field_overlay {
                            p.fields.insert(k.clone(), v.clone());
                        }
                        for (k, v) in &tag_overlay {
                            p.tags.insert(k.clone(), v.clone());
                        }
                    }
                    store.write(&dbrp, &measurement, &points).await
                }
            })
            .await
    }
}

/// Re-injects batches into the same task master's firehose for further
/// processing by other tasks (spec.md §4.8 C8 Loopback).
pub struct LoopbackSink {
    pub measurement: String,
    pub batch_size: usize,
    pub flush_interval: HumanDuration,
    pub max_concurrency: usize,
    pub firehose: Arc<dyn FirehoseReinject>,
}

impl LoopbackSink {
    pub async fn run(self, input: EdgeReceiver) -> CoreResult<()> {
        let measurement = self.measurement.clone();
        let firehose = self.firehose.clone();
        let batcher = Batcher {
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            max_concurrency: self.max_concurrency,
        };
        batcher
            .run(input, move |points| {
                let measurement = measurement.clone();
                let firehose = firehose.clone();
                async move { firehose.reinject(&measurement, points).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::group::GroupKey;
    use std::sync::Mutex;

    struct RecordingStore {
        writes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ExternalWriteStore for RecordingStore {
        async fn write(&self, _dbrp: &Dbrp, _measurement: &str, points: &[Point]) -> anyhow::Result<()> {
            self.writes.lock().unwrap().push(points.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let (tx, rx) = edge(16, OverflowPolicy::Block);
        let store = Arc::new(RecordingStore { writes: Mutex::new(vec![]) });

        let sink = InfluxOutSink {
            dbrp: Dbrp { database: "db".to_string(), retention_policy: "autogen".to_string() },
            measurement: "cpu".to_string(),
            batch_size: 2,
            flush_interval: "60s".parse().unwrap(),
            max_concurrency: 1,
            field_overlay: vec![],
            tag_overlay: vec![],
            store: store.clone(),
        };

        for _ in 0..2 {
            tx.send(Message::Point(GroupKey::singleton(), Point::new("cpu", chrono::Utc::now())))
                .await
                .unwrap();
        }
        drop(tx);

        sink.run(rx).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(store.writes.lock().unwrap().as_slice(), &[2]);
    }
}
