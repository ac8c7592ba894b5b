use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wf_config::{GroupDimensions, HumanDuration};

use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::message::{Message, Point};
use crate::node::NodeOutputs;

/// The opaque external time-series store BatchQuery polls and InfluxOut
/// writes to (spec.md §1: named but explicitly out of scope to implement).
/// Production wiring uses an HTTP client against that store; tests use an
/// in-memory double.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    async fn query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Point>>;
}

/// A source node that polls an external store on a fixed schedule instead of
/// consuming from the live firehose (spec.md §3 Task, §4.4 C4 BatchQuery).
pub struct BatchQuerySource {
    pub query: String,
    pub period: HumanDuration,
    pub every: HumanDuration,
    pub offset: HumanDuration,
    pub align: bool,
    pub dimensions: GroupDimensions,
    pub store: std::sync::Arc<dyn ExternalStore>,
}

impl BatchQuerySource {
    pub async fn run(
        self,
        outputs: NodeOutputs,
        cancel: CancellationToken,
    ) -> CoreResult<()> {
        let every = self.every.as_duration();
        let mut ticker = tokio::time::interval(every.max(std::time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(&outputs).await {
                        warn!(error = %e, "batch_query poll failed");
                    }
                }
            }
        }
    }

    async fn poll_once(&self, outputs: &NodeOutputs) -> anyhow::Result<()> {
        let now = Utc::now() - chrono::Duration::from_std(self.offset.as_duration())?;
        let end = if self.align {
            align_to(now, self.every.as_duration())
        } else {
            now
        };
        let start = end - chrono::Duration::from_std(self.period.as_duration())?;

        let points = self.store.query(&self.query, start, end).await?;
        debug!(count = points.len(), "batch_query fetched points");
        if points.is_empty() {
            return Ok(());
        }

        let group = GroupKey::from_point(&points[0], &self.dimensions);
        outputs
            .fan_out(Message::Batch(group, points))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(())
    }
}

fn align_to(t: DateTime<Utc>, period: std::time::Duration) -> DateTime<Utc> {
    let secs = period.as_secs().max(1) as i64;
    let epoch = t.timestamp();
    let aligned = epoch - epoch.rem_euclid(secs);
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use std::sync::Arc;
    use wf_config::DimensionSpec;

    struct FixedStore(Vec<Point>);

    #[async_trait]
    impl ExternalStore for FixedStore {
        async fn query(
            &self,
            _query: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Point>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn poll_once_forwards_a_batch() {
        let (tx, mut rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![tx]);
        let source = BatchQuerySource {
            query: "select *".to_string(),
            period: "1m".parse().unwrap(),
            every: "1m".parse().unwrap(),
            offset: "0s".parse().unwrap(),
            align: false,
            dimensions: GroupDimensions {
                by_measurement: true,
                spec: DimensionSpec::Tags(vec![]),
            },
            store: Arc::new(FixedStore(vec![Point::new("cpu", Utc::now())])),
        };

        source.poll_once(&outputs).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, Message::Batch(_, _)));
    }
}
