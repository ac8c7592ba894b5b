use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::message::{Batch, Message, Point};

/// The last result HttpOut has seen per group, flattened for clients that
/// don't care about grouping (spec.md §4.8 HttpOut: "serves the most recent
/// result"). `points` spans every group currently cached; a `DeleteGroup`
/// drops that group's slice out of it.
#[derive(Debug, Clone, Default)]
pub struct CachedResponse {
    pub points: Vec<Point>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct CacheInner {
    groups: BTreeMap<GroupKey, Vec<Point>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Shared handle the ingest HTTP server reads from when a client requests
/// `GET /<task-id>/<endpoint>` (spec.md §4.8 C8 HttpOut). Keyed by group so
/// a multi-group task doesn't have one group's writes clobber another's.
#[derive(Clone, Default)]
pub struct HttpOutCache(Arc<RwLock<CacheInner>>);

impl HttpOutCache {
    pub async fn snapshot(&self) -> CachedResponse {
        let guard = self.0.read().await;
        CachedResponse {
            points: guard.groups.values().flatten().cloned().collect(),
            updated_at: guard.updated_at,
        }
    }

    async fn set(&self, group: GroupKey, points: Batch) {
        let mut guard = self.0.write().await;
        guard.groups.insert(group, points);
        guard.updated_at = Some(Utc::now());
    }

    async fn delete(&self, group: &GroupKey) {
        let mut guard = self.0.write().await;
        guard.groups.remove(group);
        guard.updated_at = Some(Utc::now());
    }
}

/// Terminal node that makes the latest result available for polling rather
/// than pushing it anywhere (spec.md §4.8 HttpOut).
pub struct HttpOutSink {
    pub cache: HttpOutCache,
}

impl HttpOutSink {
    pub async fn run(self, mut input: EdgeReceiver) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            match msg {
                Message::Point(group, point) => self.cache.set(group, vec![point]).await,
                Message::Batch(group, points) => self.cache.set(group, points).await,
                Message::DeleteGroup(group) => self.cache.delete(&group).await,
                Message::Barrier(..) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::group::GroupKey;
    use wf_config::{DimensionSpec, GroupDimensions};

    fn host_group(host: &str) -> GroupKey {
        let dims = GroupDimensions {
            by_measurement: false,
            spec: DimensionSpec::Tags(vec!["host".to_string()]),
        };
        GroupKey::from_point(&Point::new("cpu", Utc::now()).with_tag("host", host), &dims)
    }

    #[tokio::test]
    async fn cache_reflects_latest_point() {
        let (tx, rx) = edge(4, OverflowPolicy::Block);
        let cache = HttpOutCache::default();
        let sink = HttpOutSink { cache: cache.clone() };

        tx.send(Message::Point(GroupKey::singleton(), Point::new("cpu", Utc::now())))
            .await
            .unwrap();
        drop(tx);

        sink.run(rx).await.unwrap();
        let snap = cache.snapshot().await;
        assert_eq!(snap.points.len(), 1);
        assert!(snap.updated_at.is_some());
    }

    #[tokio::test]
    async fn distinct_groups_accumulate_instead_of_clobbering() {
        let (tx, rx) = edge(4, OverflowPolicy::Block);
        let cache = HttpOutCache::default();
        let sink = HttpOutSink { cache: cache.clone() };

        let host_a = host_group("a");
        let host_b = host_group("b");
        tx.send(Message::Point(host_a.clone(), Point::new("cpu", Utc::now())))
            .await
            .unwrap();
        tx.send(Message::Point(host_b.clone(), Point::new("cpu", Utc::now())))
            .await
            .unwrap();
        drop(tx);

        sink.run(rx).await.unwrap();
        let snap = cache.snapshot().await;
        assert_eq!(snap.points.len(), 2, "both groups should be present, not just the last write");
    }

    #[tokio::test]
    async fn delete_group_removes_only_that_groups_points() {
        let (tx, rx) = edge(4, OverflowPolicy::Block);
        let cache = HttpOutCache::default();
        let sink = HttpOutSink { cache: cache.clone() };

        let host_a = host_group("a");
        let host_b = host_group("b");
        tx.send(Message::Point(host_a.clone(), Point::new("cpu", Utc::now())))
            .await
            .unwrap();
        tx.send(Message::Point(host_b.clone(), Point::new("cpu", Utc::now())))
            .await
            .unwrap();
        tx.send(Message::DeleteGroup(host_a)).await.unwrap();
        drop(tx);

        sink.run(rx).await.unwrap();
        let snap = cache.snapshot().await;
        assert_eq!(snap.points.len(), 1);
    }
}
