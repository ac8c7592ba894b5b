use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use wf_config::{Expr, HumanDuration};

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::expr_eval::eval_expr;
use crate::grouped::GroupTable;
use crate::message::Message;
use crate::node::NodeStats;

/// The opaque external autoscaler collaborator (spec.md §1, §4.8 Autoscale)
/// — e.g. a Kubernetes HPA-like API or a cloud provider's scaling group.
#[async_trait]
pub trait ExternalScaler: Send + Sync {
    async fn resize(&self, resource: &str, replicas: i64) -> anyhow::Result<()>;
}

#[derive(Default)]
struct CooldownState {
    last_increase: Option<DateTime<Utc>>,
    last_decrease: Option<DateTime<Utc>>,
    current: Option<i64>,
}

/// Computes a desired replica count from an expression and resizes a
/// resource through the external scaler, respecting independent cooldowns
/// for increases and decreases (spec.md §4.8 C8 Autoscale).
pub struct AutoscaleSink {
    pub resource_tag: Option<String>,
    pub static_name: Option<String>,
    pub expr: Expr,
    pub min: i64,
    pub max: i64,
    pub increase_cooldown: HumanDuration,
    pub decrease_cooldown: HumanDuration,
    pub scaler: std::sync::Arc<dyn ExternalScaler>,
    state: GroupTable<CooldownState>,
    stats: NodeStats,
}

impl AutoscaleSink {
    pub fn new(
        resource_tag: Option<String>,
        static_name: Option<String>,
        expr: Expr,
        min: i64,
        max: i64,
        increase_cooldown: HumanDuration,
        decrease_cooldown: HumanDuration,
        scaler: std::sync::Arc<dyn ExternalScaler>,
    ) -> Self {
        Self {
            resource_tag,
            static_name,
            expr,
            min,
            max,
            increase_cooldown,
            decrease_cooldown,
            scaler,
            state: GroupTable::new(),
            stats: NodeStats::default(),
        }
    }

    /// Reports this sink's live group count under `stats` as it runs.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub async fn run(mut self, mut input: EdgeReceiver) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let Message::Point(group, point) = msg else {
                if let Message::DeleteGroup(ref g) = msg {
                    self.state.delete(g, |_| {});
                    self.stats.set_cardinality(self.state.len() as u64);
                }
                continue;
            };

            let Some(resource) = self.resource_name(&point) else {
                warn!("autoscale: no resource name resolvable for point");
                continue;
            };

            let desired = match eval_expr(&self.expr, &point) {
                Ok(v) => v.as_f64().unwrap_or(0.0).round() as i64,
                Err(e) => {
                    warn!(error = %e, "autoscale expression failed");
                    continue;
                }
            };
            let desired = desired.clamp(self.min, self.max);

            let is_new_group = self.state.get_mut(&group).is_none();
            let prior_len = self.state.len() as u64;
            self.stats.set_cardinality(if is_new_group { prior_len + 1 } else { prior_len });
            let state = self.state.get_or_insert_with(group.clone(), CooldownState::default);
            let now = point.time;
            let Some(current) = state.current else {
                state.current = Some(desired);
                if let Err(e) = self.scaler.resize(&resource, desired).await {
                    warn!(error = %e, "autoscale resize failed");
                }
                continue;
            };

            if desired > current {
                let ready = state
                    .last_increase
                    .map(|t| now - t >= chrono::Duration::from_std(self.increase_cooldown.as_duration()).unwrap_or_default())
                    .unwrap_or(true);
                if !ready {
                    continue;
                }
                state.last_increase = Some(now);
            } else if desired < current {
                let ready = state
                    .last_decrease
                    .map(|t| now - t >= chrono::Duration::from_std(self.decrease_cooldown.as_duration()).unwrap_or_default())
                    .unwrap_or(true);
                if !ready {
                    continue;
                }
                state.last_decrease = Some(now);
            } else {
                continue;
            }

            state.current = Some(desired);
            if let Err(e) = self.scaler.resize(&resource, desired).await {
                warn!(error = %e, "autoscale resize failed");
            }
        }
        Ok(())
    }

    fn resource_name(&self, point: &crate::message::Point) -> Option<String> {
        if let Some(name) = &self.static_name {
            return Some(name.clone());
        }
        self.resource_tag.as_ref().and_then(|tag| point.tags.get(tag).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::group::GroupKey;
    use crate::message::Point;
    use std::sync::Mutex;

    struct RecordingScaler(Mutex<Vec<(String, i64)>>);

    #[async_trait]
    impl ExternalScaler for RecordingScaler {
        async fn resize(&self, resource: &str, replicas: i64) -> anyhow::Result<()> {
            self.0.lock().unwrap().push((resource.to_string(), replicas));
            Ok(())
        }
    }

    #[tokio::test]
    async fn clamps_to_min_max_and_resizes() {
        let (tx, rx) = edge(4, OverflowPolicy::Block);
        let scaler = std::sync::Arc::new(RecordingScaler(Mutex::new(vec![])));
        let sink = AutoscaleSink::new(
            None,
            Some("worker-pool".to_string()),
            Expr::field("desired"),
            1,
            5,
            "0s".parse().unwrap(),
            "0s".parse().unwrap(),
            scaler.clone(),
        );

        let p = Point::new("load", chrono::Utc::now()).with_field("desired", 99.0);
        tx.send(Message::Point(GroupKey::singleton(), p)).await.unwrap();
        drop(tx);

        sink.run(rx).await.unwrap();
        assert_eq!(scaler.0.lock().unwrap().as_slice(), &[("worker-pool".to_string(), 5)]);
    }
}
