use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use wf_config::{AlertLevel, AlertLevelRule, DetailsAs, HumanDuration};

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::expr_eval::eval_predicate;
use crate::grouped::GroupTable;
use crate::message::{Message, Point};
use crate::node::NodeStats;

/// One alert event, as delivered to subscribers of a topic (spec.md §4.8
/// C8 Alert).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub task_id: String,
    pub topic: String,
    pub group: String,
    pub level: AlertLevel,
    pub previous_level: AlertLevel,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// Tracks the current level of every topic in a task master, for Alert's
/// `inhibitors` feature (spec.md §4.8: "suppressed while an inhibiting
/// topic is non-OK") and fans out records to subscribers (e.g. HTTPOut or
/// an external notifier wired up by the runtime).
#[derive(Clone, Default)]
pub struct AlertTopicBus {
    levels: Arc<Mutex<HashMap<String, AlertLevel>>>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<AlertRecord>>>>,
}

impl AlertTopicBus {
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<AlertRecord> {
        let mut channels = self.channels.lock().expect("alert bus lock poisoned");
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    fn publish(&self, topic: &str, level: AlertLevel, record: AlertRecord) {
        self.levels
            .lock()
            .expect("alert bus lock poisoned")
            .insert(topic.to_string(), level);
        let channels = self.channels.lock().expect("alert bus lock poisoned");
        if let Some(sender) = channels.get(topic) {
            let _ = sender.send(record);
        }
    }

    fn level_of(&self, topic: &str) -> AlertLevel {
        self.levels
            .lock()
            .expect("alert bus lock poisoned")
            .get(topic)
            .copied()
            .unwrap_or(AlertLevel::Ok)
    }

    fn any_inhibiting(&self, inhibitors: &[String]) -> bool {
        inhibitors.iter().any(|t| self.level_of(t) != AlertLevel::Ok)
    }
}

#[derive(Clone, Copy)]
struct AlertState {
    level: AlertLevel,
    last_emit: Option<DateTime<Utc>>,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            level: AlertLevel::Ok,
            last_emit: None,
        }
    }
}

/// Evaluates a point against an ordered set of level rules and fires an
/// alert when the resulting level changes, or periodically while it stays
/// non-OK (spec.md §4.8 C8 Alert).
pub struct AlertSink {
    pub task_id: String,
    pub levels: Vec<AlertLevelRule>,
    pub topic: String,
    pub state_changes_only: bool,
    pub reemit_interval: Option<HumanDuration>,
    pub details_as: DetailsAs,
    pub inhibitors: Vec<String>,
    pub bus: AlertTopicBus,
    state: GroupTable<AlertState>,
    stats: NodeStats,
}

impl AlertSink {
    pub fn new(
        task_id: String,
        levels: Vec<AlertLevelRule>,
        topic: String,
        state_changes_only: bool,
        reemit_interval: Option<HumanDuration>,
        details_as: DetailsAs,
        inhibitors: Vec<String>,
        bus: AlertTopicBus,
    ) -> Self {
        Self {
            task_id,
            levels,
            topic,
            state_changes_only,
            reemit_interval,
            details_as,
            inhibitors,
            bus,
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
            if let Message::DeleteGroup(group) = msg {
                self.state.delete(&group, |_| {});
                self.stats.set_cardinality(self.state.len() as u64);
                continue;
            }
            let Message::Point(group, point) = msg else { continue };
            if self.bus.any_inhibiting(&self.inhibitors) {
                continue;
            }

            let current_level = self.state.get_or_insert_with(group.clone(), AlertState::default).level;
            self.stats.set_cardinality(self.state.len() as u64);
            let level = self.resolve_level(&point, current_level);
            let state = self.state.get_or_insert_with(group.clone(), AlertState::default);
            let changed = state.level != level;
            let due_for_reemit = !self.state_changes_only
                && !changed
                && level != AlertLevel::Ok
                && self
                    .reemit_interval
                    .map(|iv| match state.last_emit {
                        Some(last) => {
                            Utc::now() - last >= chrono::Duration::from_std(iv.as_duration()).unwrap_or_default()
                        }
                        None => true,
                    })
                    .unwrap_or(false);

            let previous = state.level;
            state.level = level;
            if changed || due_for_reemit {
                state.last_emit = Some(Utc::now());
                let message = self.render_message(&point, level);
                self.bus.publish(
                    &self.topic,
                    level,
                    AlertRecord {
                        task_id: self.task_id.clone(),
                        topic: self.topic.clone(),
                        group: group.to_string(),
                        level,
                        previous_level: previous,
                        message,
                        time: point.time,
                    },
                );
            }
        }
        Ok(())
    }

    /// Resolves the level a point maps to, applying hysteresis (spec.md
    /// §4.8): a drop from `current` to a lower level only takes effect once
    /// `current`'s own `reset` predicate is satisfied (or it has none).
    fn resolve_level(&self, point: &Point, current: AlertLevel) -> AlertLevel {
        let candidate = self
            .levels
            .iter()
            .filter(|rule| eval_predicate(&rule.predicate, point).unwrap_or(false))
            .map(|rule| rule.level)
            .max()
            .unwrap_or(AlertLevel::Ok);

        if candidate >= current {
            return candidate;
        }

        let reset_satisfied = self
            .levels
            .iter()
            .find(|rule| rule.level == current)
            .and_then(|rule| rule.reset.as_ref())
            .map(|reset| eval_predicate(reset, point).unwrap_or(false))
            .unwrap_or(true);

        if reset_satisfied { candidate } else { current }
    }

    fn render_message(&self, point: &Point, level: AlertLevel) -> String {
        let summary = format!("{:?} alert on {}", level, point.measurement);
        match self.details_as {
            DetailsAs::None => summary,
            DetailsAs::Tag | DetailsAs::Field => {
                format!("{summary} ({} fields)", point.fields.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::group::GroupKey;
    use wf_config::{BinaryOp, Expr};

    fn rule(level: AlertLevel, threshold: f64) -> AlertLevelRule {
        AlertLevelRule {
            level,
            predicate: Expr::Binary(
                BinaryOp::Gt,
                Box::new(Expr::field("usage")),
                Box::new(Expr::lit(threshold)),
            ),
            reset: None,
        }
    }

    #[tokio::test]
    async fn fires_only_on_level_change() {
        let (tx, rx) = edge(8, OverflowPolicy::Block);
        let bus = AlertTopicBus::default();
        let mut sub = bus.subscribe("cpu-alerts");

        let sink = AlertSink::new(
            "task1".to_string(),
            vec![rule(AlertLevel::Warning, 70.0), rule(AlertLevel::Critical, 90.0)],
            "cpu-alerts".to_string(),
            true,
            None,
            DetailsAs::None,
            vec![],
            bus,
        );

        for usage in [50.0, 80.0, 85.0, 95.0] {
            let p = Point::new("cpu", Utc::now()).with_field("usage", usage);
            tx.send(Message::Point(GroupKey::singleton(), p)).await.unwrap();
        }
        drop(tx);

        sink.run(rx).await.unwrap();

        let first = sub.try_recv().unwrap();
        assert_eq!(first.level, AlertLevel::Warning);
        let second = sub.try_recv().unwrap();
        assert_eq!(second.level, AlertLevel::Critical);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_predicate_holds_level_until_satisfied() {
        let (tx, rx) = edge(8, OverflowPolicy::Block);
        let bus = AlertTopicBus::default();
        let mut sub = bus.subscribe("cpu-alerts");

        let mut warning = rule(AlertLevel::Warning, 70.0);
        warning.reset = Some(Expr::Binary(
            BinaryOp::Lt,
            Box::new(Expr::field("usage")),
            Box::new(Expr::lit(50.0)),
        ));

        let sink = AlertSink::new(
            "task1".to_string(),
            vec![warning],
            "cpu-alerts".to_string(),
            true,
            None,
            DetailsAs::None,
            vec![],
            bus,
        );

        // 80 (warning), 60 (below threshold but reset not satisfied yet),
        // 40 (reset predicate now true, drop to ok allowed).
        for usage in [80.0, 60.0, 40.0] {
            let p = Point::new("cpu", Utc::now()).with_field("usage", usage);
            tx.send(Message::Point(GroupKey::singleton(), p)).await.unwrap();
        }
        drop(tx);

        sink.run(rx).await.unwrap();

        let first = sub.try_recv().unwrap();
        assert_eq!(first.level, AlertLevel::Warning);
        let second = sub.try_recv().unwrap();
        assert_eq!(second.level, AlertLevel::Ok);
        assert!(sub.try_recv().is_err());
    }
}
