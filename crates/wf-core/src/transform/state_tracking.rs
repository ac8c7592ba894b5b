use chrono::{DateTime, Utc};
use wf_config::{Expr, StateTrackingMode};

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::expr_eval::eval_predicate;
use crate::grouped::GroupTable;
use crate::message::{Message, Point};
use crate::node::{NodeOutputs, NodeStats};

#[derive(Default, Clone, Copy)]
struct State {
    since: Option<DateTime<Utc>>,
    count: i64,
}

/// Stamps each point with how long (Duration mode, seconds) or how many
/// consecutive points (Count mode) a predicate has held true for this group
/// (spec.md §4.5 StateTracking). The counter resets to `0`/`-1` the moment
/// the predicate goes false, matching the "state reset on transition"
/// invariant.
pub struct StateTrackingTransform {
    pub mode: StateTrackingMode,
    pub predicate: Expr,
    pub field_name: String,
    pub per_batch: bool,
    state: GroupTable<State>,
    stats: NodeStats,
}

impl StateTrackingTransform {
    pub fn new(mode: StateTrackingMode, predicate: Expr, field_name: String, per_batch: bool) -> Self {
        Self {
            mode,
            predicate,
            field_name,
            per_batch,
            state: GroupTable::new(),
            stats: NodeStats::default(),
        }
    }

    /// Reports this transform's live group count under `stats` as it runs.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub async fn run(mut self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let msg = match msg {
                Message::Point(group, point) => {
                    let s = self.state.get_or_insert_with(group.clone(), State::default);
                    let point = Self::stamp(&self.mode, &self.predicate, &self.field_name, s, point);
                    self.stats.set_cardinality(self.state.len() as u64);
                    Message::Point(group, point)
                }
                Message::Batch(group, points) => {
                    let mut local = if self.per_batch {
                        State::default()
                    } else {
                        *self.state.get_or_insert_with(group.clone(), State::default)
                    };
                    let stamped: Vec<Point> = points
                        .into_iter()
                        .map(|p| {
                            Self::stamp(&self.mode, &self.predicate, &self.field_name, &mut local, p)
                        })
                        .collect();
                    if !self.per_batch {
                        *self.state.get_or_insert_with(group.clone(), State::default) = local;
                    }
                    self.stats.set_cardinality(self.state.len() as u64);
                    Message::Batch(group, stamped)
                }
                Message::DeleteGroup(ref g) => {
                    self.state.delete(g, |_| {});
                    self.stats.set_cardinality(self.state.len() as u64);
                    msg
                }
                other => other,
            };
            outputs.fan_out(msg).await?;
        }
        Ok(())
    }

    fn stamp(
        mode: &StateTrackingMode,
        predicate: &Expr,
        field_name: &str,
        state: &mut State,
        mut point: Point,
    ) -> Point {
        let holds = eval_predicate(predicate, &point).unwrap_or(false);
        if holds {
            if state.since.is_none() {
                state.since = Some(point.time);
                state.count = 0;
            }
            state.count += 1;
        } else {
            state.since = None;
            state.count = 0;
        }

        let value = match mode {
            StateTrackingMode::Count => {
                if holds {
                    state.count as f64
                } else {
                    -1.0
                }
            }
            StateTrackingMode::Duration => match state.since {
                Some(since) => (point.time - since).num_milliseconds() as f64 / 1000.0,
                None => -1.0,
            },
        };
        point.fields.insert(field_name.to_string(), value.into());
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_config::{BinaryOp, FieldValue};

    fn predicate() -> Expr {
        Expr::Binary(
            BinaryOp::Gt,
            Box::new(Expr::field("usage")),
            Box::new(Expr::lit(50.0)),
        )
    }

    #[test]
    fn count_mode_increments_while_true_and_resets_on_false() {
        let mut state = State::default();
        let t0 = chrono::Utc::now();
        let high = Point::new("cpu", t0).with_field("usage", 90.0);
        let out1 = StateTrackingTransform::stamp(
            &StateTrackingMode::Count,
            &predicate(),
            "streak",
            &mut state,
            high.clone(),
        );
        assert_eq!(out1.fields.get("streak"), Some(&FieldValue::Float(1.0)));

        let out2 = StateTrackingTransform::stamp(
            &StateTrackingMode::Count,
            &predicate(),
            "streak",
            &mut state,
            high,
        );
        assert_eq!(out2.fields.get("streak"), Some(&FieldValue::Float(2.0)));

        let low = Point::new("cpu", t0).with_field("usage", 10.0);
        let out3 = StateTrackingTransform::stamp(
            &StateTrackingMode::Count,
            &predicate(),
            "streak",
            &mut state,
            low,
        );
        assert_eq!(out3.fields.get("streak"), Some(&FieldValue::Float(-1.0)));
    }
}
