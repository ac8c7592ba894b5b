use tracing::{debug, warn};
use wf_config::{Dbrp, GroupDimensions, HumanDuration, OnPredicateError};

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::CoreResult;
use crate::expr_eval::eval_predicate;
use crate::group::GroupKey;
use crate::message::{Message, Point};
use crate::node::NodeOutputs;

/// The root of a stream task's processing graph (spec.md §4.4 C4 StreamFrom):
/// subscribes to a (database, retention-policy, measurement) scope on the
/// shared firehose, optionally filters, truncates/rounds event time, and
/// establishes the group key every downstream node will key its state on.
pub struct StreamFromSource {
    pub dbrp_filter: Option<Dbrp>,
    pub measurement: String,
    pub predicate: Option<wf_config::Expr>,
    pub on_predicate_error: OnPredicateError,
    pub truncate: Option<HumanDuration>,
    pub round: Option<HumanDuration>,
    pub dimensions: GroupDimensions,
}

impl StreamFromSource {
    /// Drive points from the shared ingest fork until the channel closes
    /// (on task shutdown) or an I/O error is surfaced by the caller.
    pub async fn run(
        self,
        mut input: EdgeReceiver,
        outputs: NodeOutputs,
        dropped_sink: Option<EdgeSender>,
    ) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let Message::Point(_, point) = msg else {
                continue;
            };
            if !self.matches_scope(&point) {
                continue;
            }
            match self.apply_predicate(&point) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "stream_from predicate error");
                    match self.on_predicate_error {
                        OnPredicateError::Drop => continue,
                        OnPredicateError::Fail => {
                            if let Some(sink) = &dropped_sink {
                                let group = GroupKey::singleton();
                                let _ = sink
                                    .send(Message::Point(group, point.clone()))
                                    .await;
                            }
                            continue;
                        }
                    }
                }
            }

            let point = self.normalize_time(point);
            let group = GroupKey::from_point(&point, &self.dimensions);
            debug!(group = %group, "stream_from forwarding point");
            outputs.fan_out(Message::Point(group, point)).await?;
        }
        Ok(())
    }

    fn matches_scope(&self, point: &Point) -> bool {
        if point.measurement != self.measurement {
            return false;
        }
        match (&self.dbrp_filter, &point.dbrp) {
            (None, _) => true,
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
        }
    }

    fn apply_predicate(&self, point: &Point) -> CoreResult<bool> {
        match &self.predicate {
            None => Ok(true),
            Some(expr) => eval_predicate(expr, point),
        }
    }

    fn normalize_time(&self, mut point: Point) -> Point {
        use chrono::{DateTime, Utc};

        if let Some(truncate) = self.truncate {
            let secs = truncate.as_duration().as_secs().max(1) as i64;
            let epoch = point.time.timestamp();
            let truncated = epoch - epoch.rem_euclid(secs);
            point.time = DateTime::<Utc>::from_timestamp(truncated, 0).unwrap_or(point.time);
        }
        if let Some(round) = self.round {
            let secs = round.as_duration().as_secs().max(1) as i64;
            let epoch = point.time.timestamp();
            let remainder = epoch.rem_euclid(secs);
            let rounded = if remainder * 2 >= secs {
                epoch - remainder + secs
            } else {
                epoch - remainder
            };
            point.time = DateTime::<Utc>::from_timestamp(rounded, 0).unwrap_or(point.time);
        }
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use wf_config::DimensionSpec;

    fn source() -> StreamFromSource {
        StreamFromSource {
            dbrp_filter: None,
            measurement: "cpu".to_string(),
            predicate: None,
            on_predicate_error: OnPredicateError::Drop,
            truncate: None,
            round: None,
            dimensions: GroupDimensions {
                by_measurement: true,
                spec: DimensionSpec::Tags(vec!["host".to_string()]),
            },
        }
    }

    #[tokio::test]
    async fn filters_by_measurement_name() {
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let matching = Point::new("cpu", chrono::Utc::now()).with_tag("host", "a");
        let other = Point::new("mem", chrono::Utc::now());

        in_tx
            .send(Message::Point(GroupKey::singleton(), other))
            .await
            .unwrap();
        in_tx
            .send(Message::Point(GroupKey::singleton(), matching))
            .await
            .unwrap();
        drop(in_tx);

        source().run(in_rx, outputs, None).await.unwrap();

        let forwarded = out_rx.recv().await.unwrap();
        assert_eq!(forwarded.as_point().unwrap().measurement, "cpu");
        assert!(out_rx.recv().await.is_none());
    }
}
