use wf_config::FieldValue;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::message::Message;
use crate::node::NodeOutputs;

/// Fills in a field or tag only if it is absent (spec.md §4.5 Default).
pub struct DefaultTransform {
    pub fields: Vec<(String, FieldValue)>,
    pub tags: Vec<(String, String)>,
}

impl DefaultTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let msg = match msg {
                Message::Point(group, mut point) => {
                    for (k, v) in &self.fields {
                        point.fields.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    for (k, v) in &self.tags {
                        point.tags.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    Message::Point(group, point)
                }
                other => other,
            };
            outputs.fan_out(msg).await?;
        }
        Ok(())
    }
}

/// Removes named fields or tags unconditionally (spec.md §4.5 Delete).
pub struct DeleteTransform {
    pub fields: Vec<String>,
    pub tags: Vec<String>,
}

impl DeleteTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let msg = match msg {
                Message::Point(group, mut point) => {
                    for k in &self.fields {
                        point.fields.remove(k);
                    }
                    for k in &self.tags {
                        point.tags.remove(k);
                    }
                    Message::Point(group, point)
                }
                other => other,
            };
            outputs.fan_out(msg).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::group::GroupKey;
    use crate::message::Point;

    #[tokio::test]
    async fn default_only_fills_missing_fields() {
        let (in_tx, in_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let d = DefaultTransform {
            fields: vec![("region".to_string(), FieldValue::Str("us".to_string()))],
            tags: vec![],
        };
        let point = Point::new("cpu", chrono::Utc::now());
        in_tx.send(Message::Point(GroupKey::singleton(), point)).await.unwrap();
        drop(in_tx);

        d.run(in_rx, outputs).await.unwrap();
        let forwarded = out_rx.recv().await.unwrap();
        assert_eq!(
            forwarded.as_point().unwrap().fields.get("region"),
            Some(&FieldValue::Str("us".to_string()))
        );
    }

    #[tokio::test]
    async fn delete_removes_named_field() {
        let (in_tx, in_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let d = DeleteTransform {
            fields: vec!["secret".to_string()],
            tags: vec![],
        };
        let point = Point::new("cpu", chrono::Utc::now()).with_field("secret", 1.0);
        in_tx.send(Message::Point(GroupKey::singleton(), point)).await.unwrap();
        drop(in_tx);

        d.run(in_rx, outputs).await.unwrap();
        let forwarded = out_rx.recv().await.unwrap();
        assert!(!forwarded.as_point().unwrap().fields.contains_key("secret"));
    }
}
