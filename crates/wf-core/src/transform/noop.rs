use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::node::NodeOutputs;

/// Forwards every message unchanged (spec.md §4.5 NoOp) — a placeholder
/// join point in graphs authored with an optional stage left out.
pub struct NoOpTransform;

impl NoOpTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            outputs.fan_out(msg).await?;
        }
        Ok(())
    }
}
