pub mod edge;
pub mod error;
pub mod expr_eval;
pub mod group;
pub mod grouped;
pub mod join;
pub mod message;
pub mod node;
pub mod sink;
pub mod source;
pub mod transform;
pub mod udf;
pub mod window;

pub use edge::{EdgeAbortHandle, EdgeReceiver, EdgeSender, EdgeStats, OverflowPolicy, edge};
pub use error::{CoreError, CoreReason, CoreResult};
pub use expr_eval::{eval_expr, eval_predicate};
pub use group::GroupKey;
pub use grouped::GroupTable;
pub use join::{JoinTransform, UnionTransform};
pub use message::{Barrier, Batch, Message, Point};
pub use node::{NodeContext, NodeOutputs, NodeStats};
pub use sink::{
    AlertRecord, AlertSink, AlertTopicBus, AutoscaleSink, CachedResponse, ExternalScaler,
    ExternalWriteStore, FirehoseReinject, HttpOutCache, HttpOutSink, InfluxOutSink, LoopbackSink,
};
pub use source::{BatchQuerySource, ExternalStore, StreamFromSource};
pub use transform::{
    CombineTransform, DefaultTransform, DeleteTransform, EvalTransform, FlattenTransform,
    GroupByTransform, MemorySideloadSource, NoOpTransform, ShiftTransform, SideloadSource,
    SideloadTransform, StateTrackingTransform, TrickleTransform, WhereTransform,
};
pub use udf::{UdfBridge, UdfRequest, UdfResponse};
pub use window::{BarrierIdle, BarrierPeriod, CountWindow, TimeWindow};
