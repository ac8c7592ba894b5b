pub mod dag;
pub mod engine;
pub mod expr;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod process;
pub mod snapshot;
pub mod types;
pub mod value;

pub use dag::{
    AlertLevel, AlertLevelRule, Dbrp, DetailsAs, DimensionSpec, EdgeDef, FillPolicy,
    GroupDimensions, HumanDurationSigned, KeepFields, NodeDef, NodeId, NodeKind, OnPredicateError,
    SideloadField, StateTrackingMode, TaskDef, TaskId, TaskKind, UdfTransport,
};
pub use engine::EngineConfig;
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use ingest::IngestConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::MetricsConfig;
pub use process::ProcessConfig;
pub use snapshot::{SnapshotBackend, SnapshotConfig};
pub use types::{ByteSize, HumanDuration};
pub use value::{FieldKind, FieldValue};
