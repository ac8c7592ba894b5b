mod combine;
mod default_delete;
mod eval;
mod flatten;
mod group_by;
mod noop;
mod shift;
mod sideload;
mod state_tracking;
mod trickle;
mod where_;

pub use combine::CombineTransform;
pub use default_delete::{DefaultTransform, DeleteTransform};
pub use eval::EvalTransform;
pub use flatten::FlattenTransform;
pub use group_by::GroupByTransform;
pub use noop::NoOpTransform;
pub use shift::ShiftTransform;
pub use sideload::{MemorySideloadSource, SideloadSource, SideloadTransform};
pub use state_tracking::StateTrackingTransform;
pub use trickle::TrickleTransform;
pub use where_::WhereTransform;
