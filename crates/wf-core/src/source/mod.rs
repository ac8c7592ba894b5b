mod batch_query;
mod stream_from;

pub use batch_query::{BatchQuerySource, ExternalStore};
pub use stream_from::StreamFromSource;
