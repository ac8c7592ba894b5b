mod alert;
mod autoscale;
mod http_out;
mod store_sink;

pub use alert::{AlertRecord, AlertSink, AlertTopicBus};
pub use autoscale::{AutoscaleSink, ExternalScaler};
pub use http_out::{CachedResponse, HttpOutCache, HttpOutSink};
pub use store_sink::{ExternalWriteStore, FirehoseReinject, InfluxOutSink, LoopbackSink};
