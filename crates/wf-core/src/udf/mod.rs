mod bridge;
mod protocol;

pub use bridge::UdfBridge;
pub use protocol::{UdfRequest, UdfResponse};
