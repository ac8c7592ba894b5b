mod barrier;
mod count_window;
mod time_window;

pub use barrier::{BarrierIdle, BarrierPeriod};
pub use count_window::CountWindow;
pub use time_window::TimeWindow;
