pub mod drainer;
pub mod schedule;

pub use drainer::{DrainConfig, DrainReport, Drainer};
pub use schedule::{drain_loop, DrainScheduler};
