pub mod rover;
pub mod telemetry;

pub use rover::{NewRover, Rover};
pub use telemetry::{ArchiveRecord, NewStagingRecord, StagingRecord};
