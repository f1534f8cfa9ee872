pub mod archive;
pub mod journal;
pub mod operations;
pub mod rovers;

pub use archive::{ArchiveRepository, SqliteArchiveStore};
pub use journal::JournalRepository;
pub use operations::{OperationRepository, SqliteStagingBatch, SqliteStagingStore};
pub use rovers::RoverRepository;
