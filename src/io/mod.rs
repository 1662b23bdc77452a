//! Collaborator seams: imagery archive queries and retry handling

pub mod archive;
pub mod retry;

pub use archive::{ArchiveQuery, AttributeFilter, InMemoryArchive, ObservationArchive};
pub use retry::RetryPolicy;
