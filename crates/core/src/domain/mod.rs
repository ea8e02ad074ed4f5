// Domain Layer - Pure business logic and entities

pub mod channel;
pub mod chapter;
pub mod error;
pub mod job;
pub mod live_event;
pub mod recording;

// Re-exports
pub use channel::{Channel, ProviderKind, StreamNumbers};
pub use chapter::Chapter;
pub use error::DomainError;
pub use job::{JobLoadError, JobRecord, JobSnapshot, JobStatus};
pub use live_event::LiveEvent;
pub use recording::{MediaInfo, Recording, RecordingPhase, Segment};
