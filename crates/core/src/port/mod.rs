// Port Layer - Interfaces for external dependencies

pub mod channel_registry;
pub mod id_provider; // For deterministic testing
pub mod job_log;
pub mod job_store;
pub mod media_files;
pub mod media_probe;
pub mod metadata_client;
pub mod process;
pub mod recording_store;
pub mod time_provider;

// Re-exports
pub use channel_registry::ChannelRegistry;
pub use id_provider::IdProvider;
pub use job_log::JobLogSink;
pub use job_store::JobStore;
pub use media_files::MediaFiles;
pub use media_probe::MediaProbe;
pub use metadata_client::MetadataClient;
pub use process::{
    ExecutionError, LaunchedProcess, OutputLine, OutputStream, ProcessExit, ProcessHandle,
    ProcessLauncher, ProcessListing, ProcessProbe, ProcessSpec, Signal,
};
pub use recording_store::RecordingStore;
pub use time_provider::TimeProvider;
