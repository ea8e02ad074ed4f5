// StreamVault Infrastructure - Filesystem Adapters
// Implements: JobStore, RecordingStore, JobLogSink, MediaFiles, ChannelRegistry

mod channel_registry;
mod job_log;
mod job_store;
mod media_files;
mod recording_store;

pub use channel_registry::ConfigChannelRegistry;
pub use job_log::FsJobLogSink;
pub use job_store::FsJobStore;
pub use media_files::LocalMediaFiles;
pub use recording_store::FsRecordingStore;

use std::io::ErrorKind;

/// Treat "already gone" as success for removals
pub(crate) fn ignore_not_found(result: std::io::Result<()>) -> std::io::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
