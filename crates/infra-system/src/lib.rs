// StreamVault Infrastructure - System Adapters
// Implements: ProcessLauncher, ProcessProbe, MediaProbe (ADR-002)

pub mod disk_usage;
pub mod media_probe;
pub mod process_probe;
mod signals;
pub mod subprocess_launcher;

pub use disk_usage::{disk_usage, DiskUsage};
pub use media_probe::FfprobeMediaProbe;
pub use process_probe::OsProcessProbe;
pub use subprocess_launcher::SubprocessLauncher;
