// Application Layer - Use Cases and Business Logic

pub mod capture;
pub mod config;
pub mod constants;
pub mod events;
pub mod eviction;
pub mod job;
pub mod maintenance;
pub mod recovery;
pub mod shutdown;

// Re-exports
pub use capture::{CaptureDeps, CapturePipeline, SkipReason, TriggerOutcome};
pub use config::{BinConfig, CaptureConfig, EvictionConfig, JobConfig, PipelineTimings};
pub use events::{AlertLevel, EventBus, Notification};
pub use eviction::EvictionService;
pub use job::{Job, JobRegistry, ReconcileReport};
pub use maintenance::CleanupScheduler;
pub use recovery::RecoveryService;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
