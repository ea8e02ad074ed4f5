// Capture Pipeline (ADR-003)
// Live session -> raw capture -> remux -> finalized recording with sidecars

pub mod naming;
pub mod pipeline;
pub mod provider;
pub mod remux;
pub mod sidecar;
pub mod ticker;

pub use pipeline::{CaptureDeps, CapturePipeline, SkipReason, TriggerOutcome};
pub use provider::{provider_for, Provider};
pub use ticker::{CaptureSignal, CaptureTicker};
