// Job supervision (ADR-002)
// Job handle, debounced broadcasts and the registry that owns live jobs

pub mod debounce;
#[allow(clippy::module_inception)]
pub mod job;
pub mod registry;

pub use debounce::{Dispatch, Debouncer};
pub use job::Job;
pub use registry::{JobRegistry, ReconcileReport};
