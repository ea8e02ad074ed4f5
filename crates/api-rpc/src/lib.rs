//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 server for StreamVault: live/update/offline
//! triggers plus job and retention admin methods.
//! Adheres to ADR-020 (API Contract).

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
