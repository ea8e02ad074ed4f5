//! JSON-RPC Server
//!
//! Serves the trigger and admin methods over HTTP on localhost.

use crate::handler::RpcHandler;
use crate::types::{CleanupRequest, KillJobRequest, LiveRequest, OfflineRequest, UpdateRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

// ADR-020: RPC Server Configuration
// jsonrpsee has no Unix socket transport; bind to localhost only
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address (port 0 picks a free one) and the server handle
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        // Trigger source
        let handler = self.handler.clone();
        module
            .register_async_method("stream.live.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: LiveRequest = params.parse()?;
                    handler.live(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("stream.update.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: UpdateRequest = params.parse()?;
                    handler.update(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("stream.offline.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: OfflineRequest = params.parse()?;
                    handler.offline(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Admin APIs
        let handler = self.handler.clone();
        module
            .register_async_method("jobs.list.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.list_jobs().await }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.kill.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: KillJobRequest = params.parse()?;
                    handler.kill_job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("channel.cleanup.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: CleanupRequest = params.parse()?;
                    handler.cleanup(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!(addr = %local_addr, "JSON-RPC server started (localhost only)");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use crate::handler::tests::{fixture, LOGIN};
    use jsonrpsee::core::client::{ClientT, Error as ClientError};
    use jsonrpsee::core::params::ObjectParams;
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::rpc_params;

    async fn start() -> (SocketAddr, ServerHandle) {
        let f = fixture(Vec::new(), Vec::new());
        let config = RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        RpcServer::new(config, f.handler).start().await.unwrap()
    }

    #[tokio::test]
    async fn test_methods_over_http() {
        let (addr, handle) = start().await;
        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();

        let listed: serde_json::Value = client.request("jobs.list.v1", rpc_params![]).await.unwrap();
        assert_eq!(listed["jobs"], serde_json::json!([]));

        let mut params = ObjectParams::new();
        params.insert("login", LOGIN).unwrap();
        let offline: serde_json::Value = client.request("stream.offline.v1", params).await.unwrap();
        assert_eq!(offline["was_capturing"], false);

        let mut params = ObjectParams::new();
        params.insert("login", "nobody").unwrap();
        let err = client
            .request::<serde_json::Value, _>("channel.cleanup.v1", params)
            .await
            .unwrap_err();
        match err {
            ClientError::Call(obj) => assert_eq!(obj.code(), code::NOT_FOUND),
            other => panic!("unexpected error: {:?}", other),
        }

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_params_rejected() {
        let (addr, handle) = start().await;
        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();

        let mut params = ObjectParams::new();
        params.insert("login", LOGIN).unwrap();
        // capture_id and started_at are required
        let err = client
            .request::<serde_json::Value, _>("stream.live.v1", params)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Call(_)));

        handle.stop().unwrap();
    }
}
