// Metadata Client Port
// Upstream platform API, consumed only at this boundary

use async_trait::async_trait;

use crate::domain::{Channel, Recording};
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Live check used before a fallback capture
    async fn is_live(&self, channel: &Channel) -> Result<bool>;

    /// Find the platform's own copy of a local recording; returns its id
    async fn match_video(&self, channel: &Channel, recording: &Recording) -> Result<Option<String>>;
}

/// Client for installs without upstream API credentials.
/// Nothing is ever live and nothing matches.
pub struct OfflineMetadataClient;

#[async_trait]
impl MetadataClient for OfflineMetadataClient {
    async fn is_live(&self, _channel: &Channel) -> Result<bool> {
        Ok(false)
    }

    async fn match_video(&self, _channel: &Channel, _recording: &Recording) -> Result<Option<String>> {
        Ok(None)
    }
}
