// Media Probe Port (ffprobe-style inspection of a finished file)

use async_trait::async_trait;
use std::path::Path;

use crate::domain::MediaInfo;
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
}
