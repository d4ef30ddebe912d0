use std::fmt::Debug;

use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use thiserror::Error;

/// The errors that can occur while resolving a video id.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VideoError {
    #[error("the video id service is not connected")]
    NotConnected,
    #[error("search returned no videos")]
    NoVideos,
    #[error("search returned no matching videos")]
    NoMatches,
    #[error("search result does not have a valid video ID")]
    NoId,
    #[error("failed to execute video search, {0}")]
    Request(String),
    #[error("video search failed with status {0}, {1}")]
    Response(u16, String),
    #[error("failed to parse video search response, {0}")]
    Parsing(String),
    #[error("video search has been cancelled")]
    Cancelled,
}

impl VideoError {
    /// Returns true when retrying the search can never succeed.
    pub fn is_halt(&self) -> bool {
        matches!(
            self,
            VideoError::NotConnected
                | VideoError::NoVideos
                | VideoError::NoMatches
                | VideoError::NoId
        )
    }
}

/// Resolves a free-text artist/title pair to a canonical video id.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait VideoIdResolver: Debug + Send + Sync {
    /// Search the video id of the stream with the given artist and title.
    async fn query_video_id(&self, artist: &str, title: &str) -> Result<String, VideoError>;
}
