use std::fmt::{Debug, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use castsponsorskip_core::core::utils::retry::{retry, RetryError, TryError};
use castsponsorskip_core::core::video::{VideoError, VideoIdResolver};

use crate::youtube::SearchResponse;

const DEFAULT_API_URL: &str = "https://www.googleapis.com";
const SEARCH_PATH: &str = "/youtube/v3/search";
const QUERY_ATTEMPTS: u32 = 10;
const QUERY_INITIAL_SLEEP: Duration = Duration::from_millis(500);

/// Resolves video ids through the YouTube Data API.
///
/// Some Cast devices do not expose the video id of a stream; this service searches the
/// artist/title metadata instead and accepts the first result published by a channel
/// whose title contains the artist.
pub struct YouTubeService {
    url: String,
    client: Client,
    api_key: Option<String>,
    cancel: CancellationToken,
}

impl YouTubeService {
    pub fn builder() -> YouTubeServiceBuilder {
        YouTubeServiceBuilder::default()
    }

    fn create_search_url(&self, api_key: &str, artist: &str, title: &str) -> Result<Url, VideoError> {
        let query = format!("\"{}\"+intitle:\"{}\"", artist, title);

        Url::parse_with_params(
            format!("{}{}", self.url, SEARCH_PATH).as_str(),
            &[
                ("part", "id"),
                ("part", "snippet"),
                ("q", query.as_str()),
                ("key", api_key),
            ],
        )
        .map_err(|e| VideoError::Request(e.to_string()))
    }

    async fn execute_search(&self, url: Url, artist: &str) -> Result<String, VideoError> {
        trace!("Searching video id for artist {}", artist);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VideoError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let result = response
                    .json::<SearchResponse>()
                    .await
                    .map_err(|e| VideoError::Parsing(e.to_string()))?;

                Self::select_video_id(result, artist)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(VideoError::Response(status.as_u16(), body))
            }
        }
    }

    fn select_video_id(response: SearchResponse, artist: &str) -> Result<String, VideoError> {
        if response.items.is_empty() {
            return Err(VideoError::NoVideos);
        }

        let artist = artist.to_lowercase();
        let matched = response
            .items
            .into_iter()
            .find(|item| {
                item.snippet
                    .as_ref()
                    .map(|e| e.channel_title.to_lowercase().contains(&artist))
                    .unwrap_or(false)
            })
            .ok_or(VideoError::NoMatches)?;

        matched
            .id
            .and_then(|e| e.video_id)
            .filter(|e| !e.is_empty())
            .ok_or(VideoError::NoId)
    }
}

#[async_trait]
impl VideoIdResolver for YouTubeService {
    async fn query_video_id(&self, artist: &str, title: &str) -> Result<String, VideoError> {
        let api_key = self.api_key.as_ref().ok_or(VideoError::NotConnected)?;
        let url = self.create_search_url(api_key, artist, title)?;

        let video_id = retry(
            &self.cancel,
            QUERY_ATTEMPTS,
            QUERY_INITIAL_SLEEP,
            |attempt| {
                let url = url.clone();
                async move {
                    if attempt > 0 {
                        trace!("Retrying video search, attempt {}", attempt + 1);
                    }
                    self.execute_search(url, artist).await.map_err(|e| {
                        if e.is_halt() {
                            TryError::Halt(e)
                        } else {
                            TryError::Transient(e)
                        }
                    })
                }
            },
        )
        .await
        .map_err(|e| match e {
            RetryError::Inner(e) => e,
            RetryError::Cancelled => VideoError::Cancelled,
        })?;

        debug!("Resolved video id {} for {} - {}", video_id, artist, title);
        Ok(video_id)
    }
}

impl Debug for YouTubeService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeService")
            .field("url", &self.url)
            .field("connected", &self.api_key.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct YouTubeServiceBuilder {
    url: Option<String>,
    api_key: Option<String>,
    cancel: Option<CancellationToken>,
}

impl YouTubeServiceBuilder {
    /// The base url of the YouTube Data API.
    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The API key; lookups fail with [VideoError::NotConnected] when absent.
    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// The token cancelling in-flight searches on shutdown.
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> YouTubeService {
        YouTubeService {
            url: self
                .url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: Client::new(),
            api_key: self.api_key.filter(|e| !e.is_empty()),
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}
