use std::fmt::{Debug, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use url::Url;

use castsponsorskip_core::core::segments::{Action, Segment, SegmentError, SegmentSource};
use castsponsorskip_core::core::utils::retry::{retry, RetryError, TryError};

use crate::sponsorblock::VideoSegments;

const DEFAULT_API_URL: &str = "https://sponsor.ajay.app";
const CATEGORY_PARAM_KEY: &str = "category";
const ACTION_TYPE_PARAM_KEY: &str = "actionType";
const HASH_PREFIX_LENGTH: usize = 4;
const QUERY_ATTEMPTS: u32 = 10;
const QUERY_INITIAL_SLEEP: Duration = Duration::from_millis(500);

/// The SponsorBlock segment source.
///
/// Lookups use the privacy-preserving hash-prefix API: the service is queried with the
/// first hex characters of the video id's SHA-256 and the exact video is selected from
/// the returned candidates.
pub struct SponsorBlockService {
    url: String,
    client: Client,
    categories: Vec<String>,
    action_types: Vec<Action>,
    cancel: CancellationToken,
}

impl SponsorBlockService {
    pub fn builder() -> SponsorBlockServiceBuilder {
        SponsorBlockServiceBuilder::default()
    }

    fn create_query_url(&self, video_id: &str) -> Result<Url, SegmentError> {
        let mut hasher = Sha256::new();
        hasher.update(video_id.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        let prefix = &hash[..HASH_PREFIX_LENGTH];

        let mut query: Vec<(&str, String)> = Vec::new();
        for category in self.categories.iter() {
            query.push((CATEGORY_PARAM_KEY, category.clone()));
        }
        for action_type in self.action_types.iter() {
            query.push((ACTION_TYPE_PARAM_KEY, action_type.to_string()));
        }

        Url::parse_with_params(
            format!("{}/api/skipSegments/{}", self.url, prefix).as_str(),
            &query,
        )
        .map_err(|e| SegmentError::Request(e.to_string()))
    }

    async fn execute_query(&self, video_id: &str, url: Url) -> Result<Vec<Segment>, SegmentError> {
        debug!("Retrieving segments from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SegmentError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                trace!("Received segment response for {}, decoding JSON...", video_id);
                let results = response
                    .json::<Vec<VideoSegments>>()
                    .await
                    .map_err(|e| SegmentError::Parsing(e.to_string()))?;

                Ok(results
                    .into_iter()
                    .find(|e| e.video_id == video_id)
                    .map(|e| e.segments)
                    .unwrap_or_default())
            }
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SegmentError::Response(status.as_u16(), body))
            }
        }
    }
}

#[async_trait]
impl SegmentSource for SponsorBlockService {
    async fn segments(&self, video_id: &str) -> Result<Vec<Segment>, SegmentError> {
        let url = self.create_query_url(video_id)?;

        retry(
            &self.cancel,
            QUERY_ATTEMPTS,
            QUERY_INITIAL_SLEEP,
            |attempt| {
                let url = url.clone();
                async move {
                    if attempt > 0 {
                        trace!("Retrying segment query for {}, attempt {}", video_id, attempt + 1);
                    }
                    self.execute_query(video_id, url).await.map_err(TryError::from)
                }
            },
        )
        .await
        .map_err(|e| match e {
            RetryError::Inner(e) => e,
            RetryError::Cancelled => SegmentError::Cancelled,
        })
    }
}

impl Debug for SponsorBlockService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SponsorBlockService")
            .field("url", &self.url)
            .field("categories", &self.categories)
            .field("action_types", &self.action_types)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct SponsorBlockServiceBuilder {
    url: Option<String>,
    categories: Option<Vec<String>>,
    action_types: Option<Vec<Action>>,
    cancel: Option<CancellationToken>,
}

impl SponsorBlockServiceBuilder {
    /// The base url of the SponsorBlock API.
    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The segment categories to query.
    pub fn categories(mut self, categories: Vec<String>) -> Self {
        self.categories = Some(categories);
        self
    }

    /// The segment action types to query.
    pub fn action_types(mut self, action_types: Vec<Action>) -> Self {
        self.action_types = Some(action_types);
        self
    }

    /// The token cancelling in-flight queries on shutdown.
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> SponsorBlockService {
        SponsorBlockService {
            url: self
                .url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: Client::new(),
            categories: self
                .categories
                .unwrap_or_else(|| vec!["sponsor".to_string()]),
            action_types: self
                .action_types
                .unwrap_or_else(|| vec![Action::Skip, Action::Mute]),
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}
