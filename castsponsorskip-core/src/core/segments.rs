use std::fmt::Debug;
use std::str::FromStr;

use async_trait::async_trait;
use derive_more::Display;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The action to perform when playback enters a segment.
#[derive(Debug, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Seek past the segment.
    #[display("skip")]
    Skip,
    /// Mute the device for the duration of the segment.
    #[display("mute")]
    Mute,
    /// An action type this application doesn't act on.
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

impl FromStr for Action {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "skip" => Ok(Action::Skip),
            "mute" => Ok(Action::Mute),
            _ => Err(SegmentError::UnknownAction(s.to_string())),
        }
    }
}

/// A community-reported time interval within a YouTube video.
///
/// The interval bounds are in seconds from the start of the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub segment: [f32; 2],
    #[serde(rename = "UUID", default)]
    pub uuid: String,
    pub category: String,
    pub action_type: Action,
    #[serde(default)]
    pub votes: i32,
    #[serde(default)]
    pub video_duration: f32,
    #[serde(default)]
    pub description: String,
}

impl Segment {
    /// The start of the segment in seconds.
    pub fn start(&self) -> f32 {
        self.segment[0]
    }

    /// The end of the segment in seconds.
    pub fn end(&self) -> f32 {
        self.segment[1]
    }
}

/// The errors that can occur while retrieving segments.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SegmentError {
    #[error("segment query failed with status {0}, {1}")]
    Response(u16, String),
    #[error("failed to execute segment query, {0}")]
    Request(String),
    #[error("failed to parse segment response, {0}")]
    Parsing(String),
    #[error("unknown segment action type {0}")]
    UnknownAction(String),
    #[error("segment query has been cancelled")]
    Cancelled,
}

/// Resolves a video id to the list of segments reported for it.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait SegmentSource: Debug + Send + Sync {
    /// Retrieve the segments of the given video id, in the order reported by the source.
    async fn segments(&self, video_id: &str) -> Result<Vec<Segment>, SegmentError>;
}
