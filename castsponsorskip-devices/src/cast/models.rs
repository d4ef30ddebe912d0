use derive_more::Display;
use rust_cast::channels::{media, receiver};
use serde::{Serialize, Serializer};

/// The namespace carrying media commands and status notifications.
pub const NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// The custom player state the YouTube receiver reports while an ad is playing.
pub const CUSTOM_PLAYER_STATE_AD: i64 = 1081;
/// The custom player state the YouTube receiver reports while idle.
pub const CUSTOM_PLAYER_STATE_IDLE: i64 = 5;

const PAYLOAD_TYPE_SKIP_AD: &str = "SKIP_AD";

/// Requests the YouTube receiver to skip the currently playing ad.
///
/// The cast library has no call for this message, so it is broadcast on the media
/// namespace directly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipAdCommand {
    /// The unique identifier for the request.
    pub request_id: u64,
    /// The type of payload.
    #[serde(rename = "type", serialize_with = "serialize_skip_ad_type")]
    pub payload_type: (),
    /// The media session the ad is playing on.
    pub media_session_id: i32,
}

/// A notification pushed by the Cast device.
#[derive(Debug, Clone, PartialEq)]
pub enum CastEvent {
    /// The receiver reported its application and volume state.
    ReceiverStatus {
        applications: Vec<Application>,
        volume: Option<Volume>,
    },
    /// A receiver application reported its media state.
    MediaStatus { entries: Vec<MediaStatusEntry> },
    /// The device closed the virtual connection.
    Close,
}

/// A receiver application running on the Cast device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Application {
    pub app_id: String,
    pub display_name: String,
    pub session_id: String,
    pub transport_id: String,
    pub namespaces: Vec<String>,
}

impl Application {
    /// Returns true when the application exposes the given namespace.
    pub fn supports_namespace(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|e| e == namespace)
    }
}

impl From<&receiver::Application> for Application {
    fn from(application: &receiver::Application) -> Self {
        Self {
            app_id: application.app_id.clone(),
            display_name: application.display_name.clone(),
            session_id: application.session_id.clone(),
            transport_id: application.transport_id.clone(),
            namespaces: application.namespaces.clone(),
        }
    }
}

/// The volume of the Cast device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Volume {
    pub level: Option<f32>,
    pub muted: Option<bool>,
}

impl Volume {
    /// Returns true when the device is muted.
    pub fn is_muted(&self) -> bool {
        self.muted.unwrap_or(false)
    }
}

impl From<&receiver::Volume> for Volume {
    fn from(volume: &receiver::Volume) -> Self {
        Self {
            level: volume.level,
            muted: volume.muted,
        }
    }
}

/// The state of the media session loaded on a receiver application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaStatusEntry {
    pub media_session_id: i32,
    pub player_state: String,
    pub current_time: f32,
    pub custom_data: Option<CustomData>,
    pub media: Option<MediaInformation>,
}

impl MediaStatusEntry {
    /// The custom player state integer of the YouTube receiver, when present.
    pub fn custom_player_state(&self) -> Option<i64> {
        self.custom_data.as_ref().and_then(|e| e.player_state)
    }

    /// Returns true when the YouTube receiver reports an ad being played.
    pub fn is_ad_playing(&self) -> bool {
        self.custom_player_state() == Some(CUSTOM_PLAYER_STATE_AD)
    }

    /// The player state of the media session.
    ///
    /// The custom idle state of the YouTube receiver takes precedence; any other custom
    /// state integer defers to the reported player state string.
    pub fn effective_player_state(&self) -> PlayerState {
        match self.custom_player_state() {
            Some(CUSTOM_PLAYER_STATE_IDLE) => PlayerState::Idle,
            _ => PlayerState::from(self.player_state.as_str()),
        }
    }

    /// The content id of the loaded media.
    pub fn content_id(&self) -> &str {
        self.media
            .as_ref()
            .map(|e| e.content_id.as_str())
            .unwrap_or_default()
    }
}

impl From<&media::StatusEntry> for MediaStatusEntry {
    fn from(entry: &media::StatusEntry) -> Self {
        Self {
            media_session_id: entry.media_session_id,
            player_state: PlayerState::from(&entry.player_state).to_string(),
            current_time: entry.current_time.unwrap_or_default(),
            // the status models of the cast library do not carry the receiver's custom data
            custom_data: None,
            media: entry.media.as_ref().map(MediaInformation::from),
        }
    }
}

/// The custom data of the YouTube receiver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomData {
    pub player_state: Option<i64>,
}

/// The loaded media item of a media session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInformation {
    pub content_id: String,
    pub duration: Option<f32>,
    pub metadata: Option<MediaMetadata>,
}

impl From<&media::Media> for MediaInformation {
    fn from(media: &media::Media) -> Self {
        Self {
            content_id: media.content_id.clone(),
            duration: media.duration,
            metadata: media.metadata.as_ref().map(MediaMetadata::from),
        }
    }
}

/// The metadata of the loaded media.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub title: String,
    pub subtitle: String,
    pub artist: String,
}

impl From<&media::Metadata> for MediaMetadata {
    fn from(metadata: &media::Metadata) -> Self {
        match metadata {
            media::Metadata::MusicTrack(e) => Self {
                title: e.title.clone().unwrap_or_default(),
                subtitle: e.album_name.clone().unwrap_or_default(),
                artist: e.artist.clone().unwrap_or_default(),
            },
            media::Metadata::Generic(e) => Self {
                title: e.title.clone().unwrap_or_default(),
                subtitle: e.subtitle.clone().unwrap_or_default(),
                artist: String::new(),
            },
            media::Metadata::Movie(e) => Self {
                title: e.title.clone().unwrap_or_default(),
                subtitle: e.subtitle.clone().unwrap_or_default(),
                artist: String::new(),
            },
            _ => Self::default(),
        }
    }
}

/// The reported playback state of a media session.
#[derive(Debug, Clone, Default, Display, PartialEq)]
pub enum PlayerState {
    #[display("PLAYING")]
    Playing,
    #[display("BUFFERING")]
    Buffering,
    #[display("IDLE")]
    Idle,
    #[display("PAUSED")]
    Paused,
    #[display("UNKNOWN")]
    #[default]
    Unknown,
    #[display("{_0}")]
    Other(String),
}

impl From<&str> for PlayerState {
    fn from(value: &str) -> Self {
        match value {
            "PLAYING" => PlayerState::Playing,
            "BUFFERING" => PlayerState::Buffering,
            "IDLE" => PlayerState::Idle,
            "PAUSED" => PlayerState::Paused,
            "" => PlayerState::Unknown,
            _ => PlayerState::Other(value.to_string()),
        }
    }
}

impl From<&media::PlayerState> for PlayerState {
    fn from(state: &media::PlayerState) -> Self {
        match state {
            media::PlayerState::Idle => PlayerState::Idle,
            media::PlayerState::Playing => PlayerState::Playing,
            media::PlayerState::Buffering => PlayerState::Buffering,
            media::PlayerState::Paused => PlayerState::Paused,
        }
    }
}

/// The cached receiver/media/volume state of a Cast session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub application: Option<Application>,
    pub media: Option<MediaStatusEntry>,
    pub volume: Option<Volume>,
}

/// Serializes the payload type of the [SkipAdCommand].
fn serialize_skip_ad_type<S: Serializer>(_: &(), serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(PAYLOAD_TYPE_SKIP_AD)
}
