use std::str::FromStr;

use thiserror::Error;

use crate::CastEntry;

const INFO_CAPABILITIES: &str = "ca";
const CAPABILITY_MASK: u32 = 31;

/// The capability bits advertised by a Cast device through its `ca` TXT record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const VIDEO_OUT: Capabilities = Capabilities(1);
    pub const VIDEO_IN: Capabilities = Capabilities(1 << 1);
    pub const AUDIO_OUT: Capabilities = Capabilities(1 << 2);
    pub const AUDIO_IN: Capabilities = Capabilities(1 << 3);
    pub const DEV_MODE: Capabilities = Capabilities(1 << 4);

    /// Returns true when any of the given capability bits is set.
    pub fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 != 0
    }
}

impl FromStr for Capabilities {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u32>()
            .map_err(|e| CapabilityError::Invalid(e.to_string()))?;

        Ok(Capabilities((value & CAPABILITY_MASK) as u8))
    }
}

/// The errors that can occur while reading device capabilities.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("capabilities not found")]
    Missing,
    #[error("failed to parse capabilities, {0}")]
    Invalid(String),
}

/// Returns whether the given entry advertises the video-out capability.
///
/// Entries without a `ca` record yield [CapabilityError::Missing]; callers treat an
/// unknown capability set as watchable.
pub fn has_video_out(entry: &CastEntry) -> Result<bool, CapabilityError> {
    let value = entry
        .info
        .get(INFO_CAPABILITIES)
        .ok_or(CapabilityError::Missing)?;
    let capabilities = Capabilities::from_str(value)?;

    Ok(capabilities.contains(Capabilities::VIDEO_OUT))
}
