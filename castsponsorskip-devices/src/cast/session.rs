use std::fmt::Debug;
use std::net::IpAddr;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cast::{CastEvent, Result, StatusSnapshot};

/// A callback invoked for every notification received from the Cast device.
pub type MessageFunc = Box<dyn Fn(&CastEvent) + Send + Sync>;

/// A long-lived multiplexed channel to a Cast receiver.
///
/// The session caches the receiver application, media session and volume state of the
/// device; [CastSession::update] refreshes the cache and [CastSession::status] reads it.
/// Notifications pushed by the device are delivered through the registered message
/// functions on a thread owned by the session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CastSession: Debug + Send + Sync {
    /// Open the Cast channel to the given address, replacing any previous connection.
    async fn start(&self, addr: IpAddr, port: u16) -> Result<()>;

    /// Refresh the cached receiver, media and volume snapshot of the device.
    async fn update(&self) -> Result<()>;

    /// The most recently refreshed status snapshot.
    async fn status(&self) -> StatusSnapshot;

    /// Register a callback invoked for every notification received from the device.
    async fn add_message_func(&self, func: MessageFunc);

    /// Seek the current media session to the given time in seconds.
    async fn seek_to_time(&self, seconds: f32) -> Result<()>;

    /// Change the mute state of the device.
    async fn set_muted(&self, muted: bool) -> Result<()>;

    /// Request the YouTube receiver to skip the currently playing ad.
    ///
    /// Returns [crate::cast::CastError::NoMediaSkipad] when no media is loaded.
    async fn skipad(&self) -> Result<()>;

    /// Close the Cast channel.
    async fn close(&self, force: bool) -> Result<()>;
}
