use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use castsponsorskip_core::core::config::Config;

use crate::CastEntry;

/// The mDNS service type of Google Cast devices.
pub const SERVICE_TYPE: &str = "_googlecast._tcp.local.";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 16;

/// The errors that can occur during device discovery.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DiscoveryError {
    #[error("failed to initialize discovery, {0}")]
    Initialization(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
}

/// A specialized `Result` type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Produces the Cast endpoints to watch.
///
/// In scan mode the producer repeatedly browses mDNS, restarting the browse every
/// `discover_interval`. When static device addresses are configured, discovery is
/// bypassed and the configured list is re-emitted every `discover_interval` instead.
/// The output channel closes once the given token is cancelled.
#[derive(Debug)]
pub struct DeviceDiscovery {
    config: Arc<Config>,
}

impl DeviceDiscovery {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Begin emitting Cast entries until the token is cancelled.
    pub fn begin(&self, cancel: CancellationToken) -> mpsc::Receiver<CastEntry> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let config = self.config.clone();

        if config.device_addrs.is_empty() {
            tokio::spawn(Self::run_scan(config, tx, cancel));
        } else {
            tokio::spawn(Self::run_static(config, tx, cancel));
        }

        rx
    }

    async fn run_scan(
        config: Arc<Config>,
        tx: mpsc::Sender<CastEntry>,
        cancel: CancellationToken,
    ) {
        match config.network_interface.as_ref() {
            Some(interface) => info!("Searching for devices on interface {}...", interface),
            None => info!("Searching for devices..."),
        }

        while !cancel.is_cancelled() {
            if let Err(e) = Self::scan_once(&config, &tx, &cancel).await {
                error!("Failed to discover devices, {}", e);
            }
        }

        debug!("Device discovery has been stopped");
    }

    async fn scan_once(
        config: &Config,
        tx: &mpsc::Sender<CastEntry>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let daemon = create_daemon(config.network_interface.as_deref())?;
        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Initialization(e.to_string()))?;
        let deadline = Instant::now() + config.discover_interval;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep_until(deadline) => {
                    trace!("Restarting device discovery");
                    break;
                }
                event = receiver.recv_async() => match event {
                    Ok(ServiceEvent::ServiceResolved(service_info)) => {
                        let entry = CastEntry::from_service_info(&service_info);
                        trace!("Discovered device {:?}", entry);
                        if tx.send(entry).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Device discovery stream ended, {}", e);
                        break;
                    }
                }
            }
        }

        let _ = daemon.stop_browse(SERVICE_TYPE);
        let _ = daemon.shutdown();
        Ok(())
    }

    async fn run_static(
        config: Arc<Config>,
        tx: mpsc::Sender<CastEntry>,
        cancel: CancellationToken,
    ) {
        match config.network_interface.as_ref() {
            Some(interface) => info!(
                "Connecting to configured devices on interface {}...",
                interface
            ),
            None => info!("Connecting to configured devices..."),
        }

        loop {
            for device in config.device_addrs.iter() {
                let entry = CastEntry::from(device);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = tx.send(entry) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(config.discover_interval) => {}
            }
        }
    }
}

/// Resolves the current address of a device by its UUID.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntryResolver: Debug + Send + Sync {
    /// Look up the entry with the given UUID through a bounded discovery scan.
    async fn resolve(&self, uuid: &str) -> Result<CastEntry>;
}

/// The default [EntryResolver] backed by a scoped mDNS browse.
#[derive(Debug)]
pub struct MdnsEntryResolver {
    network_interface: Option<String>,
}

impl MdnsEntryResolver {
    pub fn new(network_interface: Option<String>) -> Self {
        Self { network_interface }
    }
}

#[async_trait]
impl EntryResolver for MdnsEntryResolver {
    async fn resolve(&self, uuid: &str) -> Result<CastEntry> {
        debug!("Looking up current address of device {}", uuid);
        let daemon = create_daemon(self.network_interface.as_deref())?;
        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Initialization(e.to_string()))?;

        let result = time::timeout(LOOKUP_TIMEOUT, async {
            while let Ok(event) = receiver.recv_async().await {
                if let ServiceEvent::ServiceResolved(service_info) = event {
                    let entry = CastEntry::from_service_info(&service_info);
                    if entry.uuid == uuid {
                        return Some(entry);
                    }
                }
            }
            None
        })
        .await;

        let _ = daemon.stop_browse(SERVICE_TYPE);
        let _ = daemon.shutdown();

        result
            .ok()
            .flatten()
            .ok_or_else(|| DiscoveryError::DeviceNotFound(uuid.to_string()))
    }
}

fn create_daemon(network_interface: Option<&str>) -> Result<ServiceDaemon> {
    let daemon =
        ServiceDaemon::new().map_err(|e| DiscoveryError::Initialization(e.to_string()))?;

    if let Some(interface) = network_interface.filter(|e| !e.is_empty()) {
        daemon
            .disable_interface(IfKind::All)
            .map_err(|e| DiscoveryError::Initialization(e.to_string()))?;
        daemon
            .enable_interface(IfKind::Name(interface.to_string()))
            .map_err(|e| DiscoveryError::Initialization(e.to_string()))?;
    }

    Ok(daemon)
}
