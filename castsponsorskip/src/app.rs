use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{debug, info, trace, warn};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;

use castsponsorskip_core::core::config::{Config, ConfigOverrides};
use castsponsorskip_core::core::segments::{Action, SegmentSource};
use castsponsorskip_core::core::video::VideoIdResolver;
use castsponsorskip_devices::{
    has_video_out, CapabilityError, CastEntry, DeviceDiscovery, DeviceRegistry, DeviceWatcher,
};
use castsponsorskip_sponsorblock::sponsorblock::SponsorBlockService;
use castsponsorskip_youtube::youtube::YouTubeService;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Skip sponsored segments of YouTube videos playing on Google Cast devices.
#[derive(Debug, Clone, Parser)]
#[command(name = "castsponsorskip", version)]
pub struct Args {
    /// The root log level of the application.
    #[arg(long)]
    pub log_level: Option<String>,
    /// Comma-separated list of device addresses, disabling discovery when set.
    #[arg(long, value_delimiter = ',')]
    pub devices: Option<Vec<String>>,
    /// Interval between device discovery restarts.
    #[arg(long, value_parser = parse_duration)]
    pub discover_interval: Option<Duration>,
    /// Interval to scan paused devices.
    #[arg(long, value_parser = parse_duration)]
    pub paused_interval: Option<Duration>,
    /// Interval to scan playing devices.
    #[arg(long, value_parser = parse_duration)]
    pub playing_interval: Option<Duration>,
    /// Delay added to a segment start before a skip fires.
    #[arg(long, value_parser = parse_duration)]
    pub skip_delay: Option<Duration>,
    /// Window during which a just-skipped segment will not fire again.
    #[arg(long, value_parser = parse_duration)]
    pub ignore_segment_duration: Option<Duration>,
    /// Network interface to use for discovery and device connections.
    #[arg(long, short = 'i')]
    pub network_interface: Option<String>,
    /// Enable skipping of sponsor segments.
    #[arg(long)]
    pub skip_sponsors: Option<bool>,
    /// SponsorBlock categories to act on.
    #[arg(long, short = 'c', value_delimiter = ',')]
    pub categories: Option<Vec<String>>,
    /// SponsorBlock action types to act on.
    #[arg(long, value_delimiter = ',', value_parser = parse_action)]
    pub action_types: Option<Vec<Action>>,
    /// YouTube API key for fallback video identification.
    #[arg(long)]
    pub youtube_api_key: Option<String>,
    /// Mute the device while an in-stream advertisement is playing.
    #[arg(long)]
    pub mute_ads: Option<bool>,
}

impl Args {
    /// Convert the parsed arguments into configuration overrides.
    pub fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            log_level: self.log_level,
            devices: self.devices,
            discover_interval: self.discover_interval,
            paused_interval: self.paused_interval,
            playing_interval: self.playing_interval,
            skip_delay: self.skip_delay,
            ignore_segment_duration: self.ignore_segment_duration,
            network_interface: self.network_interface,
            skip_sponsors: self.skip_sponsors,
            categories: self.categories,
            action_types: self.action_types,
            youtube_api_key: self.youtube_api_key,
            mute_ads: self.mute_ads,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value)
}

fn parse_action(value: &str) -> Result<Action, castsponsorskip_core::core::segments::SegmentError> {
    value.parse()
}

/// The CastSponsorSkip application instance.
///
/// It owns the device registry, the segment source and the video id resolver, drives
/// device discovery and supervises one watcher task per discovered device.
#[derive(Debug)]
pub struct CastSponsorSkip {
    config: Arc<Config>,
    registry: DeviceRegistry,
    segment_source: Arc<dyn SegmentSource>,
    video_resolver: Arc<dyn VideoIdResolver>,
    cancel: CancellationToken,
}

impl CastSponsorSkip {
    pub fn new(config: Arc<Config>) -> Self {
        let cancel = CancellationToken::new();
        let segment_source: Arc<dyn SegmentSource> = Arc::new(
            SponsorBlockService::builder()
                .categories(config.categories.clone())
                .action_types(config.action_types.clone())
                .cancel(cancel.child_token())
                .build(),
        );
        let video_resolver: Arc<dyn VideoIdResolver> = Arc::new(
            YouTubeService::builder()
                .api_key(config.youtube_api_key.clone())
                .cancel(cancel.child_token())
                .build(),
        );

        Self {
            config,
            registry: DeviceRegistry::new(),
            segment_source,
            video_resolver,
            cancel,
        }
    }

    /// Run the application until a shutdown signal arrives.
    pub async fn run(&self) {
        self.spawn_signal_handler();

        let discovery = DeviceDiscovery::new(self.config.clone());
        let mut entries = discovery.begin(self.cancel.child_token());
        let mut watchers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                entry = entries.recv() => match entry {
                    Some(entry) => self.handle_entry(entry, &mut watchers),
                    None => break,
                }
            }
        }

        if !watchers.is_empty() {
            info!("Waiting for {} device watchers to stop", watchers.len());
        }
        let drain = async {
            while watchers.join_next().await.is_some() {}
        };
        if time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("Timed out waiting for device watchers to stop");
        }

        info!("CastSponsorSkip has been stopped");
    }

    fn handle_entry(&self, entry: CastEntry, watchers: &mut JoinSet<()>) {
        if !should_watch(&entry) {
            return;
        }

        let token = match self.registry.register(&entry.uuid) {
            Some(token) => token,
            None => {
                trace!("Device {} is already being watched", entry.name);
                return;
            }
        };

        let watcher = DeviceWatcher::builder()
            .entry(entry.clone())
            .config(self.config.clone())
            .segment_source(self.segment_source.clone())
            .video_resolver(self.video_resolver.clone())
            .build();
        let cancel = self.cancel.child_token();
        let name = entry.name.clone();

        watchers.spawn(async move {
            if let Err(e) = watcher.watch(cancel).await {
                warn!("Device watcher for {} stopped, {}", name, e);
            }
            drop(token);
        });
    }

    fn spawn_signal_handler(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Received shutdown signal, stopping...");
            cancel.cancel();

            wait_for_signal().await;
            warn!("Received second shutdown signal, forcing exit");
            process::exit(1);
        });
    }
}

/// Decide whether a discovered endpoint should be watched.
fn should_watch(entry: &CastEntry) -> bool {
    if !entry.is_identifiable() {
        debug!("Ignoring unidentified device {:?}", entry);
        return false;
    }
    if entry.is_group() {
        debug!("Ignoring cast group {}", entry.name);
        return false;
    }

    match has_video_out(entry) {
        Ok(true) => true,
        Ok(false) => {
            info!("Ignoring device {} without video output", entry.name);
            false
        }
        Err(CapabilityError::Missing) => {
            trace!("Device {} does not advertise capabilities", entry.name);
            true
        }
        Err(e) => {
            debug!("Failed to parse capabilities of {}, {}", entry.name, e);
            true
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())
        .expect("expected the interrupt signal handler to be registered");
    let mut terminate = signal(SignalKind::terminate())
        .expect("expected the terminate signal handler to be registered");
    let mut quit =
        signal(SignalKind::quit()).expect("expected the quit signal handler to be registered");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = quit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
