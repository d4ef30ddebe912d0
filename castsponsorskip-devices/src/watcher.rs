use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use castsponsorskip_core::core::config::Config;
use castsponsorskip_core::core::segments::{Action, Segment, SegmentSource};
use castsponsorskip_core::core::utils::retry::{retry, RetryError, TryError};
use castsponsorskip_core::core::video::{VideoError, VideoIdResolver};

use crate::cast::{
    CastError, CastEvent, CastSession, DefaultCastSession, MediaStatusEntry, PlayerState,
    StatusSnapshot, Volume,
};
use crate::{CastEntry, EntryResolver, MdnsEntryResolver, VideoMeta};

/// The receiver application the watcher acts on.
const YOUTUBE_APP_NAME: &str = "YouTube";
/// Offset added to a skip seek, as the device truncates the decimals of a seek target.
const SEEK_PADDING: f32 = 0.1;
const CONNECT_ATTEMPTS: u32 = 6;
const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// The errors that terminate a device watcher.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WatchError {
    #[error("cast session failed, {0}")]
    Session(#[from] CastError),
    #[error("watcher has been cancelled")]
    Cancelled,
}

/// Watches a single Cast device and acts on its YouTube playback.
///
/// The watcher runs as a single task that serializes the adaptive poll tick, the
/// session's asynchronous messages and the results of fire-and-forget segment/video-id
/// lookups through one internal event channel.
#[derive(Debug)]
pub struct DeviceWatcher {
    entry: CastEntry,
    config: Arc<Config>,
    session: Arc<dyn CastSession>,
    segment_source: Arc<dyn SegmentSource>,
    video_resolver: Arc<dyn VideoIdResolver>,
    entry_resolver: Arc<dyn EntryResolver>,
    connect_backoff: Duration,
}

#[derive(Debug)]
enum WatcherEvent {
    Message(CastEvent),
    VideoId(String),
    Segments {
        video_id: String,
        segments: Vec<Segment>,
    },
}

/// The mutable state of a device watcher.
#[derive(Debug)]
struct WatcherState {
    entry: CastEntry,
    period: Duration,
    next_tick: Option<Instant>,
    player_state: PlayerState,
    meta: VideoMeta,
    segments: Vec<Segment>,
    muted_segment: Option<usize>,
    prev_segment: Option<usize>,
    prev_segment_ignore_until: Option<Instant>,
}

impl WatcherState {
    fn new(entry: CastEntry, period: Duration) -> Self {
        Self {
            entry,
            period,
            next_tick: Some(Instant::now()),
            player_state: PlayerState::default(),
            meta: VideoMeta::default(),
            segments: Vec::new(),
            muted_segment: None,
            prev_segment: None,
            prev_segment_ignore_until: None,
        }
    }

    /// Arm the tick timer with the current period.
    fn arm_timer(&mut self) {
        self.next_tick = Some(Instant::now() + self.period);
    }

    /// Change the tick period and arm the timer.
    fn reset_period(&mut self, period: Duration) {
        self.period = period;
        self.arm_timer();
    }
}

impl DeviceWatcher {
    pub fn builder() -> DeviceWatcherBuilder {
        DeviceWatcherBuilder::default()
    }

    /// Watch the device until cancelled or until the session fails beyond recovery.
    pub async fn watch(self, cancel: CancellationToken) -> Result<(), WatchError> {
        info!("Found cast device {} ({})", self.entry.name, self.entry.device);

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let tx = tx.clone();
            self.session
                .add_message_func(Box::new(move |event| {
                    let _ = tx.send(WatcherEvent::Message(event.clone()));
                }))
                .await;
        }

        let mut state = WatcherState::new(self.entry.clone(), self.config.playing_interval);
        let result = match self.connect(&cancel, &mut state).await {
            Ok(()) => self.run(&cancel, &mut state, &tx, &mut rx).await,
            Err(WatchError::Cancelled) => Ok(()),
            Err(e) => {
                warn!("Failed to start watching device {}, {}", state.entry.name, e);
                Err(e)
            }
        };

        self.teardown(&mut state).await;
        result
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        state: &mut WatcherState,
        tx: &mpsc::UnboundedSender<WatcherEvent>,
        rx: &mut mpsc::UnboundedReceiver<WatcherEvent>,
    ) -> Result<(), WatchError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                Some(event) = rx.recv() => self.handle_event(state, event).await,
                _ = Self::tick_timer(state.next_tick) => {
                    match self.tick(cancel, state, tx).await {
                        Ok(()) => {}
                        Err(WatchError::Cancelled) => return Ok(()),
                        Err(e) => {
                            error!("Device watcher for {} failed, {}", state.entry.name, e);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn tick_timer(next_tick: Option<Instant>) {
        match next_tick {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn tick(
        &self,
        cancel: &CancellationToken,
        state: &mut WatcherState,
        tx: &mpsc::UnboundedSender<WatcherEvent>,
    ) -> Result<(), WatchError> {
        trace!("Updating status of device {}", state.entry.name);
        if let Err(update_err) = self.session.update().await {
            warn!(
                "Failed to update device {}, {}; attempting to reconnect",
                state.entry.name, update_err
            );
            match self.connect(cancel, state).await {
                Ok(()) => self.session.update().await.map_err(WatchError::Session)?,
                Err(WatchError::Cancelled) => return Err(WatchError::Cancelled),
                Err(_) => return Err(WatchError::Session(update_err)),
            }
        }

        let snapshot = self.session.status().await;
        self.evaluate(state, snapshot, tx).await;

        // an idle device is only polled again once a message arrives
        match state.player_state {
            PlayerState::Idle => state.next_tick = None,
            _ => state.arm_timer(),
        }
        Ok(())
    }

    async fn evaluate(
        &self,
        state: &mut WatcherState,
        snapshot: StatusSnapshot,
        tx: &mpsc::UnboundedSender<WatcherEvent>,
    ) {
        let application = match snapshot.application {
            Some(application) => application,
            None => {
                state.period = self.config.paused_interval;
                return;
            }
        };
        let media = match snapshot.media {
            Some(media) if application.display_name == YOUTUBE_APP_NAME => media,
            _ => {
                state.period = self.config.paused_interval;
                return;
            }
        };

        let player_state = PlayerState::from(media.player_state.as_str());
        state.player_state = player_state.clone();
        if !matches!(
            player_state,
            PlayerState::Playing | PlayerState::Buffering
        ) {
            state.period = self.config.paused_interval;
            return;
        }
        state.period = self.config.playing_interval;

        if media.is_ad_playing() {
            self.handle_ad(state, &snapshot.volume).await;
        } else {
            self.handle_segments(state, &media, &snapshot.volume, tx).await;
        }
    }

    /// Mute the device while an ad is playing and request the receiver to skip it.
    async fn handle_ad(&self, state: &WatcherState, volume: &Option<Volume>) {
        debug!("Detected ad on {}", state.entry.name);
        let mut muted_for_ad = false;

        if self.config.mute_ads && !volume.as_ref().map(Volume::is_muted).unwrap_or(false) {
            match self.session.set_muted(true).await {
                Ok(()) => muted_for_ad = true,
                Err(e) => warn!("Failed to mute ad on {}, {}", state.entry.name, e),
            }
        }

        match self.session.skipad().await {
            Ok(()) => debug!("Skipped ad on {}", state.entry.name),
            Err(CastError::NoMediaSkipad) => {}
            Err(e) => warn!("Failed to skip ad on {}, {}", state.entry.name, e),
        }

        if muted_for_ad {
            if let Err(e) = self.session.set_muted(false).await {
                warn!("Failed to unmute {} after ad, {}", state.entry.name, e);
            }
        }
    }

    async fn handle_segments(
        &self,
        state: &mut WatcherState,
        media: &MediaStatusEntry,
        volume: &Option<Volume>,
        tx: &mpsc::UnboundedSender<WatcherEvent>,
    ) {
        let metadata = media.media.as_ref().and_then(|e| e.metadata.as_ref());
        state.meta.curr_artist = metadata
            .map(|e| {
                if e.artist.is_empty() {
                    e.subtitle.clone()
                } else {
                    e.artist.clone()
                }
            })
            .unwrap_or_default();
        state.meta.curr_title = metadata.map(|e| e.title.clone()).unwrap_or_default();

        let content_id = media.content_id();
        if !self.config.skip_sponsors {
            // passive mode, only report the streams being watched
            state.meta.curr_video_id = content_id.to_string();
            if state.meta.curr_video_id != state.meta.prev_video_id || !state.meta.same_video() {
                info!(
                    "Detected stream on {}: {} - {} ({})",
                    state.entry.name,
                    state.meta.curr_artist,
                    state.meta.curr_title,
                    state.meta.curr_video_id
                );
                state.meta.prev_video_id = state.meta.curr_video_id.clone();
                state.meta.prev_artist = state.meta.curr_artist.clone();
                state.meta.prev_title = state.meta.curr_title.clone();
            }
            return;
        }

        if !content_id.is_empty() {
            state.meta.curr_video_id = content_id.to_string();
        } else if state.meta.curr_video_id.is_empty()
            && !state.meta.empty()
            && !state.meta.same_video()
        {
            // the device does not expose a video id, fall back to a metadata search
            info!(
                "Searching for video id of {} - {}",
                state.meta.curr_artist, state.meta.curr_title
            );
            state.meta.prev_artist = state.meta.curr_artist.clone();
            state.meta.prev_title = state.meta.curr_title.clone();
            self.spawn_video_id_lookup(
                state.meta.curr_artist.clone(),
                state.meta.curr_title.clone(),
                tx.clone(),
            );
        }

        if state.meta.curr_video_id != state.meta.prev_video_id {
            state.segments.clear();
            state.prev_segment = None;
            if !state.meta.curr_video_id.is_empty() {
                info!(
                    "Watching stream on {} with video id {}",
                    state.entry.name, state.meta.curr_video_id
                );
                state.meta.prev_video_id = state.meta.curr_video_id.clone();
                self.spawn_segment_fetch(state.meta.curr_video_id.clone(), tx.clone());
            }
            self.unmute_segment(state).await;
            return;
        }

        let mut current_time = media.current_time;
        let skip_delay = self.config.skip_delay.as_secs_f32();
        for index in 0..state.segments.len() {
            let segment = state.segments[index].clone();
            if segment.start() + skip_delay <= current_time && current_time < segment.end() - 1.0 {
                self.handle_segment_action(state, index, &segment, &mut current_time, volume)
                    .await;
            }
        }

        if let Some(index) = state.muted_segment {
            if let Some(segment) = state.segments.get(index) {
                if current_time < segment.start() - 1.0 || current_time >= segment.end() {
                    debug!("Playback left the muted segment on {}", state.entry.name);
                    self.unmute_segment(state).await;
                }
            }
        }
    }

    async fn handle_segment_action(
        &self,
        state: &mut WatcherState,
        index: usize,
        segment: &Segment,
        current_time: &mut f32,
        volume: &Option<Volume>,
    ) {
        match segment.action_type {
            Action::Skip => {
                let now = Instant::now();
                if state.prev_segment == Some(index)
                    && state
                        .prev_segment_ignore_until
                        .map(|deadline| now < deadline)
                        .unwrap_or(false)
                {
                    // the user seeked back into a segment that was just skipped
                    trace!(
                        "Suppressing repeated skip of {} segment on {}",
                        segment.category,
                        state.entry.name
                    );
                    state.prev_segment_ignore_until =
                        Some(now + self.config.ignore_segment_duration);
                    return;
                }

                info!(
                    "Skipping {} segment [{}, {}] on {}",
                    segment.category,
                    segment.start(),
                    segment.end(),
                    state.entry.name
                );
                match self.session.seek_to_time(segment.end() + SEEK_PADDING).await {
                    Ok(()) => {
                        *current_time = segment.end();
                        state.prev_segment = Some(index);
                        state.prev_segment_ignore_until =
                            Some(now + self.config.ignore_segment_duration);
                    }
                    Err(e) => warn!(
                        "Failed to seek past segment on {}, {}",
                        state.entry.name, e
                    ),
                }
            }
            Action::Mute => {
                let muted = volume.as_ref().map(Volume::is_muted).unwrap_or(false);
                if !muted || state.muted_segment != Some(index) {
                    info!(
                        "Muting {} segment [{}, {}] on {}",
                        segment.category,
                        segment.start(),
                        segment.end(),
                        state.entry.name
                    );
                    match self.session.set_muted(true).await {
                        Ok(()) => state.muted_segment = Some(index),
                        Err(e) => warn!("Failed to mute device {}, {}", state.entry.name, e),
                    }
                }
            }
            Action::Unknown => {}
        }
    }

    async fn handle_event(&self, state: &mut WatcherState, event: WatcherEvent) {
        match event {
            WatcherEvent::Message(event) => self.handle_cast_event(state, event).await,
            WatcherEvent::VideoId(video_id) => {
                debug!(
                    "Resolved video id {} for {}",
                    video_id, state.entry.name
                );
                state.meta.curr_video_id = video_id;
            }
            WatcherEvent::Segments { video_id, segments } => {
                if video_id == state.meta.curr_video_id {
                    debug!(
                        "Loaded {} segments of video {} for {}",
                        segments.len(),
                        video_id,
                        state.entry.name
                    );
                    state.segments = segments;
                } else {
                    trace!("Dropping stale segments of video {}", video_id);
                }
            }
        }
    }

    async fn handle_cast_event(&self, state: &mut WatcherState, event: CastEvent) {
        match event {
            CastEvent::ReceiverStatus { applications, .. } => {
                let display_name = applications
                    .first()
                    .map(|e| e.display_name.as_str())
                    .unwrap_or_default();

                if display_name == YOUTUBE_APP_NAME && state.player_state != PlayerState::Idle {
                    state.reset_period(self.config.playing_interval);
                }
            }
            CastEvent::MediaStatus { entries } => {
                let entry = match entries.into_iter().next() {
                    Some(entry) => entry,
                    None => return,
                };

                let player_state = entry.effective_player_state();
                trace!("Device {} reported state {}", state.entry.name, player_state);
                state.player_state = player_state.clone();
                match player_state {
                    PlayerState::Playing | PlayerState::Buffering => {
                        state.reset_period(self.config.playing_interval)
                    }
                    PlayerState::Idle => {
                        state.reset_period(self.config.paused_interval);
                        self.unmute_segment(state).await;
                    }
                    _ => {}
                }
            }
            CastEvent::Close => {
                debug!("Device {} closed the session", state.entry.name);
                self.unmute_segment(state).await;
                state.segments.clear();
                state.prev_segment = None;
                state.meta.clear();
            }
        }
    }

    async fn connect(
        &self,
        cancel: &CancellationToken,
        state: &mut WatcherState,
    ) -> Result<(), WatchError> {
        let entry_slot = Mutex::new(state.entry.clone());
        let result = retry(cancel, CONNECT_ATTEMPTS, self.connect_backoff, |attempt| {
            let entry_slot = &entry_slot;
            async move {
                let mut entry = entry_slot.lock().await;
                if attempt > 0 {
                    debug!(
                        "Retrying connection to {}, attempt {}",
                        entry.name,
                        attempt + 1
                    );
                    // the device may have been handed a new DHCP lease in the meantime
                    match self.entry_resolver.resolve(&entry.uuid).await {
                        Ok(resolved) => *entry = resolved,
                        Err(e) => debug!("Failed to refresh address of {}, {}", entry.name, e),
                    }
                }

                let addr = entry.addr().ok_or_else(|| {
                    TryError::Halt(CastError::Connection(
                        "device entry has no address".to_string(),
                    ))
                })?;
                self.session.start(addr, entry.port).await.map_err(TryError::from)
            }
        })
        .await;

        state.entry = entry_slot.into_inner();
        match result {
            Ok(()) => {
                debug!("Connected to device {}", state.entry.name);
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(WatchError::Cancelled),
            Err(RetryError::Inner(e)) => Err(WatchError::Session(e)),
        }
    }

    async fn unmute_segment(&self, state: &mut WatcherState) {
        if state.muted_segment.is_some() {
            debug!("Unmuting device {}", state.entry.name);
            if let Err(e) = self.session.set_muted(false).await {
                warn!("Failed to unmute device {}, {}", state.entry.name, e);
            }
            state.muted_segment = None;
        }
    }

    fn spawn_segment_fetch(&self, video_id: String, tx: mpsc::UnboundedSender<WatcherEvent>) {
        let source = self.segment_source.clone();
        tokio::spawn(async move {
            match source.segments(&video_id).await {
                Ok(segments) => {
                    let _ = tx.send(WatcherEvent::Segments { video_id, segments });
                }
                Err(e) => error!("Failed to query segments of video {}, {}", video_id, e),
            }
        });
    }

    fn spawn_video_id_lookup(
        &self,
        artist: String,
        title: String,
        tx: mpsc::UnboundedSender<WatcherEvent>,
    ) {
        let resolver = self.video_resolver.clone();
        tokio::spawn(async move {
            match resolver.query_video_id(&artist, &title).await {
                Ok(video_id) => {
                    let _ = tx.send(WatcherEvent::VideoId(video_id));
                }
                Err(VideoError::NotConnected) => {
                    debug!("Video id lookup is disabled, set a YouTube API key to enable it")
                }
                Err(e) => warn!("Failed to resolve video id of {} - {}, {}", artist, title, e),
            }
        });
    }

    async fn teardown(&self, state: &mut WatcherState) {
        self.unmute_segment(state).await;
        state.next_tick = None;
        if let Err(e) = self.session.close(false).await {
            debug!("Failed to close session of {}, {}", state.entry.name, e);
        }
        debug!("Stopped watching device {}", state.entry.name);
    }
}

#[derive(Debug, Default)]
pub struct DeviceWatcherBuilder {
    entry: Option<CastEntry>,
    config: Option<Arc<Config>>,
    session: Option<Arc<dyn CastSession>>,
    segment_source: Option<Arc<dyn SegmentSource>>,
    video_resolver: Option<Arc<dyn VideoIdResolver>>,
    entry_resolver: Option<Arc<dyn EntryResolver>>,
    connect_backoff: Option<Duration>,
}

impl DeviceWatcherBuilder {
    pub fn entry(mut self, entry: CastEntry) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn session(mut self, session: Arc<dyn CastSession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn segment_source(mut self, segment_source: Arc<dyn SegmentSource>) -> Self {
        self.segment_source = Some(segment_source);
        self
    }

    pub fn video_resolver(mut self, video_resolver: Arc<dyn VideoIdResolver>) -> Self {
        self.video_resolver = Some(video_resolver);
        self
    }

    pub fn entry_resolver(mut self, entry_resolver: Arc<dyn EntryResolver>) -> Self {
        self.entry_resolver = Some(entry_resolver);
        self
    }

    pub fn connect_backoff(mut self, connect_backoff: Duration) -> Self {
        self.connect_backoff = Some(connect_backoff);
        self
    }

    pub fn build(self) -> DeviceWatcher {
        let entry = self.entry.expect("expected an entry to be set");
        let config = self.config.expect("expected a config to be set");
        let session = self.session.unwrap_or_else(|| {
            let skipad_retries =
                (Duration::from_secs(60).as_millis() / config.playing_interval.as_millis().max(1)) as u32;
            Arc::new(
                DefaultCastSession::builder()
                    .skipad_sleep(config.playing_interval)
                    .skipad_retries(skipad_retries.max(1))
                    .build(),
            )
        });
        let entry_resolver = self.entry_resolver.unwrap_or_else(|| {
            Arc::new(MdnsEntryResolver::new(config.network_interface.clone()))
        });

        DeviceWatcher {
            entry,
            config,
            session,
            segment_source: self
                .segment_source
                .expect("expected a segment source to be set"),
            video_resolver: self
                .video_resolver
                .expect("expected a video resolver to be set"),
            entry_resolver,
            connect_backoff: self.connect_backoff.unwrap_or(DEFAULT_CONNECT_BACKOFF),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Mutex as StdMutex;

    use castsponsorskip_core::core::segments::MockSegmentSource;
    use castsponsorskip_core::core::video::MockVideoIdResolver;
    use castsponsorskip_core::init_logger;

    use crate::cast::{
        Application, CustomData, MediaInformation, MockCastSession, NAMESPACE_MEDIA,
    };
    use crate::MockEntryResolver;

    use super::*;

    fn test_entry() -> CastEntry {
        CastEntry {
            uuid: "device-uuid-1".to_string(),
            name: "Living Room TV".to_string(),
            device: "Chromecast".to_string(),
            addr_v4: Some(Ipv4Addr::new(192, 168, 1, 10)),
            addr_v6: None,
            port: 8009,
            info: HashMap::new(),
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            playing_interval: Duration::from_millis(10),
            paused_interval: Duration::from_millis(20),
            ..Default::default()
        })
    }

    fn youtube_snapshot(
        content_id: &str,
        player_state: &str,
        current_time: f32,
        muted: bool,
        custom_state: Option<i64>,
    ) -> StatusSnapshot {
        StatusSnapshot {
            application: Some(Application {
                app_id: "233637DE".to_string(),
                display_name: YOUTUBE_APP_NAME.to_string(),
                session_id: "session-1".to_string(),
                transport_id: "transport-1".to_string(),
                namespaces: vec![NAMESPACE_MEDIA.to_string()],
            }),
            media: Some(MediaStatusEntry {
                media_session_id: 1,
                player_state: player_state.to_string(),
                current_time,
                custom_data: custom_state.map(|e| CustomData {
                    player_state: Some(e),
                }),
                media: Some(MediaInformation {
                    content_id: content_id.to_string(),
                    duration: None,
                    metadata: None,
                }),
            }),
            volume: Some(Volume {
                level: Some(1.0),
                muted: Some(muted),
            }),
        }
    }

    fn mock_session(snapshot: Arc<StdMutex<StatusSnapshot>>) -> MockCastSession {
        let mut session = MockCastSession::new();
        session.expect_add_message_func().returning(|_| ());
        session.expect_start().returning(|_, _| Ok(()));
        session.expect_update().returning(|| Ok(()));
        session
            .expect_status()
            .returning(move || snapshot.lock().unwrap().clone());
        session.expect_close().returning(|_| Ok(()));
        session
    }

    fn segment_source(segments: Vec<Segment>) -> MockSegmentSource {
        let mut source = MockSegmentSource::new();
        source
            .expect_segments()
            .returning(move |_| Ok(segments.clone()));
        source
    }

    fn sponsor_segment(start: f32, end: f32, action: Action) -> Segment {
        Segment {
            segment: [start, end],
            uuid: "sb-uuid-1".to_string(),
            category: "sponsor".to_string(),
            action_type: action,
            votes: 0,
            video_duration: 0.0,
            description: String::new(),
        }
    }

    fn watcher(
        session: MockCastSession,
        source: MockSegmentSource,
        config: Arc<Config>,
    ) -> DeviceWatcher {
        DeviceWatcher::builder()
            .entry(test_entry())
            .config(config)
            .session(Arc::new(session))
            .segment_source(Arc::new(source))
            .video_resolver(Arc::new(MockVideoIdResolver::new()))
            .entry_resolver(Arc::new(MockEntryResolver::new()))
            .connect_backoff(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn test_watcher_skips_sponsor_segment() {
        init_logger!();
        let snapshot = Arc::new(StdMutex::new(youtube_snapshot(
            "fy9jO8JHaPo",
            "PLAYING",
            54.0,
            false,
            None,
        )));
        let mut session = mock_session(snapshot.clone());
        let (seek_tx, mut seek_rx) = mpsc::unbounded_channel();
        session
            .expect_seek_to_time()
            .times(1)
            .returning(move |seconds| {
                let _ = seek_tx.send(seconds);
                Ok(())
            });
        session.expect_set_muted().never();
        let watcher = watcher(
            session,
            segment_source(vec![sponsor_segment(53.433, 57.705, Action::Skip)]),
            test_config(),
        );
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.watch(cancel.clone()));
        let seconds = time::timeout(Duration::from_secs(5), seek_rx.recv())
            .await
            .expect("expected a seek to have been issued")
            .unwrap();

        assert!(
            (seconds - 57.805).abs() < 0.001,
            "expected a seek to 57.805, got {}",
            seconds
        );

        // playback stays within the just-skipped segment, which must not seek again
        time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watcher_mutes_and_releases_segment() {
        init_logger!();
        let snapshot = Arc::new(StdMutex::new(youtube_snapshot(
            "video-1",
            "PLAYING",
            105.0,
            false,
            None,
        )));
        let mut session = mock_session(snapshot.clone());
        let (mute_tx, mut mute_rx) = mpsc::unbounded_channel();
        let mute_snapshot = snapshot.clone();
        session.expect_set_muted().returning(move |muted| {
            mute_snapshot.lock().unwrap().volume = Some(Volume {
                level: Some(1.0),
                muted: Some(muted),
            });
            let _ = mute_tx.send(muted);
            Ok(())
        });
        let watcher = watcher(
            session,
            segment_source(vec![sponsor_segment(100.0, 110.0, Action::Mute)]),
            test_config(),
        );
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.watch(cancel.clone()));
        let muted = time::timeout(Duration::from_secs(5), mute_rx.recv())
            .await
            .expect("expected the segment to have been muted")
            .unwrap();
        assert!(muted);

        // playback leaves the muted segment
        {
            let mut guard = snapshot.lock().unwrap();
            if let Some(media) = guard.media.as_mut() {
                media.current_time = 111.0;
            }
        }
        let muted = time::timeout(Duration::from_secs(5), mute_rx.recv())
            .await
            .expect("expected the segment to have been unmuted")
            .unwrap();
        assert!(!muted);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watcher_mutes_and_skips_ad() {
        init_logger!();
        let snapshot = Arc::new(StdMutex::new(youtube_snapshot(
            "video-1",
            "PLAYING",
            12.0,
            false,
            Some(1081),
        )));
        let calls: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let mut session = mock_session(snapshot.clone());
        let mute_calls = calls.clone();
        let mute_snapshot = snapshot.clone();
        let mute_done = done_tx.clone();
        session.expect_set_muted().returning(move |muted| {
            mute_snapshot.lock().unwrap().volume = Some(Volume {
                level: Some(1.0),
                muted: Some(muted),
            });
            if muted {
                mute_calls.lock().unwrap().push("mute".to_string());
            } else {
                mute_calls.lock().unwrap().push("unmute".to_string());
                let _ = mute_done.send(());
            }
            Ok(())
        });
        let skipad_calls = calls.clone();
        session.expect_skipad().returning(move || {
            skipad_calls.lock().unwrap().push("skipad".to_string());
            Err(CastError::NoMediaSkipad)
        });
        session.expect_seek_to_time().never();
        let watcher = watcher(session, segment_source(Vec::new()), test_config());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.watch(cancel.clone()));
        time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("expected the ad handling to have completed")
            .unwrap();
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            vec!["mute", "skipad", "unmute"],
            calls[0..3].to_vec(),
            "expected the ad to be muted, skipped and unmuted in order"
        );
    }

    #[tokio::test]
    async fn test_watcher_unmutes_on_teardown() {
        init_logger!();
        let snapshot = Arc::new(StdMutex::new(youtube_snapshot(
            "video-1",
            "PLAYING",
            105.0,
            false,
            None,
        )));
        let mut session = mock_session(snapshot.clone());
        let (mute_tx, mut mute_rx) = mpsc::unbounded_channel();
        let mute_snapshot = snapshot.clone();
        session.expect_set_muted().returning(move |muted| {
            mute_snapshot.lock().unwrap().volume = Some(Volume {
                level: Some(1.0),
                muted: Some(muted),
            });
            let _ = mute_tx.send(muted);
            Ok(())
        });
        let watcher = watcher(
            session,
            segment_source(vec![sponsor_segment(100.0, 110.0, Action::Mute)]),
            test_config(),
        );
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.watch(cancel.clone()));
        let muted = time::timeout(Duration::from_secs(5), mute_rx.recv())
            .await
            .expect("expected the segment to have been muted")
            .unwrap();
        assert!(muted);

        // the mute is still active, cancellation must release it
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let mut unmuted = false;
        while let Ok(muted) = mute_rx.try_recv() {
            unmuted = !muted;
        }
        assert!(unmuted, "expected the device to have been unmuted on teardown");
    }

    #[tokio::test]
    async fn test_watcher_exits_after_connect_retries() {
        init_logger!();
        let mut session = MockCastSession::new();
        session.expect_add_message_func().returning(|_| ());
        session
            .expect_start()
            .times(6)
            .returning(|_, _| Err(CastError::Connection("connection refused".to_string())));
        session.expect_close().returning(|_| Ok(()));
        let mut entry_resolver = MockEntryResolver::new();
        entry_resolver
            .expect_resolve()
            .times(5)
            .returning(|uuid| Err(crate::DiscoveryError::DeviceNotFound(uuid.to_string())));
        let watcher = DeviceWatcher::builder()
            .entry(test_entry())
            .config(test_config())
            .session(Arc::new(session))
            .segment_source(Arc::new(MockSegmentSource::new()))
            .video_resolver(Arc::new(MockVideoIdResolver::new()))
            .entry_resolver(Arc::new(entry_resolver))
            .connect_backoff(Duration::from_millis(1))
            .build();

        let result = watcher.watch(CancellationToken::new()).await;

        assert_eq!(
            Err(WatchError::Session(CastError::Connection(
                "connection refused".to_string()
            ))),
            result
        );
    }

    #[tokio::test]
    async fn test_watcher_reconnects_once_after_update_failure() {
        init_logger!();
        let snapshot = Arc::new(StdMutex::new(StatusSnapshot::default()));
        let mut session = MockCastSession::new();
        session.expect_add_message_func().returning(|_| ());
        let (start_tx, mut start_rx) = mpsc::unbounded_channel();
        session.expect_start().returning(move |_, _| {
            let _ = start_tx.send(());
            Ok(())
        });
        let mut update_seq = mockall::Sequence::new();
        session
            .expect_update()
            .times(1)
            .in_sequence(&mut update_seq)
            .returning(|| Err(CastError::Connection("broken pipe".to_string())));
        session.expect_update().returning(|| Ok(()));
        session
            .expect_status()
            .returning(move || snapshot.lock().unwrap().clone());
        session.expect_close().returning(|_| Ok(()));
        let watcher = watcher_with_session(session);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.watch(cancel.clone()));
        // initial connect
        time::timeout(Duration::from_secs(5), start_rx.recv())
            .await
            .unwrap()
            .unwrap();
        // reconnect caused by the failed update
        time::timeout(Duration::from_secs(5), start_rx.recv())
            .await
            .expect("expected the watcher to have reconnected")
            .unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    fn watcher_with_session(session: MockCastSession) -> DeviceWatcher {
        DeviceWatcher::builder()
            .entry(test_entry())
            .config(test_config())
            .session(Arc::new(session))
            .segment_source(Arc::new(segment_source(Vec::new())))
            .video_resolver(Arc::new(MockVideoIdResolver::new()))
            .entry_resolver(Arc::new(MockEntryResolver::new()))
            .connect_backoff(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn test_watcher_passive_mode_does_not_fetch_segments() {
        init_logger!();
        let snapshot = Arc::new(StdMutex::new(youtube_snapshot(
            "video-1",
            "PLAYING",
            54.0,
            false,
            None,
        )));
        let session = mock_session(snapshot.clone());
        let mut source = MockSegmentSource::new();
        source.expect_segments().never();
        let config = Arc::new(Config {
            playing_interval: Duration::from_millis(10),
            skip_sponsors: false,
            ..Default::default()
        });
        let watcher = watcher(session, source, config);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.watch(cancel.clone()));
        time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watcher_resolves_video_id_from_metadata() {
        init_logger!();
        let mut base = youtube_snapshot("", "PLAYING", 10.0, false, None);
        if let Some(media) = base.media.as_mut() {
            if let Some(information) = media.media.as_mut() {
                information.metadata = Some(crate::cast::MediaMetadata {
                    title: "Some Title".to_string(),
                    subtitle: String::new(),
                    artist: "Some Artist".to_string(),
                });
            }
        }
        let snapshot = Arc::new(StdMutex::new(base));
        let session = mock_session(snapshot.clone());
        let mut resolver = MockVideoIdResolver::new();
        let (resolved_tx, mut resolved_rx) = mpsc::unbounded_channel();
        resolver
            .expect_query_video_id()
            .times(1)
            .returning(move |artist, title| {
                let _ = resolved_tx.send((artist.to_string(), title.to_string()));
                Ok("resolved-video-id".to_string())
            });
        let mut source = MockSegmentSource::new();
        let (fetch_tx, mut fetch_rx) = mpsc::unbounded_channel();
        source.expect_segments().returning(move |video_id| {
            let _ = fetch_tx.send(video_id.to_string());
            Ok(Vec::new())
        });
        let watcher = DeviceWatcher::builder()
            .entry(test_entry())
            .config(test_config())
            .session(Arc::new(session))
            .segment_source(Arc::new(source))
            .video_resolver(Arc::new(resolver))
            .entry_resolver(Arc::new(MockEntryResolver::new()))
            .connect_backoff(Duration::from_millis(1))
            .build();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.watch(cancel.clone()));
        let (artist, title) = time::timeout(Duration::from_secs(5), resolved_rx.recv())
            .await
            .expect("expected a video id lookup")
            .unwrap();
        assert_eq!(("Some Artist".to_string(), "Some Title".to_string()), (artist, title));

        // the next tick observes the resolved id and fetches its segments
        let video_id = time::timeout(Duration::from_secs(5), fetch_rx.recv())
            .await
            .expect("expected a segment fetch")
            .unwrap();
        assert_eq!("resolved-video-id", video_id);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
