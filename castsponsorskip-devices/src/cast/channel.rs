use std::fmt::{Debug, Formatter};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use rust_cast::channels::connection::ConnectionResponse;
use rust_cast::channels::heartbeat::HeartbeatResponse;
use rust_cast::channels::media::MediaResponse;
use rust_cast::channels::receiver::{self, ReceiverResponse};
use rust_cast::{CastDevice, ChannelMessage};
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::cast::{
    Application, CastError, CastEvent, CastSession, MediaStatusEntry, MessageFunc, Result,
    SkipAdCommand, StatusSnapshot, Volume, NAMESPACE_MEDIA,
};

pub(crate) const DEFAULT_RECEIVER: &str = "receiver-0";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_SKIPAD_SLEEP: Duration = Duration::from_millis(500);
const DEFAULT_SKIPAD_RETRIES: u32 = 120;

/// The default [CastSession] implementation.
///
/// It is a thin thread-safe wrapper around the cast library's device channel, which
/// owns the TLS connection, frame codec, virtual connections and request handling.
/// A reader thread drains the device's messages and forwards receiver, media and close
/// notifications to the registered message functions.
pub struct DefaultCastSession {
    inner: Arc<InnerCastSession>,
}

impl DefaultCastSession {
    pub fn builder() -> DefaultCastSessionBuilder {
        DefaultCastSessionBuilder::default()
    }

    pub fn new(skipad_sleep: Duration, skipad_retries: u32) -> Self {
        Self {
            inner: Arc::new(InnerCastSession {
                skipad_sleep,
                skipad_retries,
                device: Mutex::new(None),
                reader_token: Mutex::new(CancellationToken::new()),
                snapshot: Mutex::new(StatusSnapshot::default()),
                message_funcs: StdMutex::new(Vec::new()),
                connected_transport: Mutex::new(None),
                request_id: AtomicU64::new(0),
            }),
        }
    }

    async fn run_heartbeat(device: Arc<CastDevice<'static>>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(HEARTBEAT_INTERVAL) => {}
            }

            trace!("Sending Cast device heartbeat");
            if let Err(e) = device.heartbeat.ping() {
                warn!("Failed to ping Cast device, {}", e);
                break;
            }
        }

        debug!("Cast session heartbeat has been stopped");
    }
}

#[async_trait]
impl CastSession for DefaultCastSession {
    async fn start(&self, addr: IpAddr, port: u16) -> Result<()> {
        self.inner.disconnect().await;

        trace!(
            "Trying to establish connection with Cast device on {}:{}",
            addr,
            port
        );
        let device = CastDevice::connect_without_host_verification(addr.to_string(), port)
            .map_err(|e| CastError::Connection(e.to_string()))?;
        device
            .connection
            .connect(DEFAULT_RECEIVER)
            .map_err(|e| CastError::Connection(e.to_string()))?;
        device
            .heartbeat
            .ping()
            .map_err(|e| CastError::Heartbeat(e.to_string()))?;
        debug!("Connected to Cast device on {}:{}", addr, port);

        let device = Arc::new(device);
        let token = CancellationToken::new();
        *self.inner.device.lock().await = Some(device.clone());
        *self.inner.reader_token.lock().await = token.clone();
        *self.inner.connected_transport.lock().await = None;

        let reader_inner = self.inner.clone();
        let reader_device = device.clone();
        let reader_token = token.clone();
        thread::spawn(move || InnerCastSession::run_reader(reader_inner, reader_device, reader_token));
        tokio::spawn(Self::run_heartbeat(device, token));

        Ok(())
    }

    async fn update(&self) -> Result<()> {
        let device = self.inner.device().await?;
        let status = device
            .receiver
            .get_status()
            .map_err(|e| CastError::Connection(e.to_string()))?;

        let application = status.applications.first().map(Application::from);
        let volume = Some(Volume::from(&status.volume));
        let mut media = None;

        if let Some(app) = application.as_ref() {
            if app.supports_namespace(NAMESPACE_MEDIA) && !app.transport_id.is_empty() {
                self.inner.ensure_transport(&device, &app.transport_id).await?;

                let status = device
                    .media
                    .get_status(app.transport_id.as_str(), None)
                    .map_err(|e| CastError::Connection(e.to_string()))?;
                media = status.entries.first().map(MediaStatusEntry::from);
            }
        }

        *self.inner.snapshot.lock().await = StatusSnapshot {
            application,
            media,
            volume,
        };
        Ok(())
    }

    async fn status(&self) -> StatusSnapshot {
        self.inner.snapshot.lock().await.clone()
    }

    async fn add_message_func(&self, func: MessageFunc) {
        self.inner
            .message_funcs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(func);
    }

    async fn seek_to_time(&self, seconds: f32) -> Result<()> {
        let device = self.inner.device().await?;
        let (transport, media_session_id) = self.inner.media_target().await?;

        device
            .media
            .seek(transport.as_str(), media_session_id, Some(seconds), None)
            .map_err(|e| CastError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        let device = self.inner.device().await?;

        device
            .receiver
            .set_volume(receiver::Volume {
                level: None,
                muted: Some(muted),
            })
            .map_err(|e| CastError::Connection(e.to_string()))?;

        // reflect the new mute state in the snapshot until the next update
        let mut snapshot = self.inner.snapshot.lock().await;
        match snapshot.volume.as_mut() {
            Some(volume) => volume.muted = Some(muted),
            None => {
                snapshot.volume = Some(Volume {
                    level: None,
                    muted: Some(muted),
                })
            }
        }
        Ok(())
    }

    async fn skipad(&self) -> Result<()> {
        let device = self
            .inner
            .device()
            .await
            .map_err(|_| CastError::NoMediaSkipad)?;
        let (transport, media_session_id) = self
            .inner
            .media_target()
            .await
            .map_err(|_| CastError::NoMediaSkipad)?;

        for attempt in 0..self.inner.skipad_retries.max(1) {
            let status = device
                .media
                .get_status(transport.as_str(), None)
                .map_err(|e| CastError::Connection(e.to_string()))?;
            let entry = match status.entries.first() {
                Some(entry) => entry,
                None => return Ok(()),
            };
            // an ad plays on its own media session, a new session id means it ended
            if entry.media_session_id != media_session_id {
                debug!("Ad is no longer playing");
                return Ok(());
            }

            trace!("Requesting ad skip, attempt {}", attempt + 1);
            let command = SkipAdCommand {
                request_id: self.inner.next_request_id(),
                payload_type: (),
                media_session_id: entry.media_session_id,
            };
            device
                .receiver
                .broadcast_message(NAMESPACE_MEDIA, &command)
                .map_err(|e| CastError::Connection(e.to_string()))?;
            time::sleep(self.inner.skipad_sleep).await;
        }

        Ok(())
    }

    async fn close(&self, force: bool) -> Result<()> {
        debug!("Closing Cast session");
        if !force {
            if let Ok(device) = self.inner.device().await {
                if let Some(transport) = self.inner.connected_transport.lock().await.as_ref() {
                    let _ = device.connection.disconnect(transport.as_str());
                }
                let _ = device.connection.disconnect(DEFAULT_RECEIVER);
            }
        }

        self.inner.disconnect().await;
        Ok(())
    }
}

impl Debug for DefaultCastSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCastSession")
            .field("skipad_sleep", &self.inner.skipad_sleep)
            .field("skipad_retries", &self.inner.skipad_retries)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct DefaultCastSessionBuilder {
    skipad_sleep: Option<Duration>,
    skipad_retries: Option<u32>,
}

impl DefaultCastSessionBuilder {
    /// The sleep between ad skip attempts.
    pub fn skipad_sleep(mut self, sleep: Duration) -> Self {
        self.skipad_sleep = Some(sleep);
        self
    }

    /// The number of ad skip attempts before giving up.
    pub fn skipad_retries(mut self, retries: u32) -> Self {
        self.skipad_retries = Some(retries);
        self
    }

    pub fn build(self) -> DefaultCastSession {
        DefaultCastSession::new(
            self.skipad_sleep.unwrap_or(DEFAULT_SKIPAD_SLEEP),
            self.skipad_retries.unwrap_or(DEFAULT_SKIPAD_RETRIES),
        )
    }
}

struct InnerCastSession {
    skipad_sleep: Duration,
    skipad_retries: u32,
    device: Mutex<Option<Arc<CastDevice<'static>>>>,
    reader_token: Mutex<CancellationToken>,
    snapshot: Mutex<StatusSnapshot>,
    message_funcs: StdMutex<Vec<MessageFunc>>,
    connected_transport: Mutex<Option<String>>,
    request_id: AtomicU64,
}

impl InnerCastSession {
    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn device(&self) -> Result<Arc<CastDevice<'static>>> {
        self.device
            .lock()
            .await
            .clone()
            .ok_or(CastError::NotConnected)
    }

    async fn ensure_transport(
        &self,
        device: &CastDevice<'static>,
        transport_id: &str,
    ) -> Result<()> {
        let mut transport = self.connected_transport.lock().await;
        if transport.as_deref() != Some(transport_id) {
            trace!("Connecting to application transport {}", transport_id);
            device
                .connection
                .connect(transport_id)
                .map_err(|e| CastError::Connection(e.to_string()))?;
            *transport = Some(transport_id.to_string());
        }
        Ok(())
    }

    async fn media_target(&self) -> Result<(String, i32)> {
        let snapshot = self.snapshot.lock().await;
        let transport = snapshot
            .application
            .as_ref()
            .map(|e| e.transport_id.clone())
            .filter(|e| !e.is_empty())
            .ok_or(CastError::NotConnected)?;
        let media_session_id = snapshot
            .media
            .as_ref()
            .map(|e| e.media_session_id)
            .ok_or(CastError::NotConnected)?;

        Ok((transport, media_session_id))
    }

    /// Drains the messages of the device until the token is cancelled or the channel
    /// read fails. Runs on its own thread, as receiving blocks.
    fn run_reader(
        inner: Arc<InnerCastSession>,
        device: Arc<CastDevice<'static>>,
        cancel: CancellationToken,
    ) {
        while !cancel.is_cancelled() {
            match device.receive() {
                Ok(message) => inner.handle_message(&device, message),
                Err(e) => {
                    debug!("Cast channel read ended, {}", e);
                    break;
                }
            }
        }

        debug!("Cast channel reader has been stopped");
    }

    fn handle_message(&self, device: &CastDevice<'static>, message: ChannelMessage) {
        match message {
            ChannelMessage::Heartbeat(response) => {
                if matches!(response, HeartbeatResponse::Ping) {
                    let _ = device.heartbeat.pong();
                }
            }
            ChannelMessage::Receiver(ReceiverResponse::Status(status)) => {
                self.dispatch(CastEvent::ReceiverStatus {
                    applications: status.applications.iter().map(Application::from).collect(),
                    volume: Some(Volume::from(&status.volume)),
                });
            }
            ChannelMessage::Media(MediaResponse::Status(status)) => {
                self.dispatch(CastEvent::MediaStatus {
                    entries: status.entries.iter().map(MediaStatusEntry::from).collect(),
                });
            }
            ChannelMessage::Connection(ConnectionResponse::Close) => {
                self.dispatch(CastEvent::Close)
            }
            _ => {}
        }
    }

    fn dispatch(&self, event: CastEvent) {
        trace!("Received Cast device event {:?}", event);
        let funcs = self
            .message_funcs
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for func in funcs.iter() {
            func(&event);
        }
    }

    async fn disconnect(&self) {
        self.reader_token.lock().await.cancel();
        let _ = self.device.lock().await.take();
        *self.connected_transport.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use protobuf::{EnumOrUnknown, Message};
    use rust_cast::cast::cast_channel;
    use rust_cast::cast::cast_channel::cast_message::{PayloadType, ProtocolVersion};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio_rustls::rustls;
    use tokio_rustls::rustls::pki_types::PrivateKeyDer;
    use tokio_rustls::TlsAcceptor;

    use castsponsorskip_core::init_logger;

    use super::*;

    const MEDIA_STATUS_PAYLOAD: &str = r#"
    {
        "requestId": 1,
        "type": "MEDIA_STATUS",
        "status": [
            {
                "mediaSessionId": 1,
                "playerState": "PLAYING",
                "playbackRate": 1.0,
                "currentTime": 54.0,
                "supportedMediaCommands": 2300
            }
        ]
    }
    "#;

    /// A minimal Cast receiver that pushes a media status once a client connects.
    struct TestReceiver {
        addr: SocketAddr,
        cancel: CancellationToken,
    }

    impl TestReceiver {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("expected a TCP address to be bound");
            let addr = listener.local_addr().expect("expected a valid socket");
            let cert = rcgen::generate_simple_self_signed([]).unwrap();
            let cancel = CancellationToken::new();

            let config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(
                    vec![cert.cert.der().clone()],
                    PrivateKeyDer::try_from(cert.signing_key.serialize_der()).unwrap(),
                )
                .unwrap();
            let acceptor = TlsAcceptor::from(Arc::new(config));

            let thread_cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = thread_cancel.cancelled() => break,
                        result = listener.accept() => {
                            if let Ok((stream, _)) = result {
                                if let Ok(stream) = acceptor.accept(stream).await {
                                    tokio::spawn(Self::handle_connection(stream));
                                }
                            }
                        }
                    }
                }
            });

            Self { addr, cancel }
        }

        async fn handle_connection(mut stream: tokio_rustls::server::TlsStream<TcpStream>) {
            let mut pushed = false;
            loop {
                let mut len_buf = [0u8; 4];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    break;
                }
                let len = u32::from_be_bytes(len_buf) as usize;
                let mut buf = vec![0u8; len];
                if stream.read_exact(&mut buf).await.is_err() {
                    break;
                }

                let message = cast_channel::CastMessage::parse_from_bytes(&buf).unwrap();
                if !pushed {
                    // push an unsolicited media status once the virtual connection opens
                    let push = cast_channel::CastMessage {
                        protocol_version: Some(EnumOrUnknown::new(ProtocolVersion::CASTV2_1_0)),
                        source_id: Some(DEFAULT_RECEIVER.to_string()),
                        destination_id: message.source_id.clone(),
                        namespace: Some(NAMESPACE_MEDIA.to_string()),
                        payload_type: Some(EnumOrUnknown::new(PayloadType::STRING)),
                        payload_utf8: Some(MEDIA_STATUS_PAYLOAD.to_string()),
                        payload_binary: None,
                        continued: None,
                        remaining_length: None,
                        special_fields: Default::default(),
                    };
                    let bytes = push.write_to_bytes().unwrap();
                    if stream
                        .write_all(&(bytes.len() as u32).to_be_bytes())
                        .await
                        .is_err()
                        || stream.write_all(&bytes).await.is_err()
                    {
                        break;
                    }
                    pushed = true;
                }
            }
        }
    }

    impl Drop for TestReceiver {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_forwards_media_status_messages() {
        init_logger!();
        let receiver = TestReceiver::start().await;
        let session = DefaultCastSession::builder().build();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session
            .add_message_func(Box::new(move |event| {
                let _ = tx.send(event.clone());
            }))
            .await;

        session
            .start(IpAddr::V4(Ipv4Addr::LOCALHOST), receiver.addr.port())
            .await
            .unwrap();

        let event = time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("expected a message to have been forwarded")
            .unwrap();
        match event {
            CastEvent::MediaStatus { entries } => {
                assert_eq!(1, entries[0].media_session_id);
                assert_eq!("PLAYING", entries[0].player_state);
                assert_eq!(54.0, entries[0].current_time);
            }
            event => panic!("expected a media status event, got {:?} instead", event),
        }

        session.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_commands_require_connection() {
        init_logger!();
        let session = DefaultCastSession::builder().build();

        assert_eq!(Err(CastError::NotConnected), session.update().await);
        assert_eq!(
            Err(CastError::NotConnected),
            session.seek_to_time(10.0).await
        );
        assert_eq!(Err(CastError::NotConnected), session.set_muted(true).await);
        assert_eq!(Err(CastError::NoMediaSkipad), session.skipad().await);
        assert_eq!(StatusSnapshot::default(), session.status().await);
    }

    #[test]
    fn test_builder_defaults() {
        let session = DefaultCastSession::builder()
            .skipad_sleep(Duration::from_millis(250))
            .skipad_retries(240)
            .build();

        assert_eq!(Duration::from_millis(250), session.inner.skipad_sleep);
        assert_eq!(240, session.inner.skipad_retries);

        let session = DefaultCastSession::builder().build();
        assert_eq!(DEFAULT_SKIPAD_SLEEP, session.inner.skipad_sleep);
        assert_eq!(DEFAULT_SKIPAD_RETRIES, session.inner.skipad_retries);
    }
}
