//! The proxy link to the radio host.
//!
//! One byte stream carries the GATT traffic of every device. The transport
//! keeps it alive: a reader task demultiplexes inbound envelopes to
//! per-device inboxes and resolves request acknowledgements, a writer task
//! owns the write half so every envelope goes out whole, and a supervisor
//! probes the link with heartbeats and re-dials it with jittered exponential
//! backoff when it drops.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use am43_metrics::metric_defs;
use ble_proxy_protocol::{DeviceAddress, Envelope, EnvelopeCodec, Message};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{BackoffConfig, ControlConfig, HeartbeatConfig};
use crate::error::TransportError;

/// Envelopes queued for the writer task.
const OUTBOUND_QUEUE: usize = 256;

/// Read buffer size.
const READ_BUFFER: usize = 4096;

// ============================================================================
// Connectors
// ============================================================================

/// A bidirectional byte stream to the radio host.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> ProxyStream for T {}

/// A boxed [`ProxyStream`].
pub type BoxedStream = Box<dyn ProxyStream>;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<BoxedStream>> + Send>>;

/// Opens byte streams to the radio host.
///
/// Called once at start-up and again for every reconnect.
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream.
    fn connect(&self) -> ConnectFuture;

    /// Where the connector dials, for logs and errors.
    fn endpoint(&self) -> String;
}

/// Dials the radio host over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
}

impl TcpConnector {
    /// Create a connector for `host:port`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        TcpConnector {
            endpoint: endpoint.into(),
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> ConnectFuture {
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let stream = TcpStream::connect(endpoint.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential reconnect backoff with jitter.
///
/// The ceiling for attempt `n` is `base * 2^n`, capped. The delay is drawn
/// uniformly from the upper half of the ceiling.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    rng: ChaCha8Rng,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Backoff {
            base: config.base(),
            cap: config.cap(),
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(config: &BackoffConfig, seed: u64) -> Self {
        Backoff {
            base: config.base(),
            cap: config.cap(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Largest delay for `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before `attempt`.
    pub fn delay(&mut self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        self.rng.gen_range(ceiling / 2..=ceiling)
    }
}

// ============================================================================
// Events and state
// ============================================================================

/// Something that happened on the link that concerns one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The device notified the control characteristic.
    Notification(Vec<u8>),
    /// The host reports the device's BLE connection dropped.
    DeviceDisconnected,
}

/// State of the proxy link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Connected to the radio host.
    Connected,
    /// Waiting to re-dial.
    Reconnecting,
    /// Stopped for good.
    Shutdown,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Connected => write!(f, "connected"),
            LinkState::Reconnecting => write!(f, "reconnecting"),
            LinkState::Shutdown => write!(f, "shutdown"),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

type AckSender = oneshot::Sender<Result<(), TransportError>>;

struct LinkShared {
    endpoint: String,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    ack_timeout: Duration,
    heartbeat: HeartbeatConfig,
    backoff: BackoffConfig,
    auto_reconnect: bool,
    inbox_capacity: usize,
    inboxes: Mutex<HashMap<DeviceAddress, mpsc::Sender<LinkEvent>>>,
    pending: Mutex<HashMap<u16, AckSender>>,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    next_seq: AtomicU16,
    state: watch::Sender<LinkState>,
    losses: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Multiplexed link to the radio host.
///
/// Cheap to clone; every clone drives the same link.
#[derive(Clone)]
pub struct ProxyTransport {
    shared: Arc<LinkShared>,
}

impl ProxyTransport {
    /// Dial the radio host and start the link tasks.
    ///
    /// Fails with [`TransportError::Unreachable`] if the first connection
    /// cannot be made; later drops are handled by reconnecting.
    pub async fn start(
        connector: Arc<dyn Connector>,
        config: &ControlConfig,
    ) -> Result<ProxyTransport, TransportError> {
        let endpoint = connector.endpoint();
        let stream = match tokio::time::timeout(config.connect_timeout(), connector.connect()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Unreachable {
                    endpoint,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::Unreachable {
                    endpoint,
                    reason: format!("no connection within {:?}", config.connect_timeout()),
                })
            }
        };
        info!(%endpoint, "proxy link connected");

        let (state, _) = watch::channel(LinkState::Connected);
        let (losses, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(LinkShared {
            endpoint,
            connector,
            connect_timeout: config.connect_timeout(),
            ack_timeout: config.ack_timeout(),
            heartbeat: config.heartbeat.clone(),
            backoff: config.backoff.clone(),
            auto_reconnect: config.auto_reconnect,
            inbox_capacity: config.inbox_capacity.max(1),
            inboxes: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            next_seq: AtomicU16::new(1),
            state,
            losses,
            shutdown,
            supervisor: Mutex::new(None),
        });

        let link = Link::start(&shared, stream);
        let supervisor = tokio::spawn(supervise(shared.clone(), link));
        *shared.supervisor.lock() = Some(supervisor);
        Ok(ProxyTransport { shared })
    }

    /// Endpoint of the radio host.
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    /// Watch link state changes.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Watch the number of times the link has dropped.
    ///
    /// Every device connection on the host is gone after a drop, so a change
    /// means every session is lost.
    pub fn watch_losses(&self) -> watch::Receiver<u64> {
        self.shared.losses.subscribe()
    }

    /// Open the inbox for `address`, replacing any previous one.
    ///
    /// After shutdown the returned inbox is already closed.
    pub fn register(&self, address: &DeviceAddress) -> mpsc::Receiver<LinkEvent> {
        let (tx, rx) = mpsc::channel(self.shared.inbox_capacity);
        if self.link_state() != LinkState::Shutdown {
            self.shared.inboxes.lock().insert(address.clone(), tx);
        }
        rx
    }

    /// Forget the inbox for `address` once its receiver has been closed.
    pub fn unregister(&self, address: &DeviceAddress) {
        let mut inboxes = self.shared.inboxes.lock();
        if inboxes.get(address).is_some_and(|tx| tx.is_closed()) {
            inboxes.remove(address);
        }
    }

    /// Ask the host to open a BLE connection, waiting up to `timeout`.
    pub async fn connect_device(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.shared
            .request(address, Message::Connect { timeout_ms }, timeout)
            .await
    }

    /// Ask the host to drop the device's BLE connection.
    pub async fn disconnect_device(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        self.shared
            .request(address, Message::Disconnect, self.shared.ack_timeout)
            .await
    }

    /// Enable notifications on `characteristic`.
    pub async fn subscribe(
        &self,
        address: &DeviceAddress,
        characteristic: u16,
    ) -> Result<(), TransportError> {
        self.shared
            .request(address, Message::Subscribe { characteristic }, self.shared.ack_timeout)
            .await
    }

    /// Write `data` to `characteristic`; resolves once the host has performed
    /// the GATT write.
    pub async fn write(
        &self,
        address: &DeviceAddress,
        characteristic: u16,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        let message = Message::Write {
            characteristic,
            with_response: true,
            data,
        };
        self.shared
            .request(address, message, self.shared.ack_timeout)
            .await
    }

    /// Round-trip a ping.
    pub async fn ping(&self) -> Result<(), TransportError> {
        self.shared
            .request(&DeviceAddress::link(), Message::Ping, self.shared.ack_timeout)
            .await
    }

    /// Stop reconnecting and close the link.
    ///
    /// Counts as a final link loss; every inbox is then closed.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        let supervisor = self.shared.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.await {
                warn!("proxy link supervisor failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ProxyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyTransport")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.link_state())
            .finish()
    }
}

impl LinkShared {
    fn next_seq(&self) -> u16 {
        loop {
            // 0 is reserved for host-initiated messages
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }

    async fn request(
        &self,
        address: &DeviceAddress,
        message: Message,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if *self.state.borrow() == LinkState::Shutdown {
            return Err(TransportError::Shutdown);
        }
        let seq = self.next_seq();
        let name = message.name();
        let bytes = Envelope::new(seq, address.clone(), message).encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);
        let outbound = self.outbound.lock().clone();
        let Some(outbound) = outbound else {
            self.pending.lock().remove(&seq);
            return Err(TransportError::LinkDown);
        };
        if outbound.send(bytes).await.is_err() {
            self.pending.lock().remove(&seq);
            return Err(TransportError::LinkDown);
        }
        trace!(%address, seq, message = name, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::LinkDown),
            Err(_) => {
                self.pending.lock().remove(&seq);
                debug!(%address, seq, message = name, "no reply from host");
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        let Envelope {
            seq,
            address,
            message,
        } = envelope;
        match message {
            Message::Ack | Message::Pong => self.resolve(seq, Ok(())),
            Message::Error { code, message } => {
                self.resolve(seq, Err(TransportError::from_host(code, message)))
            }
            Message::Notify { data, .. } => self.deliver(&address, LinkEvent::Notification(data)),
            Message::DeviceDisconnected => self.deliver(&address, LinkEvent::DeviceDisconnected),
            other => debug!(%address, message = other.name(), "ignoring unexpected message from host"),
        }
    }

    fn resolve(&self, seq: u16, result: Result<(), TransportError>) {
        let waiter = self.pending.lock().remove(&seq);
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(seq, "reply for unknown sequence number"),
        }
    }

    fn deliver(&self, address: &DeviceAddress, event: LinkEvent) {
        let inboxes = self.inboxes.lock();
        let Some(tx) = inboxes.get(address) else {
            debug!(%address, "event for unregistered device");
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(%address, "device inbox full, dropping link event"),
            Err(TrySendError::Closed(_)) => debug!(%address, "device inbox closed"),
        }
    }

    fn link_lost(&self) {
        self.outbound.lock().take();
        let pending: Vec<AckSender> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(TransportError::LinkDown));
        }
        self.losses.send_modify(|count| *count += 1);
    }

    fn close(&self) {
        self.state.send_replace(LinkState::Shutdown);
        self.inboxes.lock().clear();
        info!(endpoint = %self.endpoint, "proxy link shut down");
    }
}

// ============================================================================
// Link tasks
// ============================================================================

struct Link {
    reader: JoinHandle<Result<(), TransportError>>,
    writer: JoinHandle<io::Result<()>>,
}

impl Link {
    fn start(shared: &Arc<LinkShared>, stream: BoxedStream) -> Link {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        *shared.outbound.lock() = Some(tx);
        Link {
            reader: tokio::spawn(read_loop(shared.clone(), read_half)),
            writer: tokio::spawn(write_loop(rx, write_half)),
        }
    }

    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(
    shared: Arc<LinkShared>,
    mut reader: ReadHalf<BoxedStream>,
) -> Result<(), TransportError> {
    let mut codec = EnvelopeCodec::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        codec.push(&buf[..n]);
        while let Some(envelope) = codec.decode()? {
            trace!(%envelope, "envelope received");
            shared.dispatch(envelope);
        }
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut writer: WriteHalf<BoxedStream>,
) -> io::Result<()> {
    while let Some(bytes) = rx.recv().await {
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn heartbeat(shared: &LinkShared) -> String {
    let interval = shared.heartbeat.interval();
    if interval.is_zero() {
        return std::future::pending().await;
    }
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        if let Err(e) = shared
            .request(&DeviceAddress::link(), Message::Ping, shared.heartbeat.timeout())
            .await
        {
            return format!("heartbeat failed: {}", e);
        }
        trace!("heartbeat ok");
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn supervise(shared: Arc<LinkShared>, mut link: Link) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut backoff = Backoff::new(&shared.backoff);

    loop {
        let reason = tokio::select! {
            result = &mut link.reader => match result {
                Ok(Ok(())) => "radio host closed the connection".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("reader task failed: {}", e),
            },
            result = &mut link.writer => match result {
                Ok(Ok(())) => "writer stopped".to_string(),
                Ok(Err(e)) => format!("write failed: {}", e),
                Err(e) => format!("writer task failed: {}", e),
            },
            reason = heartbeat(&shared) => reason,
            _ = wait_for_shutdown(&mut shutdown) => {
                link.abort();
                shared.link_lost();
                break;
            }
        };
        link.abort();
        warn!(endpoint = %shared.endpoint, %reason, "proxy link lost");
        shared.link_lost();

        if !shared.auto_reconnect {
            break;
        }
        shared.state.send_replace(LinkState::Reconnecting);
        match reconnect(&shared, &mut backoff, &mut shutdown).await {
            Some(stream) => {
                link = Link::start(&shared, stream);
                shared.state.send_replace(LinkState::Connected);
                metrics::counter!(metric_defs::LINK_RECONNECTS.name).increment(1);
                info!(endpoint = %shared.endpoint, "proxy link restored");
            }
            None => break,
        }
    }

    shared.close();
}

async fn reconnect(
    shared: &LinkShared,
    backoff: &mut Backoff,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<BoxedStream> {
    let mut attempt = 0u32;
    loop {
        let delay = backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(endpoint = %shared.endpoint, attempt, ?delay, "reconnecting");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_for_shutdown(shutdown) => return None,
        }
        let result = tokio::select! {
            result = tokio::time::timeout(shared.connect_timeout, shared.connector.connect()) => result,
            _ = wait_for_shutdown(shutdown) => return None,
        };
        match result {
            Ok(Ok(stream)) => return Some(stream),
            Ok(Err(e)) => warn!(endpoint = %shared.endpoint, attempt, error = %e, "reconnect failed"),
            Err(_) => warn!(endpoint = %shared.endpoint, attempt, "reconnect timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// Hands out pre-made streams, then refuses.
    struct QueueConnector {
        streams: Mutex<Vec<DuplexStream>>,
    }

    impl Connector for QueueConnector {
        fn connect(&self) -> ConnectFuture {
            let stream = self.streams.lock().pop();
            Box::pin(async move {
                match stream {
                    Some(stream) => Ok(Box::new(stream) as BoxedStream),
                    None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
                }
            })
        }

        fn endpoint(&self) -> String {
            "queue".to_string()
        }
    }

    fn connector(streams: Vec<DuplexStream>) -> Arc<dyn Connector> {
        Arc::new(QueueConnector {
            streams: Mutex::new(streams),
        })
    }

    async fn read_envelope(stream: &mut DuplexStream, codec: &mut EnvelopeCodec) -> Envelope {
        let mut buf = [0u8; 512];
        loop {
            if let Some(envelope) = codec.decode().unwrap() {
                return envelope;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed");
            codec.push(&buf[..n]);
        }
    }

    async fn send_envelope(stream: &mut DuplexStream, envelope: Envelope) {
        stream.write_all(&envelope.encode().unwrap()).await.unwrap();
    }

    #[test]
    fn test_backoff_bounds() {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::with_seed(&config, 7);
        assert_eq!(backoff.ceiling(0), Duration::from_secs(1));
        assert_eq!(backoff.ceiling(1), Duration::from_secs(2));
        assert_eq!(backoff.ceiling(4), Duration::from_secs(16));
        assert_eq!(backoff.ceiling(5), Duration::from_secs(30));
        assert_eq!(backoff.ceiling(40), Duration::from_secs(30));

        for attempt in 0..12 {
            let ceiling = backoff.ceiling(attempt);
            for _ in 0..20 {
                let delay = backoff.delay(attempt);
                assert!(delay >= ceiling / 2 && delay <= ceiling, "{delay:?} vs {ceiling:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_start_unreachable() {
        let err = ProxyTransport::start(connector(vec![]), &ControlConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { ref endpoint, .. } if endpoint == "queue"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_acked_and_notify_routed() {
        let (client, mut host) = tokio::io::duplex(4096);
        let transport = ProxyTransport::start(connector(vec![client]), &ControlConfig::default())
            .await
            .unwrap();
        let address: DeviceAddress = "02:AB:CD:EF:01:23".parse().unwrap();
        let mut inbox = transport.register(&address);

        let writer = {
            let transport = transport.clone();
            let address = address.clone();
            tokio::spawn(async move { transport.write(&address, 0xFE51, vec![1, 2, 3]).await })
        };

        let mut codec = EnvelopeCodec::new();
        let request = read_envelope(&mut host, &mut codec).await;
        assert_eq!(request.address, address);
        assert_eq!(
            request.message,
            Message::Write {
                characteristic: 0xFE51,
                with_response: true,
                data: vec![1, 2, 3]
            }
        );
        send_envelope(&mut host, Envelope::new(request.seq, address.clone(), Message::Ack)).await;
        writer.await.unwrap().unwrap();

        let notify = Message::Notify {
            characteristic: 0xFE51,
            data: vec![9, 9],
        };
        send_envelope(&mut host, Envelope::new(0, address.clone(), notify)).await;
        assert_eq!(inbox.recv().await, Some(LinkEvent::Notification(vec![9, 9])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_error_and_ack_timeout() {
        let (client, mut host) = tokio::io::duplex(4096);
        let transport = ProxyTransport::start(connector(vec![client]), &ControlConfig::default())
            .await
            .unwrap();
        let address: DeviceAddress = "AA".parse().unwrap();

        let subscriber = {
            let transport = transport.clone();
            let address = address.clone();
            tokio::spawn(async move { transport.subscribe(&address, 0xFE51).await })
        };
        let mut codec = EnvelopeCodec::new();
        let request = read_envelope(&mut host, &mut codec).await;
        let error = Message::Error {
            code: ble_proxy_protocol::HostErrorCode::NotConnected,
            message: "no link".to_string(),
        };
        send_envelope(&mut host, Envelope::new(request.seq, address.clone(), error)).await;
        let err = subscriber.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));

        // Unanswered requests time out after the ack timeout
        let err = transport.disconnect_device(&address).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(d) if d == Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_drop_reconnects() {
        let (first, first_host) = tokio::io::duplex(4096);
        let (second, _second_host) = tokio::io::duplex(4096);
        let mut config = ControlConfig::default();
        config.heartbeat.interval_ms = 0;
        // Streams are popped from the back
        let transport = ProxyTransport::start(connector(vec![second, first]), &config)
            .await
            .unwrap();
        let address: DeviceAddress = "AA".parse().unwrap();
        let mut inbox = transport.register(&address);
        let mut state = transport.watch_state();
        let mut losses = transport.watch_losses();

        drop(first_host);
        losses.changed().await.unwrap();
        assert_eq!(*losses.borrow_and_update(), 1);
        state.wait_for(|s| *s == LinkState::Reconnecting).await.unwrap();
        state.wait_for(|s| *s == LinkState::Connected).await.unwrap();

        transport.shutdown().await;
        assert_eq!(*losses.borrow(), 2);
        assert_eq!(inbox.recv().await, None);
        assert_eq!(transport.link_state(), LinkState::Shutdown);
        assert!(matches!(transport.ping().await, Err(TransportError::Shutdown)));
    }
}
