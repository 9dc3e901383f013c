//! Per-device command queues.
//!
//! Each device is driven by one task that owns its session, its FIFO of
//! pending commands and the command currently in flight. At most one command
//! per device is on the air; the next one is not dequeued until the previous
//! one has resolved. Devices never wait on each other.
//!
//! A reply is correlated with the in-flight command by code and payload
//! shape. Unanswered attempts are resent after `attempt_timeout`, up to
//! `max_attempts` in total. Frames that answer nothing go to the
//! [`NotificationRouter`].

use std::collections::VecDeque;
use std::sync::Arc;

use am43_metrics::{metric_defs, MetricLabels};
use am43_protocol::{
    interpret, Command, Frame, FrameAssembler, Notification, ProtocolError, Response, CONTROL_CHARACTERISTIC_UUID,
};
use ble_proxy_protocol::DeviceAddress;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{ControlConfig, SubmitPolicy};
use crate::error::ControlError;
use crate::registry::SessionRegistry;
use crate::router::NotificationRouter;
use crate::session::{DeviceSession, SessionState};
use crate::transport::{LinkEvent, LinkState, ProxyTransport};

/// Requests buffered between callers and a device task.
const REQUEST_CHANNEL: usize = 64;

type Reply = oneshot::Sender<Result<Response, ControlError>>;

/// A command waiting in, or travelling through, a device queue.
#[derive(Debug)]
pub struct PendingRequest {
    /// Target device.
    pub address: DeviceAddress,
    /// Command to send.
    pub command: Command,
    /// When the caller submitted it.
    pub submitted_at: Instant,
    /// Attempts made so far.
    pub attempts: u32,
    reply: Option<Reply>,
}

impl PendingRequest {
    fn new(address: DeviceAddress, command: Command, reply: Option<Reply>) -> Self {
        PendingRequest {
            address,
            command,
            submitted_at: Instant::now(),
            attempts: 0,
            reply,
        }
    }

    /// The caller stopped waiting.
    fn is_abandoned(&self) -> bool {
        self.reply.as_ref().is_some_and(|reply| reply.is_closed())
    }

    fn complete(mut self, result: Result<Response, ControlError>) {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        let labels = MetricLabels::new(self.address.as_str()).with_command(self.command.name());
        metrics::counter!(
            metric_defs::COMMANDS_COMPLETED.name,
            &labels.with(&[("outcome", outcome.to_string())])
        )
        .increment(1);

        match self.reply.take() {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!(address = %self.address, command = %self.command, error = %e, "internal command failed");
                }
            }
        }
    }
}

enum DeviceRequest {
    Submit(PendingRequest),
    Open(oneshot::Sender<Result<(), ControlError>>),
    Close(oneshot::Sender<()>),
}

struct InFlight {
    request: PendingRequest,
    wire: Vec<u8>,
    first_sent: Instant,
    deadline: Instant,
}

// ============================================================================
// Device handle
// ============================================================================

/// Handle to one device's task.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    address: DeviceAddress,
    requests: mpsc::Sender<DeviceRequest>,
    state: watch::Receiver<SessionState>,
    config: Arc<ControlConfig>,
}

impl std::fmt::Debug for DeviceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRequest::Submit(request) => write!(f, "Submit({})", request.command),
            DeviceRequest::Open(_) => f.write_str("Open"),
            DeviceRequest::Close(_) => f.write_str("Close"),
        }
    }
}

impl DeviceHandle {
    /// Start the task for `address`.
    pub fn spawn(
        address: DeviceAddress,
        transport: ProxyTransport,
        router: NotificationRouter,
        config: Arc<ControlConfig>,
    ) -> DeviceHandle {
        let session = DeviceSession::new(address.clone());
        let inbox = transport.register(&address);
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL);
        let handle = DeviceHandle {
            address: address.clone(),
            requests: tx,
            state: session.subscribe(),
            config: config.clone(),
        };
        let assembler = FrameAssembler::new(config.checksum);
        let worker = DeviceWorker {
            link: transport.watch_state(),
            losses: transport.watch_losses(),
            address,
            config,
            transport,
            router,
            session,
            requests: rx,
            inbox,
            queue: VecDeque::new(),
            in_flight: None,
            assembler,
            establishing: None,
            open_waiters: Vec::new(),
            keep_open: false,
            lost_while_opening: None,
            not_ready_since: None,
        };
        tokio::spawn(worker.run());
        handle
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Whether the device task has exited.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Queue `command` and wait for its result.
    ///
    /// A command that waits longer than the request timeout for the session
    /// to become Ready fails with `DeviceUnreachable`. Once sent, it resolves
    /// within its attempt budget.
    pub async fn submit(&self, command: Command) -> Result<Response, ControlError> {
        if self.config.submit_policy == SubmitPolicy::FailFast && !self.state().is_ready() {
            return Err(ControlError::unreachable(&self.address, "session not ready"));
        }
        let labels = MetricLabels::new(self.address.as_str()).with_command(command.name());
        metrics::counter!(metric_defs::COMMANDS_SUBMITTED.name, &labels.to_labels()).increment(1);

        let (tx, rx) = oneshot::channel();
        let request = PendingRequest::new(self.address.clone(), command, Some(tx));
        self.requests
            .send(DeviceRequest::Submit(request))
            .await
            .map_err(|_| self.closed())?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.closed()),
        }
    }

    /// Open the session if it is not Ready, and wait until it is.
    pub async fn open(&self) -> Result<(), ControlError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(DeviceRequest::Open(tx))
            .await
            .map_err(|_| self.closed())?;
        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed()),
            Err(_) => Err(ControlError::unreachable(
                &self.address,
                "session not ready within the request timeout",
            )),
        }
    }

    /// Close the session, failing queued commands, and stop the task.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(DeviceRequest::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    fn closed(&self) -> ControlError {
        ControlError::unreachable(&self.address, "session closed")
    }
}

// ============================================================================
// Device task
// ============================================================================

struct DeviceWorker {
    address: DeviceAddress,
    config: Arc<ControlConfig>,
    transport: ProxyTransport,
    router: NotificationRouter,
    session: DeviceSession,
    requests: mpsc::Receiver<DeviceRequest>,
    inbox: mpsc::Receiver<LinkEvent>,
    queue: VecDeque<PendingRequest>,
    in_flight: Option<InFlight>,
    assembler: FrameAssembler,
    establishing: Option<JoinHandle<Result<(), ControlError>>>,
    open_waiters: Vec<oneshot::Sender<Result<(), ControlError>>>,
    // Re-open the session after it drops
    keep_open: bool,
    link: watch::Receiver<LinkState>,
    // Bumped by the transport each time the proxy link drops
    losses: watch::Receiver<u64>,
    // The device went away before the opening session was handed over
    lost_while_opening: Option<String>,
    // Queued commands wait at most the request timeout from here
    not_ready_since: Option<Instant>,
}

impl DeviceWorker {
    async fn run(mut self) {
        debug!(address = %self.address, "device task started");
        loop {
            self.maybe_establish();
            // Wait for on_established so a login goes out first
            let idle = self.in_flight.is_none() && self.establishing.is_none();
            if idle && self.session.state().is_ready() {
                self.start_next().await;
            }
            self.track_readiness();

            let deadline = self.in_flight.as_ref().map(|flight| flight.deadline);
            let expiry = self.queue_expiry();
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(DeviceRequest::Submit(request)) => self.enqueue(request),
                    Some(DeviceRequest::Open(reply)) => self.request_open(reply),
                    Some(DeviceRequest::Close(reply)) => {
                        self.close("session closed").await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.close("all handles dropped").await;
                        break;
                    }
                },
                event = self.inbox.recv() => match event {
                    Some(event) => self.on_link_event(event),
                    None => {
                        let address = self.address.clone();
                        self.abandon_all(|| ControlError::unreachable(&address, "transport shut down"));
                        self.session.reset("transport shut down");
                        self.router.remove(&self.address);
                        break;
                    }
                },
                Ok(()) = self.losses.changed() => self.session_lost("proxy link down"),
                Ok(()) = self.link.changed() => {
                    let state = *self.link.borrow_and_update();
                    debug!(address = %self.address, %state, "proxy link state changed");
                }
                result = join_establishing(&mut self.establishing) => self.on_established(result),
                _ = sleep_until(deadline) => self.on_attempt_timeout().await,
                _ = sleep_until(expiry) => self.expire_queued(),
            }
        }
        debug!(address = %self.address, "device task stopped");
    }

    fn maybe_establish(&mut self) {
        let wanted = self.keep_open || !self.queue.is_empty() || !self.open_waiters.is_empty();
        if !wanted
            || !self.link_up()
            || self.establishing.is_some()
            || self.session.state() != SessionState::Disconnected
        {
            return;
        }
        debug!(address = %self.address, "opening session");
        self.lost_while_opening = None;
        let session = self.session.clone();
        let transport = self.transport.clone();
        let config = self.config.clone();
        self.establishing = Some(tokio::spawn(async move {
            session.establish(&transport, &config).await
        }));
    }

    fn link_up(&self) -> bool {
        *self.link.borrow() == LinkState::Connected
    }

    fn on_established(&mut self, result: Result<Result<(), ControlError>, JoinError>) {
        let result = result
            .unwrap_or_else(|e| {
                Err(ControlError::unreachable(
                    &self.address,
                    format!("session task failed: {}", e),
                ))
            })
            .and_then(|()| self.confirm_ready());
        match result {
            Ok(()) => {
                self.keep_open = true;
                // Validated when the controller was built
                if let Ok(Some(pin)) = self.config.pin() {
                    let login = PendingRequest::new(self.address.clone(), Command::Login(pin), None);
                    self.queue.push_front(login);
                }
                for waiter in self.open_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "session failed to open");
                self.keep_open = false;
                for waiter in self.open_waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
                // With the link down, queued commands wait for it to return
                if self.link_up() {
                    for request in self.queue.drain(..) {
                        request.complete(Err(e.clone()));
                    }
                }
            }
        }
    }

    /// The session came up, but it may have been lost before we got here.
    fn confirm_ready(&mut self) -> Result<(), ControlError> {
        if let Some(reason) = self.lost_while_opening.take() {
            warn!(address = %self.address, %reason, "session lost while opening");
            self.session.reset(&reason);
            self.assembler.clear();
            return Err(ControlError::unreachable(&self.address, reason));
        }
        if !self.session.state().is_ready() {
            return Err(ControlError::unreachable(&self.address, "session lost while opening"));
        }
        Ok(())
    }

    fn track_readiness(&mut self) {
        if self.session.state().is_ready() {
            self.not_ready_since = None;
        } else if self.not_ready_since.is_none() {
            self.not_ready_since = Some(Instant::now());
        }
    }

    /// When the oldest caller-submitted command stops waiting for Ready.
    fn queue_expiry(&self) -> Option<Instant> {
        let since = self.not_ready_since?;
        self.queue
            .iter()
            .filter(|request| request.reply.is_some())
            .map(|request| request.submitted_at.max(since))
            .min()
            .map(|start| start + self.config.request_timeout())
    }

    fn expire_queued(&mut self) {
        if self.session.state().is_ready() {
            self.not_ready_since = None;
            return;
        }
        let Some(since) = self.not_ready_since else {
            return;
        };
        let now = Instant::now();
        let timeout = self.config.request_timeout();
        let (expired, kept): (VecDeque<_>, VecDeque<_>) = self.queue.drain(..).partition(|request| {
            request.reply.is_some() && request.submitted_at.max(since) + timeout <= now
        });
        self.queue = kept;
        for request in expired {
            warn!(address = %self.address, command = %request.command, "session not ready in time");
            request.complete(Err(ControlError::unreachable(
                &self.address,
                "session not ready within the request timeout",
            )));
        }
    }

    fn enqueue(&mut self, request: PendingRequest) {
        if self.config.submit_policy == SubmitPolicy::FailFast && !self.session.state().is_ready() {
            request.complete(Err(ControlError::unreachable(&self.address, "session not ready")));
            return;
        }
        trace!(address = %self.address, command = %request.command, queued = self.queue.len(), "command queued");
        self.queue.push_back(request);
    }

    fn request_open(&mut self, reply: oneshot::Sender<Result<(), ControlError>>) {
        if self.session.state().is_ready() {
            let _ = reply.send(Ok(()));
        } else {
            self.open_waiters.push(reply);
        }
    }

    async fn start_next(&mut self) {
        while let Some(mut request) = self.queue.pop_front() {
            if request.is_abandoned() {
                debug!(address = %self.address, command = %request.command, "dropping abandoned command");
                continue;
            }
            request.attempts = 1;
            let wire = request.command.encode().to_wire(self.config.checksum);
            let now = Instant::now();
            debug!(address = %self.address, command = %request.command, "sending command");
            self.in_flight = Some(InFlight {
                request,
                wire,
                first_sent: now,
                deadline: now + self.config.attempt_timeout(),
            });
            self.send_in_flight().await;
            return;
        }
    }

    async fn send_in_flight(&mut self) {
        let Some(flight) = self.in_flight.as_ref() else {
            return;
        };
        let wire = flight.wire.clone();
        match self
            .transport
            .write(&self.address, CONTROL_CHARACTERISTIC_UUID, wire)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_session_loss() => self.session_lost(&e.to_string()),
            Err(e) => {
                // Counts as a failed attempt
                warn!(address = %self.address, error = %e, "command write failed");
            }
        }
    }

    async fn on_attempt_timeout(&mut self) {
        let max_attempts = self.config.max_attempts;
        let exhausted = match self.in_flight.as_ref() {
            Some(flight) => flight.request.attempts >= max_attempts,
            None => return,
        };

        if exhausted {
            if let Some(flight) = self.in_flight.take() {
                let command = flight.request.command;
                warn!(address = %self.address, %command, attempts = flight.request.attempts, "command timed out");
                let labels = MetricLabels::new(self.address.as_str()).with_command(command.name());
                metrics::counter!(metric_defs::COMMAND_TIMEOUTS.name, &labels.to_labels()).increment(1);
                let attempts = flight.request.attempts;
                flight.request.complete(Err(ControlError::CommandTimeout {
                    command: command.name(),
                    attempts,
                }));
            }
            return;
        }

        let attempt_timeout = self.config.attempt_timeout();
        if let Some(flight) = self.in_flight.as_mut() {
            flight.request.attempts += 1;
            flight.deadline = Instant::now() + attempt_timeout;
            let command = flight.request.command;
            warn!(address = %self.address, %command, attempt = flight.request.attempts, "no reply, resending");
            let labels = MetricLabels::new(self.address.as_str()).with_command(command.name());
            metrics::counter!(metric_defs::COMMAND_RETRIES.name, &labels.to_labels()).increment(1);
        }
        self.send_in_flight().await;
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Notification(data) => self.on_notification(&data),
            LinkEvent::DeviceDisconnected => self.session_lost("device disconnected"),
        }
    }

    fn on_notification(&mut self, data: &[u8]) {
        let stale = self.assembler.push(data);
        if stale > 0 {
            debug!(address = %self.address, bytes = stale, "dropping incomplete frame");
            self.count_dropped("truncated");
        }
        while let Some(result) = self.assembler.next_frame() {
            match result {
                Ok(frame) => self.on_frame(&frame),
                Err(e) => {
                    let reason = if e.is_corruption() { "checksum" } else { "malformed" };
                    debug!(address = %self.address, error = %e, "dropping corrupt frame");
                    self.count_dropped(reason);
                }
            }
        }
    }

    fn count_dropped(&self, reason: &str) {
        let labels = MetricLabels::new(self.address.as_str());
        metrics::counter!(
            metric_defs::FRAMES_DROPPED.name,
            &labels.with(&[("reason", reason.to_string())])
        )
        .increment(1);
    }

    fn on_frame(&mut self, frame: &Frame) {
        let answers_in_flight = self
            .in_flight
            .as_ref()
            .is_some_and(|flight| flight.request.command.accepts(frame));
        if answers_in_flight {
            if let Some(flight) = self.in_flight.take() {
                self.finish(flight, frame);
            }
            return;
        }

        match Notification::from_frame(frame) {
            Ok(Some(notification)) => {
                let observers = self.router.publish(&self.address, notification);
                trace!(address = %self.address, ?notification, observers, "notification");
            }
            Ok(None) => debug!(address = %self.address, code = frame.code(), "ignoring unsolicited frame"),
            Err(e) => {
                warn!(address = %self.address, error = %e, "dropping frame");
                self.count_dropped("unknown_command");
            }
        }
    }

    fn finish(&self, flight: InFlight, frame: &Frame) {
        let command = flight.request.command;
        let result = match interpret(frame, &command) {
            Ok(response) => Ok(response),
            Err(ProtocolError::Rejected(_)) => Err(ControlError::CommandRejected {
                command: command.name(),
            }),
            Err(e) => Err(ControlError::UnexpectedResponse(e.to_string())),
        };
        let labels = MetricLabels::new(self.address.as_str()).with_command(command.name());
        metrics::histogram!(metric_defs::COMMAND_LATENCY.name, &labels.to_labels())
            .record(flight.first_sent.elapsed().as_secs_f64());
        debug!(address = %self.address, %command, attempts = flight.request.attempts, ok = result.is_ok(), "command resolved");
        flight.request.complete(result);
    }

    /// The session dropped underneath us; fail the in-flight command at once.
    fn session_lost(&mut self, reason: &str) {
        // Handled once the opening task reports back
        if self.establishing.is_some() {
            self.lost_while_opening = Some(reason.to_string());
            return;
        }
        if self.session.state() == SessionState::Disconnected {
            return;
        }
        warn!(address = %self.address, %reason, "session lost");
        self.session.reset(reason);
        self.assembler.clear();
        if let Some(flight) = self.in_flight.take() {
            flight
                .request
                .complete(Err(ControlError::unreachable(&self.address, reason)));
        }
    }

    fn abandon_all(&mut self, error: impl Fn() -> ControlError) {
        if let Some(flight) = self.in_flight.take() {
            flight.request.complete(Err(error()));
        }
        for request in self.queue.drain(..) {
            request.complete(Err(error()));
        }
        for waiter in self.open_waiters.drain(..) {
            let _ = waiter.send(Err(error()));
        }
    }

    async fn close(&mut self, reason: &str) {
        if let Some(task) = self.establishing.take() {
            task.abort();
            let _ = task.await;
        }
        self.keep_open = false;
        let address = self.address.clone();
        self.abandon_all(|| ControlError::unreachable(&address, reason));

        let state = self.session.state();
        if state != SessionState::Disconnected {
            let _ = self.session.transition(SessionState::Closing);
            if self.link_up() {
                if let Err(e) = self.transport.disconnect_device(&self.address).await {
                    debug!(address = %self.address, error = %e, "disconnect failed");
                }
            }
            if self.session.transition(SessionState::Disconnected).is_err() {
                self.session.reset(reason);
            }
        }

        self.router.remove(&self.address);
        self.inbox.close();
        self.transport.unregister(&self.address);
        info!(address = %self.address, %reason, "session closed");
    }
}

async fn join_establishing(
    task: &mut Option<JoinHandle<Result<(), ControlError>>>,
) -> Result<Result<(), ControlError>, JoinError> {
    let result = match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    };
    *task = None;
    result
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes commands to per-device tasks, creating them on first use.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    transport: ProxyTransport,
    router: NotificationRouter,
    registry: Arc<SessionRegistry>,
    config: Arc<ControlConfig>,
}

impl CommandDispatcher {
    pub fn new(transport: ProxyTransport, config: Arc<ControlConfig>) -> Self {
        CommandDispatcher {
            router: NotificationRouter::new(config.observer_capacity),
            registry: Arc::new(SessionRegistry::new()),
            transport,
            config,
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn transport(&self) -> &ProxyTransport {
        &self.transport
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The task for `address`, started if needed.
    pub fn handle(&self, address: &DeviceAddress) -> DeviceHandle {
        self.registry.get_or_insert_with(address, || {
            DeviceHandle::spawn(
                address.clone(),
                self.transport.clone(),
                self.router.clone(),
                self.config.clone(),
            )
        })
    }

    /// Submit `command` to `address` and wait for the result.
    pub async fn submit(
        &self,
        address: &DeviceAddress,
        command: Command,
    ) -> Result<Response, ControlError> {
        if self.transport.link_state() == LinkState::Shutdown {
            return Err(ControlError::Shutdown);
        }
        self.handle(address).submit(command).await
    }

    /// Open the session for `address`.
    pub async fn open(&self, address: &DeviceAddress) -> Result<(), ControlError> {
        if self.transport.link_state() == LinkState::Shutdown {
            return Err(ControlError::Shutdown);
        }
        self.handle(address).open().await
    }

    /// Close the session for `address`, if any.
    pub async fn close(&self, address: &DeviceAddress) {
        if let Some(handle) = self.registry.remove(address) {
            handle.close().await;
        }
    }

    /// Close every session.
    pub async fn close_all(&self) {
        for handle in self.registry.drain() {
            handle.close().await;
        }
    }

    /// Session state for `address`; Disconnected when there is no session.
    pub fn state(&self, address: &DeviceAddress) -> SessionState {
        self.registry
            .get(address)
            .map_or(SessionState::Disconnected, |handle| handle.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abandoned_request_detected() {
        let address: DeviceAddress = "AA".parse().unwrap();
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest::new(address.clone(), Command::Stop, Some(tx));
        assert!(!request.is_abandoned());
        drop(rx);
        assert!(request.is_abandoned());

        let internal = PendingRequest::new(address, Command::GetBattery, None);
        assert!(!internal.is_abandoned());
    }

    #[tokio::test]
    async fn test_complete_delivers_result() {
        let address: DeviceAddress = "AA".parse().unwrap();
        let (tx, rx) = oneshot::channel();
        PendingRequest::new(address, Command::Stop, Some(tx)).complete(Ok(Response::Ack));
        assert!(matches!(rx.await, Ok(Ok(Response::Ack))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_none_never_fires() {
        let fired = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            sleep_until(None),
        )
        .await;
        assert!(fired.is_err());
    }
}
