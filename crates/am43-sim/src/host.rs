//! A simulated radio host.
//!
//! Speaks the proxy protocol on any byte stream and relays GATT traffic to
//! in-process [`SimMotor`]s. Failure modes are switched per device with
//! [`Behavior`].

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use am43_protocol::{
    position_reply, status_reply, Checksum, Frame, FrameAssembler, CONTROL_CHARACTERISTIC_UUID,
};
use ble_proxy_protocol::{DeviceAddress, Envelope, EnvelopeCodec, EnvelopeError, HostErrorCode, Message};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::motor::SimMotor;

/// In-memory stream buffer size.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Per-device failure injection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Behavior {
    /// Accept writes but never reply.
    pub silent: bool,
    /// Swallow this many replies, then answer normally.
    pub drop_replies: u32,
    /// Send this many replies with a broken checksum.
    pub corrupt_replies: u32,
    /// Send only the first half of this many replies.
    pub truncate_replies: u32,
    /// Drop the BLE connection right after acking this many subscribes.
    pub drop_after_subscribe: u32,
    /// Fail every BLE connect.
    pub refuse_connect: bool,
    /// Answer every command with an ERROR status.
    pub reject_commands: bool,
    /// Chance of losing each reply, 0.0 to 1.0.
    pub loss_probability: f64,
    /// Push a position notification after every move.
    pub notify_moves: bool,
}

/// Counters for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// BLE connects accepted.
    pub connects: u32,
    /// Raw characteristic writes, in order.
    pub writes: Vec<Vec<u8>>,
    /// When each write arrived.
    pub write_times: Vec<Instant>,
    /// Command frames the motor executed.
    pub commands: u32,
    /// Replies dropped by [`Behavior`].
    pub dropped_replies: u32,
}

struct SimDevice {
    motor: SimMotor,
    behavior: Behavior,
    assembler: FrameAssembler,
    // Connection that holds the BLE link
    owner: Option<u64>,
    subscribed: bool,
    stats: DeviceStats,
}

impl SimDevice {
    fn release(&mut self) {
        self.owner = None;
        self.subscribed = false;
        self.assembler.clear();
        self.motor.on_disconnect();
    }
}

struct HostState {
    devices: HashMap<DeviceAddress, SimDevice>,
    connections: HashMap<u64, mpsc::UnboundedSender<Envelope>>,
    accepting: bool,
    answer_pings: bool,
    rng: ChaCha8Rng,
}

struct HostInner {
    checksum: Checksum,
    state: Mutex<HostState>,
    kill: broadcast::Sender<()>,
    next_connection: AtomicU64,
}

/// The simulated host. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimHost {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for SimHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SimHost")
            .field("checksum", &self.inner.checksum)
            .field("devices", &state.devices.len())
            .field("connections", &state.connections.len())
            .finish()
    }
}

impl SimHost {
    pub fn new(checksum: Checksum) -> Self {
        Self::with_seed(checksum, 0)
    }

    /// Host whose reply loss is drawn from a seeded generator.
    pub fn with_seed(checksum: Checksum, seed: u64) -> Self {
        let (kill, _) = broadcast::channel(1);
        SimHost {
            inner: Arc::new(HostInner {
                checksum,
                state: Mutex::new(HostState {
                    devices: HashMap::new(),
                    connections: HashMap::new(),
                    accepting: true,
                    answer_pings: true,
                    rng: ChaCha8Rng::seed_from_u64(seed),
                }),
                kill,
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    pub fn checksum(&self) -> Checksum {
        self.inner.checksum
    }

    /// Make `motor` reachable at `address`, replacing any previous one.
    pub fn add_device(&self, address: DeviceAddress, motor: SimMotor) {
        let device = SimDevice {
            motor,
            behavior: Behavior::default(),
            assembler: FrameAssembler::new(self.inner.checksum),
            owner: None,
            subscribed: false,
            stats: DeviceStats::default(),
        };
        self.inner.state.lock().devices.insert(address, device);
    }

    pub fn set_behavior(&self, address: &DeviceAddress, behavior: Behavior) {
        self.update_behavior(address, |b| *b = behavior);
    }

    pub fn update_behavior(&self, address: &DeviceAddress, f: impl FnOnce(&mut Behavior)) {
        if let Some(device) = self.inner.state.lock().devices.get_mut(address) {
            f(&mut device.behavior);
        }
    }

    /// Snapshot of the motor at `address`.
    pub fn motor(&self, address: &DeviceAddress) -> Option<SimMotor> {
        self.inner
            .state
            .lock()
            .devices
            .get(address)
            .map(|device| device.motor.clone())
    }

    pub fn update_motor(&self, address: &DeviceAddress, f: impl FnOnce(&mut SimMotor)) {
        if let Some(device) = self.inner.state.lock().devices.get_mut(address) {
            f(&mut device.motor);
        }
    }

    pub fn stats(&self, address: &DeviceAddress) -> Option<DeviceStats> {
        self.inner
            .state
            .lock()
            .devices
            .get(address)
            .map(|device| device.stats.clone())
    }

    /// Characteristic writes received for `address`.
    pub fn write_count(&self, address: &DeviceAddress) -> usize {
        self.stats(address).map_or(0, |stats| stats.writes.len())
    }

    /// BLE connects accepted for `address`.
    pub fn connect_count(&self, address: &DeviceAddress) -> u32 {
        self.stats(address).map_or(0, |stats| stats.connects)
    }

    /// Whether `address` has a BLE connection.
    pub fn is_connected(&self, address: &DeviceAddress) -> bool {
        self.inner
            .state
            .lock()
            .devices
            .get(address)
            .is_some_and(|device| device.owner.is_some())
    }

    /// Open proxy connections.
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Push an unsolicited frame from `address`.
    ///
    /// Returns false when the device is not connected and subscribed.
    pub fn notify(&self, address: &DeviceAddress, frame: &Frame) -> bool {
        let state = self.inner.state.lock();
        let Some(device) = state.devices.get(address) else {
            return false;
        };
        let Some(owner) = device.owner.filter(|_| device.subscribed) else {
            return false;
        };
        let data = frame.encode(self.inner.checksum);
        let envelope = Envelope::new(0, address.clone(), self.notify_message(data));
        state
            .connections
            .get(&owner)
            .is_some_and(|tx| tx.send(envelope).is_ok())
    }

    /// Drop the BLE connection of `address` and tell its client.
    pub fn disconnect_device(&self, address: &DeviceAddress) {
        let mut state = self.inner.state.lock();
        let owner = match state.devices.get_mut(address) {
            Some(device) => {
                let owner = device.owner;
                device.release();
                owner
            }
            None => None,
        };
        if let Some(tx) = owner.and_then(|owner| state.connections.get(&owner)) {
            let _ = tx.send(Envelope::new(0, address.clone(), Message::DeviceDisconnected));
        }
        info!(%address, "device disconnected");
    }

    /// Close every proxy connection.
    pub fn drop_links(&self) {
        let _ = self.inner.kill.send(());
        info!("dropping all proxy links");
    }

    /// Refuse new proxy connections while false.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.state.lock().accepting = accepting;
    }

    /// Stop answering pings while false.
    pub fn set_answer_pings(&self, answer: bool) {
        self.inner.state.lock().answer_pings = answer;
    }

    /// Open an in-memory proxy connection served by this host.
    pub fn connect(&self) -> io::Result<DuplexStream> {
        if !self.inner.state.lock().accepting {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "simulated host not accepting connections",
            ));
        }
        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        let host = self.clone();
        tokio::spawn(async move {
            if let Err(e) = host.serve(server).await {
                debug!(error = %e, "proxy connection ended with error");
            }
        });
        Ok(client)
    }

    /// Serve one proxy connection until the client hangs up or the link is
    /// dropped.
    pub async fn serve<S>(self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let (tx, mut outbound) = mpsc::unbounded_channel();
        let mut kill = self.inner.kill.subscribe();
        self.inner.state.lock().connections.insert(id, tx.clone());
        debug!(connection = id, "proxy connection opened");

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut codec = EnvelopeCodec::new();
        let mut buf = vec![0u8; 4096];

        let result = loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        codec.push(&buf[..n]);
                        if let Err(e) = self.drain(id, &mut codec, &tx) {
                            break Err(io::Error::new(io::ErrorKind::InvalidData, e));
                        }
                    }
                    Err(e) => break Err(e),
                },
                Some(envelope) = outbound.recv() => {
                    let bytes = match envelope.encode() {
                        Ok(bytes) => bytes,
                        Err(e) => break Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                    };
                    if let Err(e) = writer.write_all(&bytes).await {
                        break Err(e);
                    }
                }
                _ = kill.recv() => break Ok(()),
            }
        };

        let mut state = self.inner.state.lock();
        state.connections.remove(&id);
        for device in state.devices.values_mut() {
            if device.owner == Some(id) {
                device.release();
            }
        }
        debug!(connection = id, "proxy connection closed");
        result
    }

    fn drain(
        &self,
        id: u64,
        codec: &mut EnvelopeCodec,
        tx: &mpsc::UnboundedSender<Envelope>,
    ) -> Result<(), EnvelopeError> {
        while let Some(envelope) = codec.decode()? {
            trace!(connection = id, %envelope, "request");
            for reply in self.handle(id, envelope) {
                let _ = tx.send(reply);
            }
        }
        Ok(())
    }

    /// Answer one request; the acknowledgement comes first.
    fn handle(&self, id: u64, envelope: Envelope) -> Vec<Envelope> {
        let Envelope {
            seq,
            address,
            message,
        } = envelope;
        let reply = |message| Envelope::new(seq, address.clone(), message);
        let error = |code, text: &str| {
            Envelope::new(
                seq,
                address.clone(),
                Message::Error {
                    code,
                    message: text.to_string(),
                },
            )
        };

        let mut state = self.inner.state.lock();
        if let Message::Ping = message {
            return if state.answer_pings {
                vec![reply(Message::Pong)]
            } else {
                Vec::new()
            };
        }

        let HostState { devices, rng, .. } = &mut *state;
        let Some(device) = devices.get_mut(&address) else {
            return vec![error(HostErrorCode::DeviceNotFound, "unknown device")];
        };

        match message {
            Message::Connect { .. } => {
                if device.behavior.refuse_connect {
                    return vec![error(HostErrorCode::ConnectFailed, "connection refused")];
                }
                if device.owner.is_some_and(|owner| owner != id) {
                    return vec![error(HostErrorCode::Busy, "connected to another client")];
                }
                device.owner = Some(id);
                device.stats.connects += 1;
                debug!(%address, "device connected");
                vec![reply(Message::Ack)]
            }
            Message::Disconnect => {
                if device.owner == Some(id) {
                    device.release();
                }
                vec![reply(Message::Ack)]
            }
            Message::Subscribe { characteristic } => {
                if device.owner != Some(id) {
                    return vec![error(HostErrorCode::NotConnected, "not connected")];
                }
                if characteristic != CONTROL_CHARACTERISTIC_UUID {
                    return vec![error(HostErrorCode::GattFailure, "no such characteristic")];
                }
                device.subscribed = true;
                if device.behavior.drop_after_subscribe > 0 {
                    device.behavior.drop_after_subscribe -= 1;
                    device.release();
                    debug!(%address, "device dropped after subscribe");
                    return vec![
                        reply(Message::Ack),
                        Envelope::new(0, address.clone(), Message::DeviceDisconnected),
                    ];
                }
                vec![reply(Message::Ack)]
            }
            Message::Write {
                characteristic,
                data,
                ..
            } => {
                if device.owner != Some(id) {
                    return vec![error(HostErrorCode::NotConnected, "not connected")];
                }
                if characteristic != CONTROL_CHARACTERISTIC_UUID {
                    return vec![error(HostErrorCode::GattFailure, "no such characteristic")];
                }
                device.stats.writes.push(data.clone());
                device.stats.write_times.push(Instant::now());
                let mut out = vec![reply(Message::Ack)];
                for frame in self.execute(device, rng, &data) {
                    if device.subscribed {
                        out.push(Envelope::new(0, address.clone(), self.notify_message(frame)));
                    }
                }
                out
            }
            other => {
                warn!(%address, message = other.name(), "unsupported request");
                vec![error(HostErrorCode::Unsupported, "unsupported request")]
            }
        }
    }

    /// Run the command frames in `data` and return the encoded frames the
    /// motor sends back.
    fn execute(&self, device: &mut SimDevice, rng: &mut ChaCha8Rng, data: &[u8]) -> Vec<Vec<u8>> {
        let checksum = self.inner.checksum;
        let mut out = Vec::new();
        device.assembler.push(data);
        while let Some(result) = device.assembler.next_frame() {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "motor ignored corrupt command");
                    continue;
                }
            };
            device.stats.commands += 1;
            let output = device.motor.handle(&frame);
            let behavior = &mut device.behavior;

            if behavior.silent {
                continue;
            }
            if behavior.drop_replies > 0 {
                behavior.drop_replies -= 1;
                device.stats.dropped_replies += 1;
                continue;
            }
            if behavior.loss_probability > 0.0 && rng.gen_bool(behavior.loss_probability.min(1.0)) {
                device.stats.dropped_replies += 1;
                continue;
            }

            let reply = if behavior.reject_commands {
                status_reply(frame.code(), false)
            } else {
                output.reply
            };
            let mut bytes = reply.encode(checksum);
            if behavior.corrupt_replies > 0 {
                behavior.corrupt_replies -= 1;
                if let Some(last) = bytes.last_mut() {
                    *last ^= 0xFF;
                }
            } else if behavior.truncate_replies > 0 {
                behavior.truncate_replies -= 1;
                bytes.truncate(bytes.len() / 2);
            }
            out.push(bytes);

            if output.moved && behavior.notify_moves {
                out.push(position_reply(&device.motor.report()).encode(checksum));
            }
        }
        out
    }

    fn notify_message(&self, data: Vec<u8>) -> Message {
        Message::Notify {
            characteristic: CONTROL_CHARACTERISTIC_UUID,
            data,
        }
    }
}
