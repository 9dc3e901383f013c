//! Command-level API.

use std::sync::Arc;

use am43_protocol::{
    BatteryLevel, Command, DeviceState, LightLevel, NotificationKind, Percentage, PositionReport,
    Response,
};
use ble_proxy_protocol::DeviceAddress;
use tokio::sync::watch;
use tracing::info;

use crate::config::ControlConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::{ControlError, TransportError};
use crate::router::Subscription;
use crate::session::SessionState;
use crate::transport::{Connector, LinkState, ProxyTransport, TcpConnector};

/// Entry point: one proxy link and the device sessions that use it.
#[derive(Debug, Clone)]
pub struct Am43Controller {
    dispatcher: CommandDispatcher,
}

impl Am43Controller {
    /// Validate `config` and connect to its radio host over TCP.
    pub async fn connect(config: ControlConfig) -> Result<Self, ControlError> {
        let connector = Arc::new(TcpConnector::new(config.endpoint.clone()));
        Self::with_connector(connector, config).await
    }

    /// Like [`Am43Controller::connect`], over a caller-supplied connector.
    pub async fn with_connector(
        connector: Arc<dyn Connector>,
        config: ControlConfig,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let transport = ProxyTransport::start(connector, &config).await?;
        Ok(Am43Controller {
            dispatcher: CommandDispatcher::new(transport, Arc::new(config)),
        })
    }

    /// A handle to the blind at `address`; no I/O until first use.
    pub fn device(&self, address: DeviceAddress) -> Am43Device {
        Am43Device {
            address,
            dispatcher: self.dispatcher.clone(),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &ControlConfig {
        self.dispatcher.config()
    }

    pub fn link_state(&self) -> LinkState {
        self.dispatcher.transport().link_state()
    }

    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.dispatcher.transport().watch_state()
    }

    /// Addresses with a live session task.
    pub fn sessions(&self) -> Vec<DeviceAddress> {
        self.dispatcher.registry().addresses()
    }

    /// Probe the proxy link.
    pub async fn ping(&self) -> Result<(), TransportError> {
        self.dispatcher.transport().ping().await
    }

    /// Close every device session.
    pub async fn close_all(&self) {
        self.dispatcher.close_all().await;
    }

    /// Close every session and the proxy link.
    pub async fn shutdown(&self) {
        info!(endpoint = %self.dispatcher.transport().endpoint(), "shutting down");
        self.dispatcher.close_all().await;
        self.dispatcher.transport().shutdown().await;
    }
}

/// One blind.
///
/// Cheap to clone. Commands to the same blind run one at a time in call
/// order; different blinds never wait on each other.
#[derive(Debug, Clone)]
pub struct Am43Device {
    address: DeviceAddress,
    dispatcher: CommandDispatcher,
}

impl Am43Device {
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Open the session and wait until it is Ready.
    pub async fn open(&self) -> Result<(), ControlError> {
        self.dispatcher.open(&self.address).await
    }

    /// Close the session.
    ///
    /// Queued commands fail with `DeviceUnreachable` and subscriptions end.
    pub async fn close(&self) {
        self.dispatcher.close(&self.address).await;
    }

    pub fn state(&self) -> SessionState {
        self.dispatcher.state(&self.address)
    }

    /// Move to `percent`: 0 is fully open, 100 fully closed.
    pub async fn move_to(&self, percent: u8) -> Result<(), ControlError> {
        let target = Percentage::new(percent)?;
        self.expect_ack(Command::MoveTo(target)).await
    }

    /// Open fully.
    pub async fn open_blind(&self) -> Result<(), ControlError> {
        self.expect_ack(Command::Open).await
    }

    /// Close fully.
    pub async fn close_blind(&self) -> Result<(), ControlError> {
        self.expect_ack(Command::Close).await
    }

    pub async fn stop(&self) -> Result<(), ControlError> {
        self.expect_ack(Command::Stop).await
    }

    pub async fn battery(&self) -> Result<BatteryLevel, ControlError> {
        match self.submit(Command::GetBattery).await? {
            Response::Battery(level) => Ok(level),
            other => Err(unexpected(other)),
        }
    }

    pub async fn position(&self) -> Result<PositionReport, ControlError> {
        match self.submit(Command::GetPosition).await? {
            Response::Position(report) => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    pub async fn light(&self) -> Result<LightLevel, ControlError> {
        match self.submit(Command::GetLight).await? {
            Response::Light(level) => Ok(level),
            other => Err(unexpected(other)),
        }
    }

    /// Set the light level at which the motor acts on its own schedule.
    pub async fn set_light_threshold(&self, level: u8) -> Result<(), ControlError> {
        let level = LightLevel::new(level)?;
        self.expect_ack(Command::SetLightThreshold(level)).await
    }

    /// Battery, light and position, queried in that order.
    pub async fn read_state(&self) -> Result<DeviceState, ControlError> {
        let battery = self.battery().await?;
        let light = self.light().await?;
        let position = self.position().await?.position;
        Ok(DeviceState {
            battery,
            light,
            position,
        })
    }

    pub fn subscribe_position(&self) -> Subscription {
        self.observe(NotificationKind::Position)
    }

    pub fn subscribe_battery(&self) -> Subscription {
        self.observe(NotificationKind::Battery)
    }

    pub fn subscribe_light(&self) -> Subscription {
        self.observe(NotificationKind::Light)
    }

    /// Obstacle and stall reports.
    pub fn subscribe_faults(&self) -> Subscription {
        self.observe(NotificationKind::Fault)
    }

    /// Every notification from this blind.
    pub fn subscribe_all(&self) -> Subscription {
        self.observe(NotificationKind::Any)
    }

    /// Send a raw command.
    pub async fn submit(&self, command: Command) -> Result<Response, ControlError> {
        self.dispatcher.submit(&self.address, command).await
    }

    fn observe(&self, kind: NotificationKind) -> Subscription {
        self.dispatcher.router().observe(&self.address, kind)
    }

    async fn expect_ack(&self, command: Command) -> Result<(), ControlError> {
        match self.submit(command).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> ControlError {
    ControlError::UnexpectedResponse(format!("{:?}", response))
}
