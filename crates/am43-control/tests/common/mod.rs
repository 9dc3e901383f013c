//! Shared fixtures: a controller wired to a simulated host.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use am43_control::{
    Am43Controller, BoxedStream, Checksum, ConnectFuture, Connector, ControlConfig, DeviceAddress,
};
use am43_sim::{SimHost, SimMotor};

/// Dials a [`SimHost`] in memory.
pub struct SimConnector {
    host: SimHost,
}

impl SimConnector {
    pub fn new(host: SimHost) -> Arc<Self> {
        Arc::new(SimConnector { host })
    }
}

impl Connector for SimConnector {
    fn connect(&self) -> ConnectFuture {
        let result = self.host.connect();
        Box::pin(async move { result.map(|stream| Box::new(stream) as BoxedStream) })
    }

    fn endpoint(&self) -> String {
        "sim".to_string()
    }
}

pub fn blind() -> DeviceAddress {
    "02:AB:CD:EF:01:23".parse().unwrap()
}

pub fn other_blind() -> DeviceAddress {
    "02:AB:CD:EF:01:99".parse().unwrap()
}

pub fn config() -> ControlConfig {
    ControlConfig {
        checksum: Checksum::Sum8,
        ..ControlConfig::default()
    }
}

/// A host with one default motor at [`blind`].
pub fn host() -> SimHost {
    let host = SimHost::new(Checksum::Sum8);
    host.add_device(blind(), SimMotor::new());
    host
}

pub async fn controller(host: &SimHost, config: ControlConfig) -> Am43Controller {
    Am43Controller::with_connector(SimConnector::new(host.clone()), config)
        .await
        .unwrap()
}

/// Let spawned tasks run without advancing the paused clock much.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` while the paused clock advances in small steps.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
