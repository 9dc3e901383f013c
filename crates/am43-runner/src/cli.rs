//! Command-line interface.

use std::path::PathBuf;

use am43_control::{Am43Controller, Am43Device, ControlConfig, DeviceAddress, Notification};
use am43_sim::{SimHost, SimMotor, TcpHostServer};
use ble_proxy_protocol::EnvelopeError;
use clap::{ArgAction, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::RunnerError;
use crate::output::Report;
use crate::settings::{load_config, ChecksumArg, ConfigOverrides};

#[derive(Debug, Parser)]
#[command(name = "am43", version, about = "Control AM43 blind motors through a BLE proxy")]
pub struct Cli {
    /// YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Radio host address (host:port)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Frame checksum algorithm
    #[arg(long, value_enum, global = true)]
    pub checksum: Option<ChecksumArg>,

    /// PIN sent after each connect
    #[arg(long, global = true)]
    pub pin: Option<u16>,

    /// Per-attempt reply timeout in milliseconds
    #[arg(long, global = true)]
    pub attempt_timeout_ms: Option<u64>,

    /// Attempts before a command times out
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print one JSON object per line
    #[arg(long, global = true)]
    pub json: bool,

    /// Serve Prometheus metrics on this address
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    pub metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Action(Action),
    /// Print notifications until interrupted
    Watch {
        #[arg(required = true)]
        devices: Vec<String>,
    },
    /// Serve a simulated radio host over TCP
    Simulate {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:7843")]
        listen: String,
        /// Simulated blind address (repeatable)
        #[arg(long = "device", required = true)]
        devices: Vec<String>,
        /// Chance of losing each reply, 0.0 to 1.0
        #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
        loss: f64,
        /// Seed for the reply loss draws
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Commands that print one report and exit.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Action {
    /// Move to a position (0 open, 100 closed)
    Move { device: String, percent: u8 },
    /// Open fully
    Open { device: String },
    /// Close fully
    Close { device: String },
    /// Stop moving
    Stop { device: String },
    /// Read the battery level
    Battery { device: String },
    /// Read position and motor flags
    Position { device: String },
    /// Read the light sensor
    Light { device: String },
    /// Set the light sensor threshold (0-9)
    Threshold { device: String, level: u8 },
    /// Read battery, light and position
    Status { device: String },
    /// Check that the radio host answers
    Ping,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            endpoint: self.endpoint.clone(),
            checksum: self.checksum,
            pin: self.pin,
            attempt_timeout_ms: self.attempt_timeout_ms,
            max_attempts: self.max_attempts,
        }
    }
}

fn parse_probability(text: &str) -> Result<f64, String> {
    let value: f64 = text.parse().map_err(|e| format!("{}", e))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{} is not between 0 and 1", value));
    }
    Ok(value)
}

/// Parse a blind address given on the command line.
pub fn parse_address(text: &str) -> Result<DeviceAddress, RunnerError> {
    let address: DeviceAddress = text.parse()?;
    if address.is_link() {
        return Err(EnvelopeError::InvalidAddress(text.to_string()).into());
    }
    Ok(address)
}

/// Run one parsed command line to completion.
pub async fn run(cli: Cli) -> Result<(), RunnerError> {
    let config = load_config(cli.config.as_deref(), &cli.overrides())?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        am43_metrics::install_prometheus(addr).map_err(|e| RunnerError::Metrics(e.to_string()))?;
        info!(%addr, "serving metrics");
    }
    am43_metrics::describe_metrics();

    match &cli.command {
        Commands::Simulate {
            listen,
            devices,
            loss,
            seed,
        } => simulate(&config, listen, devices, *loss, *seed, cli.json).await,
        Commands::Watch { devices } => {
            let controller = Am43Controller::connect(config).await?;
            let result = watch(&controller, devices, cli.json).await;
            controller.shutdown().await;
            result
        }
        Commands::Action(action) => {
            let controller = Am43Controller::connect(config).await?;
            let result = execute(&controller, action).await;
            controller.shutdown().await;
            println!("{}", result?.render(cli.json)?);
            Ok(())
        }
    }
}

/// Execute a one-shot command.
pub async fn execute(controller: &Am43Controller, action: &Action) -> Result<Report, RunnerError> {
    let done = |device: &Am43Device, command: &str| Report::Done {
        device: device.address().to_string(),
        command: command.to_string(),
    };

    match action {
        Action::Move { device, percent } => {
            let device = controller.device(parse_address(device)?);
            device.move_to(*percent).await?;
            Ok(done(&device, "move_to"))
        }
        Action::Open { device } => {
            let device = controller.device(parse_address(device)?);
            device.open_blind().await?;
            Ok(done(&device, "open"))
        }
        Action::Close { device } => {
            let device = controller.device(parse_address(device)?);
            device.close_blind().await?;
            Ok(done(&device, "close"))
        }
        Action::Stop { device } => {
            let device = controller.device(parse_address(device)?);
            device.stop().await?;
            Ok(done(&device, "stop"))
        }
        Action::Battery { device } => {
            let device = controller.device(parse_address(device)?);
            let level = device.battery().await?;
            Ok(Report::Battery {
                device: device.address().to_string(),
                percent: level.percent(),
            })
        }
        Action::Position { device } => {
            let device = controller.device(parse_address(device)?);
            let report = device.position().await?;
            Ok(Report::position(device.address().as_str(), &report))
        }
        Action::Light { device } => {
            let device = controller.device(parse_address(device)?);
            let level = device.light().await?;
            Ok(Report::Light {
                device: device.address().to_string(),
                level: level.value(),
            })
        }
        Action::Threshold { device, level } => {
            let device = controller.device(parse_address(device)?);
            device.set_light_threshold(*level).await?;
            Ok(done(&device, "set_light_threshold"))
        }
        Action::Status { device } => {
            let device = controller.device(parse_address(device)?);
            let state = device.read_state().await?;
            Ok(Report::Status {
                device: device.address().to_string(),
                state,
            })
        }
        Action::Ping => {
            controller.ping().await.map_err(am43_control::ControlError::from)?;
            Ok(Report::Done {
                device: controller.config().endpoint.clone(),
                command: "ping".to_string(),
            })
        }
    }
}

async fn watch(controller: &Am43Controller, devices: &[String], json: bool) -> Result<(), RunnerError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(DeviceAddress, Notification)>();

    for text in devices {
        let device = controller.device(parse_address(text)?);
        let mut subscription = device.subscribe_all();
        device.open().await?;
        info!(device = %device.address(), "watching");

        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(notification) = subscription.next().await {
                if tx
                    .send((subscription.address().clone(), notification))
                    .is_err()
                {
                    break;
                }
            }
        });
    }
    drop(tx);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some((address, notification)) => {
                    let report = Report::from_notification(address.as_str(), &notification);
                    println!("{}", report.render(json)?);
                }
                None => {
                    warn!("all subscriptions ended");
                    return Ok(());
                }
            },
            _ = &mut ctrl_c => {
                info!("interrupted");
                return Ok(());
            }
        }
    }
}

async fn simulate(
    config: &ControlConfig,
    listen: &str,
    devices: &[String],
    loss: f64,
    seed: Option<u64>,
    json: bool,
) -> Result<(), RunnerError> {
    let host = match seed {
        Some(seed) => SimHost::with_seed(config.checksum, seed),
        None => SimHost::new(config.checksum),
    };
    for text in devices {
        let address = parse_address(text)?;
        host.add_device(address.clone(), SimMotor::new());
        host.update_behavior(&address, |b| b.loss_probability = loss);
    }

    let server = TcpHostServer::bind(listen, host).await?;
    let addr = server.local_addr()?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "kind": "listening", "addr": addr.to_string(), "devices": devices })
        );
    } else {
        println!("simulated radio host on {} with {} blind(s)", addr, devices.len());
    }

    tokio::select! {
        result = server.run() => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    }
}
