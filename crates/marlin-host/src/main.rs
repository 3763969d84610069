//! marlin-host command-line entry point.
//!
//! Connects to a Marlin controller over TCP or serial, starts the channel
//! actor, and turns stdin into a simple console:
//!
//! ```text
//! marlin-host [OPTIONS]
//!
//! Options:
//!   --config <PATH>     Config file [default: platform config dir]
//!   --host <HOST>       TCP bridge host (selects TCP)
//!   --port <PORT>       TCP bridge port
//!   --serial <DEVICE>   Serial device (selects serial)
//!   --baud <RATE>       Serial baud rate
//!   --init-config       Write the effective config to the config path and exit
//! ```
//!
//! # Console
//!
//! | Input             | Effect                                             |
//! |-------------------|----------------------------------------------------|
//! | `G28` (any text)  | queued as a numbered command                       |
//! | `!goto`           | `G1` to the current joint values                   |
//! | `!set X 12.5`     | change one local joint value (nothing is sent)     |
//! | `!home`           | move the local joints home, then `!goto`           |
//! | `!sethome`        | `G92` to the home values                           |
//! | `!where`          | `M114`; the reply updates the joints               |
//! | `!estop`          | `M112`, bypassing the queue                        |
//! | `!status`         | print the channel status                           |
//! | `!quit`           | disconnect and exit                                |

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use marlin_core::{JointTable, RobotAdapter};
use marlin_host::application::channel::ChannelEvent;
use marlin_host::application::handle::{connect, ChannelHandle};
use marlin_host::application::transport::Connector;
use marlin_host::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, AppConfig, ConnectionKind,
};
use marlin_host::infrastructure::transport::serial::SerialConnector;
use marlin_host::infrastructure::transport::tcp::TcpConnector;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Reliable command channel for Marlin motion controllers.
#[derive(Debug, Parser)]
#[command(
    name = "marlin-host",
    about = "Streams numbered, checksummed commands to Marlin firmware",
    version
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, env = "MARLIN_CONFIG")]
    config: Option<PathBuf>,

    /// Host of a TCP serial bridge.  Selects the TCP transport.
    #[arg(long, env = "MARLIN_HOST", conflicts_with = "serial")]
    host: Option<String>,

    /// Port of the TCP serial bridge.
    #[arg(long, env = "MARLIN_PORT")]
    port: Option<u16>,

    /// Serial device.  Selects the serial transport.
    #[arg(long, env = "MARLIN_SERIAL")]
    serial: Option<String>,

    /// Serial baud rate.
    #[arg(long, env = "MARLIN_BAUD")]
    baud: Option<u32>,

    /// Write the effective config to the config path and exit.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded config.
    fn apply_overrides(&self, config: &mut AppConfig) {
        let connection = &mut config.connection;
        if let Some(host) = &self.host {
            connection.kind = ConnectionKind::Tcp;
            connection.host = host.clone();
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(serial) = &self.serial {
            connection.kind = ConnectionKind::Serial;
            connection.serial_port = serial.clone();
        }
        if let Some(baud) = self.baud {
            connection.baud_rate = baud;
        }
    }
}

// ── Console commands ──────────────────────────────────────────────────────────

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Raw(String),
    Goto,
    SetJoint { name: String, value: f64 },
    Home,
    SetHome,
    Where,
    EmergencyStop,
    Status,
    Quit,
}

/// Parses one console line.  Returns `None` for blank input.
fn parse_console_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(directive) = line.strip_prefix('!') else {
        return Ok(Some(ConsoleCommand::Raw(line.to_string())));
    };

    let mut words = directive.split_whitespace();
    let command = match words.next().unwrap_or_default() {
        "goto" => ConsoleCommand::Goto,
        "home" => ConsoleCommand::Home,
        "sethome" => ConsoleCommand::SetHome,
        "where" => ConsoleCommand::Where,
        "estop" => ConsoleCommand::EmergencyStop,
        "status" => ConsoleCommand::Status,
        "quit" | "exit" => ConsoleCommand::Quit,
        "set" => {
            let (Some(name), Some(value)) = (words.next(), words.next()) else {
                return Err("usage: !set <joint> <value>".to_string());
            };
            let value = value
                .parse()
                .map_err(|_| format!("not a number: {value}"))?;
            ConsoleCommand::SetJoint {
                name: name.to_string(),
                value,
            }
        }
        other => return Err(format!("unknown command: !{other}")),
    };
    Ok(Some(command))
}

/// Executes one console command.  Returns `false` when the user asked to quit.
async fn run_console_command(
    command: ConsoleCommand,
    handle: &ChannelHandle,
    robot: &mut Arc<Mutex<JointTable>>,
) -> bool {
    let result = match command {
        ConsoleCommand::Raw(payload) => handle.enqueue(payload).await.map(|_| ()),
        ConsoleCommand::Goto => handle.send_goto().await.map(|_| ()),
        ConsoleCommand::SetJoint { name, value } => {
            if !robot.set_joint_value(&name, value) {
                warn!("no joint named {name}");
            }
            Ok(())
        }
        ConsoleCommand::Home => match handle.go_home().await {
            Ok(()) => handle.send_goto().await.map(|_| ()),
            Err(e) => Err(e),
        },
        ConsoleCommand::SetHome => handle.set_home().await.map(|_| ()),
        ConsoleCommand::Where => handle.request_position().await.map(|_| ()),
        ConsoleCommand::EmergencyStop => handle.emergency_stop().await,
        ConsoleCommand::Status => handle.status().await.map(|status| {
            info!(
                "{:?}: next {} / queued {}, credit {}/{}, {} retained",
                status.state,
                status.next_to_send,
                status.last_enqueued,
                status.credit,
                status.window_size,
                status.retained
            );
        }),
        ConsoleCommand::Quit => return false,
    };
    if let Err(e) = result {
        warn!("command failed: {e}");
    }
    true
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path().context("cannot locate the config file")?,
    };
    let mut config = load_config_from(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    cli.apply_overrides(&mut config);
    config.validate().context("config rejected")?;

    // `RUST_LOG` wins over the config's log level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.channel.log_level)),
        )
        .init();

    if cli.init_config {
        save_config_to(&config, &config_path)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        info!("wrote {}", config_path.display());
        return Ok(());
    }

    let connector: Box<dyn Connector> = match config.connection.kind {
        ConnectionKind::Tcp => Box::new(TcpConnector::new(
            &config.connection.host,
            config.connection.port,
        )),
        ConnectionKind::Serial => Box::new(SerialConnector::new(
            config.connection.serial_port.clone(),
            config.connection.baud_rate,
        )),
    };

    let mut robot = Arc::new(Mutex::new(JointTable::new(config.joints.clone())));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (handle, channel_task) = connect(
        connector.as_ref(),
        config.channel_config(),
        robot.clone(),
        events_tx,
    )
    .await
    .with_context(|| format!("failed to connect to {}", connector.target()))?;

    info!("marlin-host ready.  Type commands, `!quit` or Ctrl-C to exit.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut disconnect_reason = None;

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("stdin read failed: {e}");
                        break;
                    }
                };
                match parse_console_command(&line) {
                    Ok(Some(command)) => {
                        if !run_console_command(command, &handle, &mut robot).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => warn!("{message}"),
                }
            }
            event = events.recv() => match event {
                Some(ChannelEvent::Connected { session_id }) => info!("session {session_id} connected"),
                Some(ChannelEvent::Idle) => info!("all commands acknowledged"),
                Some(ChannelEvent::PositionUpdated(readings)) => {
                    let summary: Vec<String> =
                        readings.iter().map(|r| format!("{}={}", r.name, r.value)).collect();
                    info!("position: {}", summary.join(" "));
                }
                Some(ChannelEvent::InboundText(text)) => info!("< {text}"),
                Some(ChannelEvent::ProtocolFault(fault)) => {
                    error!("protocol fault, reconnect required: {fault}");
                }
                Some(ChannelEvent::Disconnected { reason, .. }) => {
                    disconnect_reason = Some(reason);
                    break;
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    handle.close().await;
    channel_task.await.context("channel task panicked")?;

    if let Some(reason) = disconnect_reason {
        bail!("connection lost: {reason}");
    }
    info!("marlin-host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_raw_command() {
        assert_eq!(
            parse_console_command("  G28 X  "),
            Ok(Some(ConsoleCommand::Raw("G28 X".to_string())))
        );
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse_console_command("   "), Ok(None));
    }

    #[test]
    fn test_directives_map_to_robot_operations() {
        assert_eq!(parse_console_command("!estop"), Ok(Some(ConsoleCommand::EmergencyStop)));
        assert_eq!(parse_console_command("!home"), Ok(Some(ConsoleCommand::Home)));
        assert_eq!(parse_console_command("!goto"), Ok(Some(ConsoleCommand::Goto)));
        assert_eq!(parse_console_command("!where"), Ok(Some(ConsoleCommand::Where)));
        assert_eq!(parse_console_command("!sethome"), Ok(Some(ConsoleCommand::SetHome)));
    }

    #[test]
    fn test_set_parses_joint_and_value() {
        assert_eq!(
            parse_console_command("!set U -12.5"),
            Ok(Some(ConsoleCommand::SetJoint {
                name: "U".to_string(),
                value: -12.5
            }))
        );
        assert!(parse_console_command("!set U").is_err());
        assert!(parse_console_command("!set U far").is_err());
    }

    #[test]
    fn test_unknown_directive_is_error() {
        assert!(parse_console_command("!dance").is_err());
    }

    #[test]
    fn test_cli_overrides_select_transport() {
        // Arrange
        let cli = Cli::parse_from(["marlin-host", "--serial", "/dev/ttyACM1", "--baud", "115200"]);
        let mut config = AppConfig::default();

        // Act
        cli.apply_overrides(&mut config);

        // Assert
        assert_eq!(config.connection.kind, ConnectionKind::Serial);
        assert_eq!(config.connection.serial_port, "/dev/ttyACM1");
        assert_eq!(config.connection.baud_rate, 115_200);
    }
}
