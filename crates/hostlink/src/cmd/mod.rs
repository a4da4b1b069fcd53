use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod check;
pub mod echo;
pub mod listen;
pub mod ports;
pub mod send;
pub mod target;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a single message.
    Send(SendArgs),
    /// Connect and print received messages.
    Listen(ListenArgs),
    /// Connect and send every received message back.
    Echo(EchoArgs),
    /// List serial ports present on this machine.
    Ports(PortsArgs),
    /// Validate a program configuration file.
    Check(CheckArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Echo(args) => echo::run(args, format).await,
        Command::Ports(args) => ports::run(args, format),
        Command::Check(args) => check::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where to connect: a program configuration file, or inline flags.
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Program configuration file (JSON).
    #[arg(long, value_name = "FILE", conflicts_with = "transport")]
    pub config: Option<PathBuf>,
    /// Transport type: tcp, udp, serial or inmemory.
    #[arg(long, short = 't', value_name = "TYPE")]
    pub transport: Option<String>,
    /// Remote host for tcp and udp.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Remote port for tcp and udp.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
    /// Serial device name (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,
    /// Serial baud rate.
    #[arg(long)]
    pub baud: Option<u32>,
    /// In-process channel name.
    #[arg(long, value_name = "NAME")]
    pub channel: Option<String>,
    /// Use acknowledged, chunked delivery for udp.
    #[arg(long)]
    pub reliable: bool,
    /// Connection timeout (e.g. 5s, 500ms). Default: the transport's setting.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one reply message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for a reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Print traffic counters on exit.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Exit after echoing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Program configuration file (JSON).
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
