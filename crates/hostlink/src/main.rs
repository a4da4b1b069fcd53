mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::exit::{CliError, INTERNAL};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "hostlink",
    version,
    about = "Talk to external programs over TCP, UDP, serial or in-process channels"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
        .and_then(|runtime| runtime.block_on(cmd::run(cli.command, format)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "hostlink",
            "send",
            "--transport",
            "tcp",
            "--port",
            "9000",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "hostlink",
            "send",
            "--transport",
            "tcp",
            "--port",
            "9000",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_config_combined_with_transport() {
        let err = Cli::try_parse_from([
            "hostlink",
            "listen",
            "--config",
            "/tmp/program.json",
            "--transport",
            "udp",
        ])
        .expect_err("--config and --transport should conflict");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_check_subcommand() {
        let cli = Cli::try_parse_from(["hostlink", "check", "/tmp/program.json"])
            .expect("check args should parse");
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn parses_serial_echo() {
        let cli = Cli::try_parse_from([
            "hostlink",
            "--format",
            "raw",
            "echo",
            "--transport",
            "serial",
            "--device",
            "/dev/ttyUSB0",
            "--baud",
            "115200",
        ])
        .expect("echo args should parse");

        match cli.command {
            Command::Echo(args) => {
                assert_eq!(args.target.device.as_deref(), Some("/dev/ttyUSB0"));
                assert_eq!(args.target.baud, Some(115200));
            }
            other => panic!("expected echo, got {other:?}"),
        }
    }
}
