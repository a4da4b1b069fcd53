//! Resolve `TargetArgs` into a connected transport.

use std::time::Duration;

use bytes::Bytes;
use hostlink_factory::{ProgramConfig, TransportFactory, TransportKind};
use hostlink_transport::{
    ChannelRegistry, ConnectionState, DisconnectReason, ProtocolSettings, Transport, TransportEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cmd::TargetArgs;
use crate::exit::{factory_error, transport_error, CliError, CliResult, FAILURE, TIMEOUT, USAGE};

/// One open link plus the event feed used to explain failures.
pub struct Session {
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    source: String,
}

impl Session {
    pub async fn open(args: &TargetArgs) -> CliResult<Self> {
        let config = resolve_config(args)?;
        let kind = config
            .validate()
            .map_err(|err| factory_error("invalid target", err))?;
        let source = describe(&config, kind);

        let factory = TransportFactory::with_defaults(ChannelRegistry::new());
        let transport = factory
            .create(&config)
            .map_err(|err| factory_error("create failed", err))?;
        let events = transport.events().subscribe_channel();
        let mut session = Self {
            transport,
            events,
            source,
        };

        let connected = session
            .transport
            .connect()
            .await
            .map_err(|err| transport_error("connect failed", &err))?;
        if !connected {
            let context = format!("connect to {} failed", session.source);
            let err = session.failure(&context);
            session.transport.dispose().await;
            return Err(err);
        }

        info!(transport = session.transport.kind(), target = %session.source, "connected");
        Ok(session)
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn send(&mut self, payload: &[u8]) -> CliResult<()> {
        let sent = self
            .transport
            .send(payload)
            .await
            .map_err(|err| transport_error("send failed", &err))?;
        if sent {
            Ok(())
        } else {
            Err(self.failure("send failed"))
        }
    }

    /// Next message. `Ok(None)` once the link has closed for good.
    pub async fn next_message(&mut self) -> CliResult<Option<Bytes>> {
        loop {
            let received = self
                .transport
                .receive()
                .await
                .map_err(|err| transport_error("receive failed", &err))?;
            match received {
                Some(payload) => return Ok(Some(payload)),
                None if self.transport.state() == ConnectionState::Closed => return Ok(None),
                None => debug!("receive timed out; waiting"),
            }
        }
    }

    /// Wait up to `timeout` for one message.
    pub async fn reply(&mut self, timeout: Duration) -> CliResult<Bytes> {
        match tokio::time::timeout(timeout, self.next_message()).await {
            Ok(Ok(Some(payload))) => Ok(payload),
            Ok(Ok(None)) => Err(self.failure("connection closed before a reply arrived")),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CliError::new(
                TIMEOUT,
                format!("no reply within {}ms", timeout.as_millis()),
            )),
        }
    }

    /// The error to report for a lost or failed link, from the events seen so far.
    pub fn failure(&mut self, context: &str) -> CliError {
        let mut failure = None;
        while let Ok(event) = self.events.try_recv() {
            match event {
                TransportEvent::Error(err) => {
                    failure = Some(transport_error(context, &err));
                }
                TransportEvent::ConnectionLost(DisconnectReason::Timeout) => {
                    failure = Some(CliError::new(TIMEOUT, format!("{context}: timed out")));
                }
                _ => {}
            }
        }
        failure.unwrap_or_else(|| CliError::new(FAILURE, context.to_string()))
    }

    pub async fn close(self) {
        self.transport.dispose().await;
    }
}

fn resolve_config(args: &TargetArgs) -> CliResult<ProgramConfig> {
    let mut config = match (&args.config, &args.transport) {
        (Some(path), _) => ProgramConfig::from_path(path)
            .map_err(|err| factory_error("failed reading config", err))?,
        (None, Some(transport)) => ProgramConfig {
            transport_type: transport.clone(),
            host: args.host.clone(),
            port: args.port.unwrap_or(0),
            port_name: args.device.clone().unwrap_or_default(),
            channel_id: args.channel.clone().unwrap_or_default(),
            ..ProgramConfig::default()
        },
        (None, None) => {
            return Err(CliError::new(
                USAGE,
                "either --config or --transport is required",
            ))
        }
    };

    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if args.reliable {
        config.udp.enable_reliable_delivery = true;
    }
    if let Some(timeout) = &args.timeout {
        let timeout = parse_duration(timeout)?;
        for base in bases(&mut config) {
            base.connection_timeout_ms = timeout.as_millis() as u64;
        }
    }
    Ok(config)
}

fn bases(config: &mut ProgramConfig) -> [&mut ProtocolSettings; 4] {
    [
        &mut config.tcp.base,
        &mut config.udp.base,
        &mut config.serial.base,
        &mut config.in_memory.base,
    ]
}

fn describe(config: &ProgramConfig, kind: TransportKind) -> String {
    match kind {
        TransportKind::Tcp | TransportKind::Udp => format!("{}:{}", config.host, config.port),
        TransportKind::Serial => config.port_name.clone(),
        TransportKind::InMemory => config.channel_id.clone(),
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(transport: &str) -> TargetArgs {
        TargetArgs {
            transport: Some(transport.to_string()),
            host: "127.0.0.1".to_string(),
            ..TargetArgs::default()
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn flags_build_a_udp_target() {
        let args = TargetArgs {
            port: Some(9100),
            reliable: true,
            timeout: Some("250ms".to_string()),
            ..flags("udp")
        };
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.validate().unwrap(), TransportKind::Udp);
        assert!(config.udp.enable_reliable_delivery);
        assert_eq!(config.udp.base.connection_timeout_ms, 250);
        assert_eq!(describe(&config, TransportKind::Udp), "127.0.0.1:9100");
    }

    #[test]
    fn serial_flags_set_device_and_baud() {
        let args = TargetArgs {
            device: Some("/dev/ttyACM0".to_string()),
            baud: Some(57600),
            ..flags("serial")
        };
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 57600);
    }

    #[test]
    fn missing_transport_is_a_usage_error() {
        let err = resolve_config(&TargetArgs::default()).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn tcp_without_port_fails_validation() {
        let config = resolve_config(&flags("tcp")).unwrap();
        assert!(config.validate().is_err());
    }
}
