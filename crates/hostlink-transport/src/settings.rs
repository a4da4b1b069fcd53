//! Typed, validated transport settings.
//!
//! Every transport takes one settings value at construction and never
//! mutates it. All structs deserialize from partial JSON; missing fields
//! take their defaults. Per-transport settings flatten the shared
//! [`ProtocolSettings`] fields into the same object.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use hostlink_frame::{CHUNK_HEADER_SIZE, MAX_DATAGRAM_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

fn positive(value: u64, field: &'static str) -> Result<(), SettingsError> {
    if value == 0 {
        return Err(SettingsError::NotPositive { field });
    }
    Ok(())
}

/// Settings shared by every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Read buffer size in bytes. Default: 4096.
    pub buffer_size: usize,
    /// Largest slice of a stream payload written or read at once. Default: 64 KiB.
    pub max_message_size: usize,
    /// Connect timeout in milliseconds. Default: 5000.
    pub connection_timeout_ms: u64,
    /// Send timeout in milliseconds. Default: 5000.
    pub send_timeout_ms: u64,
    /// How long `receive` waits for a message, in milliseconds. Default: 5000.
    pub receive_timeout_ms: u64,
    /// Reopen the link after an unexpected loss. Default: true.
    pub enable_reconnect: bool,
    /// Reconnect attempts before giving up. Default: 5.
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds; attempt `n` waits `n` times this. Default: 1000.
    pub reconnect_delay_ms: u64,
    /// Upper bound on a single reconnect delay in milliseconds. Default: 30000.
    pub max_reconnect_delay_ms: u64,
    /// Accepted but not applied.
    pub enable_compression: bool,
    /// Accepted but not applied.
    pub enable_encryption: bool,
    /// Sends allowed in flight at once. Default: 1.
    pub max_concurrent_operations: usize,
    /// Log every frame at debug level. Default: false.
    pub enable_debug_logging: bool,
    /// Collect send/receive counters. Default: true.
    pub enable_metrics: bool,
    /// Send latency samples kept for metrics. Default: 1000.
    pub max_metrics_count: usize,
    /// Received messages buffered for `receive`; oldest dropped when full. Default: 1024.
    pub receive_queue_capacity: usize,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            max_message_size: 64 * 1024,
            connection_timeout_ms: 5000,
            send_timeout_ms: 5000,
            receive_timeout_ms: 5000,
            enable_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            enable_compression: false,
            enable_encryption: false,
            max_concurrent_operations: 1,
            enable_debug_logging: false,
            enable_metrics: true,
            max_metrics_count: 1000,
            receive_queue_capacity: 1024,
        }
    }
}

impl ProtocolSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        positive(self.buffer_size as u64, "buffer_size")?;
        positive(self.max_message_size as u64, "max_message_size")?;
        positive(self.connection_timeout_ms, "connection_timeout_ms")?;
        positive(self.send_timeout_ms, "send_timeout_ms")?;
        positive(self.receive_timeout_ms, "receive_timeout_ms")?;
        positive(
            self.max_concurrent_operations as u64,
            "max_concurrent_operations",
        )?;
        positive(
            self.receive_queue_capacity as u64,
            "receive_queue_capacity",
        )?;
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

/// TCP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    #[serde(flatten)]
    pub base: ProtocolSettings,
    /// Disable Nagle's algorithm. Default: true.
    pub no_delay: bool,
    /// `SO_LINGER` in seconds; `None` leaves the OS default.
    pub linger_seconds: Option<u64>,
    /// `SO_REUSEADDR`. Default: false.
    pub reuse_address: bool,
    /// `SO_KEEPALIVE`. Default: true.
    pub keep_alive: bool,
    /// Interval between keep-alive packets in milliseconds. Accepted but not applied.
    pub keep_alive_interval_ms: u64,
    /// Idle time before the first keep-alive packet in milliseconds. Accepted but not applied.
    pub keep_alive_time_ms: u64,
    /// Unanswered keep-alive packets before the peer is declared dead. Accepted but not applied.
    pub keep_alive_retry_count: u32,
    /// `SO_SNDBUF` in bytes. Default: 8192.
    pub send_buffer_size: u32,
    /// `SO_RCVBUF` in bytes. Default: 8192.
    pub receive_buffer_size: u32,
    /// Largest frame accepted from or sent to the peer, in bytes. A longer
    /// length prefix drops the connection. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            base: ProtocolSettings::default(),
            no_delay: true,
            linger_seconds: None,
            reuse_address: false,
            keep_alive: true,
            keep_alive_interval_ms: 1000,
            keep_alive_time_ms: 5000,
            keep_alive_retry_count: 3,
            send_buffer_size: 8192,
            receive_buffer_size: 8192,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl TcpSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.base.validate()?;
        positive(self.keep_alive_interval_ms, "keep_alive_interval_ms")?;
        positive(self.keep_alive_time_ms, "keep_alive_time_ms")?;
        positive(self.keep_alive_retry_count as u64, "keep_alive_retry_count")?;
        positive(self.send_buffer_size as u64, "send_buffer_size")?;
        positive(self.receive_buffer_size as u64, "receive_buffer_size")?;
        positive(self.max_frame_size as u64, "max_frame_size")?;
        Ok(())
    }
}

/// UDP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpSettings {
    #[serde(flatten)]
    pub base: ProtocolSettings,
    /// Local address to bind. Default: `0.0.0.0:0`.
    pub local_bind: SocketAddr,
    /// `SO_BROADCAST`. Default: false.
    pub broadcast: bool,
    /// IP time-to-live. Default: 1.
    pub time_to_live: u32,
    /// Accepted but not applied.
    pub dont_fragment: bool,
    /// Chunk, acknowledge and retransmit every send. Default: false.
    pub enable_reliable_delivery: bool,
    /// Time before an unacknowledged chunk is resent, in milliseconds. Default: 1000.
    pub ack_timeout_ms: u64,
    /// Retransmissions per send before it fails. Default: 3.
    pub max_retransmissions: u32,
    /// Largest datagram sent, header included. Default: 1400.
    pub max_packet_size: usize,
    /// How often pending sends are scanned for retransmission, in milliseconds. Default: 100.
    pub retransmit_interval_ms: u64,
    /// Partial messages older than this are discarded, in milliseconds. Default: 30000.
    pub reassembly_timeout_ms: u64,
    /// Join `multicast_group` after binding. Default: false.
    pub enable_multicast: bool,
    /// Default: 239.255.255.250.
    pub multicast_group: Ipv4Addr,
    /// Local port bound when multicast is enabled and `local_bind` leaves the port open. Default: 1900.
    pub multicast_port: u16,
    /// Receive our own multicast datagrams. Default: false.
    pub multicast_loopback: bool,
}

impl Default for UdpSettings {
    fn default() -> Self {
        Self {
            base: ProtocolSettings::default(),
            local_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            broadcast: false,
            time_to_live: 1,
            dont_fragment: false,
            enable_reliable_delivery: false,
            ack_timeout_ms: 1000,
            max_retransmissions: 3,
            max_packet_size: 1400,
            retransmit_interval_ms: 100,
            reassembly_timeout_ms: 30_000,
            enable_multicast: false,
            multicast_group: Ipv4Addr::new(239, 255, 255, 250),
            multicast_port: 1900,
            multicast_loopback: false,
        }
    }
}

impl UdpSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.base.validate()?;
        positive(self.time_to_live as u64, "time_to_live")?;
        if self.time_to_live > 255 {
            return Err(SettingsError::OutOfRange {
                field: "time_to_live",
                reason: format!("{} exceeds 255", self.time_to_live),
            });
        }
        positive(self.ack_timeout_ms, "ack_timeout_ms")?;
        positive(self.max_retransmissions as u64, "max_retransmissions")?;
        positive(self.retransmit_interval_ms, "retransmit_interval_ms")?;
        positive(self.reassembly_timeout_ms, "reassembly_timeout_ms")?;
        if self.max_packet_size <= CHUNK_HEADER_SIZE || self.max_packet_size > MAX_DATAGRAM_SIZE {
            return Err(SettingsError::OutOfRange {
                field: "max_packet_size",
                reason: format!(
                    "{} not in {}..={MAX_DATAGRAM_SIZE}",
                    self.max_packet_size,
                    CHUNK_HEADER_SIZE + 1
                ),
            });
        }
        positive(self.multicast_port as u64, "multicast_port")?;
        if self.enable_multicast && !self.multicast_group.is_multicast() {
            return Err(SettingsError::OutOfRange {
                field: "multicast_group",
                reason: format!("{} is not a multicast address", self.multicast_group),
            });
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_interval_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    /// Upper bound on how long a reliable send waits for all acknowledgements.
    pub fn reliable_send_deadline(&self) -> Duration {
        self.ack_timeout()
            .saturating_mul(self.max_retransmissions.saturating_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handshake {
    #[default]
    None,
    XonXoff,
    RequestToSend,
    RequestToSendXonXoff,
}

/// Serial transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    #[serde(flatten)]
    pub base: ProtocolSettings,
    /// Default: 9600.
    pub baud_rate: u32,
    /// 5 through 8. Default: 8.
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub handshake: Handshake,
    /// Assert DTR after opening. Default: false.
    pub dtr_enable: bool,
    /// Assert RTS after opening. Default: false.
    pub rts_enable: bool,
    /// Sleep between polls of an idle port, in milliseconds. Default: 1.
    pub poll_interval_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            base: ProtocolSettings::default(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            handshake: Handshake::None,
            dtr_enable: false,
            rts_enable: false,
            poll_interval_ms: 1,
        }
    }
}

impl SerialSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.base.validate()?;
        positive(self.baud_rate as u64, "baud_rate")?;
        if !(5..=8).contains(&self.data_bits) {
            return Err(SettingsError::OutOfRange {
                field: "data_bits",
                reason: format!("{} not in 5..=8", self.data_bits),
            });
        }
        positive(self.poll_interval_ms, "poll_interval_ms")?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// In-process channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemorySettings {
    #[serde(flatten)]
    pub base: ProtocolSettings,
    /// Messages a channel holds before sends fail. Default: 1000.
    pub queue_capacity: usize,
    /// Deliver each drained batch highest priority first. Default: false.
    pub enable_priority: bool,
    /// Priorities accepted by `send_with_priority` are `0..max_priority_levels`. Default: 3.
    pub max_priority_levels: u32,
    /// Default: 60000.
    pub message_ttl_ms: u64,
    /// Discard messages older than `message_ttl_ms` before delivery. Default: true.
    pub enable_message_expiry: bool,
    /// Concatenate messages into batched deliveries. Default: false.
    pub enable_batching: bool,
    /// Messages per batch. Default: 100.
    pub batch_size: usize,
    /// Flush a partial batch after this long, in milliseconds. Default: 100.
    pub batch_timeout_ms: u64,
    /// Wake interval when no enqueue signal arrives, in milliseconds. Default: 100.
    pub poll_interval_ms: u64,
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self {
            base: ProtocolSettings::default(),
            queue_capacity: 1000,
            enable_priority: false,
            max_priority_levels: 3,
            message_ttl_ms: 60_000,
            enable_message_expiry: true,
            enable_batching: false,
            batch_size: 100,
            batch_timeout_ms: 100,
            poll_interval_ms: 100,
        }
    }
}

impl InMemorySettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.base.validate()?;
        positive(self.queue_capacity as u64, "queue_capacity")?;
        positive(self.max_priority_levels as u64, "max_priority_levels")?;
        positive(self.message_ttl_ms, "message_ttl_ms")?;
        positive(self.batch_size as u64, "batch_size")?;
        positive(self.batch_timeout_ms, "batch_timeout_ms")?;
        positive(self.poll_interval_ms, "poll_interval_ms")?;
        if self.enable_priority && self.enable_batching {
            return Err(SettingsError::Conflict {
                first: "enable_priority",
                second: "enable_batching",
            });
        }
        Ok(())
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_millis(self.message_ttl_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ProtocolSettings::default().validate().unwrap();
        TcpSettings::default().validate().unwrap();
        UdpSettings::default().validate().unwrap();
        SerialSettings::default().validate().unwrap();
        InMemorySettings::default().validate().unwrap();
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let settings = ProtocolSettings {
            send_timeout_ms: 0,
            ..ProtocolSettings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(SettingsError::NotPositive {
                field: "send_timeout_ms"
            })
        );
    }

    #[test]
    fn zero_reconnect_bounds_are_allowed() {
        let settings = ProtocolSettings {
            max_reconnect_attempts: 0,
            reconnect_delay_ms: 0,
            max_reconnect_delay_ms: 0,
            ..ProtocolSettings::default()
        };
        settings.validate().unwrap();
    }

    #[test]
    fn base_errors_surface_through_extensions() {
        let mut tcp = TcpSettings::default();
        tcp.base.buffer_size = 0;
        assert!(matches!(
            tcp.validate(),
            Err(SettingsError::NotPositive {
                field: "buffer_size"
            })
        ));
    }

    #[test]
    fn udp_packet_size_must_fit_header() {
        let settings = UdpSettings {
            max_packet_size: CHUNK_HEADER_SIZE,
            ..UdpSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::OutOfRange {
                field: "max_packet_size",
                ..
            })
        ));
    }

    #[test]
    fn udp_reliable_deadline_covers_every_retransmission() {
        let settings = UdpSettings {
            ack_timeout_ms: 200,
            max_retransmissions: 2,
            ..UdpSettings::default()
        };
        assert_eq!(settings.reliable_send_deadline(), Duration::from_millis(600));
    }

    #[test]
    fn serial_data_bits_range() {
        for bits in [4u8, 9] {
            let settings = SerialSettings {
                data_bits: bits,
                ..SerialSettings::default()
            };
            assert!(settings.validate().is_err(), "data_bits {bits}");
        }
    }

    #[test]
    fn priority_and_batching_conflict() {
        let settings = InMemorySettings {
            enable_priority: true,
            enable_batching: true,
            ..InMemorySettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Conflict { .. })
        ));
    }

    #[test]
    fn partial_json_takes_defaults_for_missing_fields() {
        let settings: TcpSettings =
            serde_json::from_str(r#"{"no_delay": false, "max_reconnect_attempts": 2}"#)
                .expect("partial tcp settings should parse");

        assert!(!settings.no_delay);
        assert_eq!(settings.base.max_reconnect_attempts, 2);
        assert_eq!(settings.base.buffer_size, 4096);
        assert_eq!(settings.send_buffer_size, 8192);
    }

    #[test]
    fn serial_enums_use_snake_case() {
        let settings: SerialSettings =
            serde_json::from_str(r#"{"parity": "even", "stop_bits": "two", "handshake": "xon_xoff"}"#)
                .expect("serial settings should parse");
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.handshake, Handshake::XonXoff);
    }

    #[test]
    fn combined_handshake_and_one_and_a_half_stop_bits_parse() {
        let settings: SerialSettings = serde_json::from_str(
            r#"{"stop_bits": "one_point_five", "handshake": "request_to_send_xon_xoff"}"#,
        )
        .expect("serial settings should parse");
        assert_eq!(settings.stop_bits, StopBits::OnePointFive);
        assert_eq!(settings.handshake, Handshake::RequestToSendXonXoff);
    }

    #[test]
    fn tcp_frame_limit_must_be_positive() {
        let settings = TcpSettings {
            max_frame_size: 0,
            ..TcpSettings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(SettingsError::NotPositive {
                field: "max_frame_size"
            })
        );
    }

    #[test]
    fn clone_is_independent() {
        let original = UdpSettings::default();
        let mut copy = original.clone();
        copy.max_packet_size = 512;
        assert_eq!(original.max_packet_size, 1400);
    }
}
