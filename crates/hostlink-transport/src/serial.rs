//! Serial-port transport.
//!
//! The port is polled: every bytes-available read is delivered as one
//! message, without framing. Blocking port I/O runs on the blocking pool.
//! Ports are opened through a [`PortOpener`] so the transport can run
//! against hardware or an in-process stand-in.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::event::{EventHub, TransportEvent};
use crate::link::{LinkCore, SessionContext};
use crate::metrics::MetricsSnapshot;
use crate::settings::SerialSettings;
use crate::state::{ConnectionState, DisconnectReason};
use crate::traits::Transport;

/// An open serial device.
pub trait SerialStream: Read + Write + Send {
    /// Bytes waiting in the receive buffer.
    fn bytes_to_read(&self) -> io::Result<u32>;
}

/// Opens serial devices by name.
pub trait PortOpener: Send + Sync {
    fn open(&self, port_name: &str, settings: &SerialSettings) -> io::Result<Box<dyn SerialStream>>;
}

/// A serial device found on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    /// "usb", "pci", "bluetooth" or "unknown".
    pub kind: String,
}

type SharedPort = Arc<Mutex<Box<dyn SerialStream>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(feature = "serial")]
mod system {
    use super::*;
    use crate::settings::{Handshake, Parity, StopBits};

    /// Opens real devices through the `serialport` crate.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemPortOpener;

    struct SystemPort(Box<dyn serialport::SerialPort>);

    impl Read for SystemPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for SystemPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl SerialStream for SystemPort {
        fn bytes_to_read(&self) -> io::Result<u32> {
            self.0.bytes_to_read().map_err(io::Error::from)
        }
    }

    fn data_bits(bits: u8) -> serialport::DataBits {
        match bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        }
    }

    /// 1.5 stop bits has no `serialport` equivalent.
    pub(super) fn stop_bits(stop_bits: StopBits) -> io::Result<serialport::StopBits> {
        match stop_bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "1.5 stop bits is not supported by this platform",
            )),
        }
    }

    /// Combined RTS and XON/XOFF falls back to hardware flow control.
    pub(super) fn flow_control(handshake: Handshake) -> serialport::FlowControl {
        match handshake {
            Handshake::None => serialport::FlowControl::None,
            Handshake::XonXoff => serialport::FlowControl::Software,
            Handshake::RequestToSend | Handshake::RequestToSendXonXoff => {
                serialport::FlowControl::Hardware
            }
        }
    }

    impl PortOpener for SystemPortOpener {
        fn open(&self, port_name: &str, settings: &SerialSettings) -> io::Result<Box<dyn SerialStream>> {
            let parity = match settings.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
            };
            let stop_bits = stop_bits(settings.stop_bits)?;
            let flow_control = flow_control(settings.handshake);
            if settings.handshake == Handshake::RequestToSendXonXoff {
                warn!(
                    port = port_name,
                    "combined RTS and XON/XOFF handshake unsupported; using RTS/CTS only"
                );
            }

            let mut port = serialport::new(port_name, settings.baud_rate)
                .data_bits(data_bits(settings.data_bits))
                .parity(parity)
                .stop_bits(stop_bits)
                .flow_control(flow_control)
                .timeout(settings.base.receive_timeout())
                .open()
                .map_err(io::Error::from)?;
            port.write_data_terminal_ready(settings.dtr_enable)
                .map_err(io::Error::from)?;
            port.write_request_to_send(settings.rts_enable)
                .map_err(io::Error::from)?;
            Ok(Box::new(SystemPort(port)))
        }
    }

    /// List serial devices present on this machine.
    pub fn available_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(io::Error::from)?;
        Ok(ports
            .into_iter()
            .map(|port| {
                let kind = match port.port_type {
                    serialport::SerialPortType::UsbPort(_) => "usb",
                    serialport::SerialPortType::PciPort => "pci",
                    serialport::SerialPortType::BluetoothPort => "bluetooth",
                    serialport::SerialPortType::Unknown => "unknown",
                };
                PortInfo {
                    name: port.port_name,
                    kind: kind.to_string(),
                }
            })
            .collect())
    }
}

#[cfg(feature = "serial")]
pub use system::{available_ports, SystemPortOpener};

/// Transport over one named serial port.
pub struct SerialTransport {
    inner: Arc<SerialInner>,
}

struct SerialInner {
    core: LinkCore,
    settings: SerialSettings,
    port_name: String,
    opener: Arc<dyn PortOpener>,
    port: Mutex<Option<SharedPort>>,
}

impl SerialTransport {
    /// Create a transport for a system serial port. Must be called inside a tokio runtime.
    #[cfg(feature = "serial")]
    pub fn new(port_name: impl Into<String>, settings: SerialSettings) -> Result<Self> {
        Self::with_opener(port_name, settings, Arc::new(SystemPortOpener))
    }

    /// Create a transport that opens its port through `opener`.
    pub fn with_opener(
        port_name: impl Into<String>,
        settings: SerialSettings,
        opener: Arc<dyn PortOpener>,
    ) -> Result<Self> {
        settings.validate()?;
        let port_name = port_name.into();
        if port_name.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "serial port name must not be empty".to_string(),
            ));
        }

        let core = LinkCore::new("serial", &settings.base)?;
        Ok(Self {
            inner: Arc::new(SerialInner {
                core,
                settings,
                port_name,
                opener,
                port: Mutex::new(None),
            }),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.inner.port_name
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.inner.settings
    }
}

fn join_error(err: tokio::task::JoinError) -> io::Error {
    io::Error::other(err)
}

/// Read whatever is waiting on the port, up to `max` bytes.
fn read_available(port: &SharedPort, max: usize) -> io::Result<Option<Bytes>> {
    let mut port = lock(port);
    let available = port.bytes_to_read()? as usize;
    if available == 0 {
        return Ok(None);
    }

    let mut buf = vec![0u8; available.min(max)];
    match port.read(&mut buf) {
        Ok(0) => Ok(None),
        Ok(read) => {
            buf.truncate(read);
            Ok(Some(Bytes::from(buf)))
        }
        Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(None),
        Err(err) => Err(err),
    }
}

async fn next_chunk(port: &SharedPort, max: usize, poll_interval: Duration) -> io::Result<Bytes> {
    loop {
        let shared = Arc::clone(port);
        let read = tokio::task::spawn_blocking(move || read_available(&shared, max))
            .await
            .map_err(join_error)??;
        if let Some(chunk) = read {
            return Ok(chunk);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

impl SerialInner {
    fn current_port(&self) -> Option<SharedPort> {
        lock(&self.port).clone()
    }

    fn install(&self, port: Box<dyn SerialStream>) -> SharedPort {
        let port = Arc::new(Mutex::new(port));
        *lock(&self.port) = Some(Arc::clone(&port));
        port
    }

    fn release(&self) {
        lock(&self.port).take();
    }

    async fn open_port(&self) -> Result<Box<dyn SerialStream>> {
        let opener = Arc::clone(&self.opener);
        let settings = self.settings.clone();
        let name = self.port_name.clone();
        let timeout = self.settings.base.connection_timeout();

        let opening = tokio::task::spawn_blocking(move || opener.open(&name, &settings));
        let opened = match tokio::time::timeout(timeout, opening).await {
            Ok(joined) => joined.map_err(join_error).and_then(|result| result),
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    addr: self.port_name.clone(),
                    timeout,
                })
            }
        };
        opened.map_err(|source| TransportError::SerialOpen {
            port: self.port_name.clone(),
            source,
        })
    }

    async fn write_all(&self, port: SharedPort, data: &[u8]) -> Result<()> {
        let data = data.to_vec();
        let writing = tokio::task::spawn_blocking(move || {
            let mut port = lock(&port);
            port.write_all(&data)?;
            port.flush()
        });

        let timeout = self.settings.base.send_timeout();
        match tokio::time::timeout(timeout, writing).await {
            Ok(joined) => Ok(joined.map_err(join_error)??),
            Err(_) => Err(TransportError::SendTimeout { timeout }),
        }
    }

    async fn poll_loop(self: Arc<Self>, mut port: SharedPort, mut ctx: SessionContext) {
        let max = self.settings.base.buffer_size;
        let poll_interval = self.settings.poll_interval();

        loop {
            let reason = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                Some(reason) = ctx.faults.recv() => reason,
                chunk = next_chunk(&port, max, poll_interval) => match chunk {
                    Ok(chunk) => {
                        self.core.deliver(chunk);
                        continue;
                    }
                    Err(err) => {
                        if ctx.cancel.is_cancelled() {
                            break;
                        }
                        self.core.report_error(err);
                        DisconnectReason::Unknown
                    }
                },
            };

            self.release();
            let reopened = self
                .core
                .handle_link_loss(reason, &ctx.cancel, |_| self.open_port())
                .await;
            match reopened {
                Some(reopened) => {
                    port = self.install(reopened);
                    ctx.clear_faults();
                    self.core.mark_open();
                }
                None => break,
            }
        }
        debug!(port = %self.port_name, "serial poll loop stopped");
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> &'static str {
        self.inner.core.kind()
    }

    fn state(&self) -> ConnectionState {
        self.inner.core.state()
    }

    fn is_connected(&self) -> bool {
        self.inner.core.is_open()
    }

    fn events(&self) -> &EventHub {
        self.inner.core.events()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.inner.core.metrics().snapshot()
    }

    fn runtime(&self) -> &Handle {
        self.inner.core.runtime()
    }

    async fn connect(&self) -> Result<bool> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        let _ops = inner.core.lock_ops().await;
        inner.core.ensure_live()?;
        if inner.core.state() == ConnectionState::Open {
            return Ok(true);
        }

        inner.core.stop_session().await;
        inner.core.set_state(ConnectionState::Connecting);
        let opened = tokio::select! {
            biased;
            _ = inner.core.root_token().cancelled() => {
                inner.core.set_state(ConnectionState::Closed);
                return Ok(false);
            }
            result = inner.open_port() => result,
        };

        match opened {
            Ok(port) => {
                let port = inner.install(port);
                let loop_inner = Arc::clone(inner);
                inner
                    .core
                    .start_session(move |ctx| loop_inner.poll_loop(port, ctx));
                inner.core.mark_open();
                info!(
                    port = %inner.port_name,
                    baud_rate = inner.settings.baud_rate,
                    "serial port opened"
                );
                Ok(true)
            }
            Err(TransportError::ConnectTimeout { addr, timeout }) => {
                warn!(port = %addr, ?timeout, "serial open timed out");
                inner
                    .core
                    .events()
                    .emit(TransportEvent::ConnectionLost(DisconnectReason::Timeout));
                inner.core.set_state(ConnectionState::Closed);
                Ok(false)
            }
            Err(err) => {
                inner.core.report_error(err);
                inner.core.set_state(ConnectionState::Closed);
                Ok(false)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        let _ops = inner.core.lock_ops().await;
        let previous = inner.core.state();
        inner.core.stop_session().await;
        inner.release();
        inner.core.clear_inbox();
        inner.core.mark_closed(previous);
        if previous != ConnectionState::Closed {
            info!(port = %inner.port_name, "serial port closed");
        }
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<bool> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        if !inner.core.is_open() {
            return Ok(false);
        }
        let Some(port) = inner.current_port() else {
            return Ok(false);
        };

        let _permit = inner.core.acquire_send().await?;
        let started = Instant::now();
        match inner.write_all(port, data).await {
            Ok(()) => {
                inner
                    .core
                    .metrics()
                    .record_send(data.len(), started.elapsed());
                if inner.core.trace_frames() {
                    debug!(len = data.len(), "serial data written");
                }
                Ok(true)
            }
            Err(err) => {
                inner.core.metrics().record_send_failure();
                inner.core.report_error(err);
                inner.core.report_fault(DisconnectReason::TransmissionError);
                Ok(false)
            }
        }
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        self.inner.core.receive().await
    }

    async fn dispose(&self) {
        let inner = &self.inner;
        if !inner.core.begin_dispose() {
            return;
        }
        let _ops = inner.core.lock_ops().await;
        let previous = inner.core.state();
        inner.core.stop_session().await;
        inner.release();
        inner.core.clear_inbox();
        inner.core.mark_closed(previous);
        debug!(port = %inner.port_name, "serial transport disposed");
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.inner.core.cancel_all();
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.inner.port_name)
            .field("baud_rate", &self.inner.settings.baud_rate)
            .field("state", &self.inner.core.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        pending: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialStream for Scripted {
        fn bytes_to_read(&self) -> io::Result<u32> {
            Ok(self.pending.len() as u32)
        }
    }

    #[test]
    fn reads_are_capped_at_buffer_size() {
        let port: SharedPort = Arc::new(Mutex::new(Box::new(Scripted {
            pending: b"abcdef".to_vec(),
        })));

        let first = read_available(&port, 4).unwrap().unwrap();
        let second = read_available(&port, 4).unwrap().unwrap();
        assert_eq!(first.as_ref(), b"abcd");
        assert_eq!(second.as_ref(), b"ef");
        assert!(read_available(&port, 4).unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_empty_port_name() {
        struct NeverOpens;
        impl PortOpener for NeverOpens {
            fn open(&self, _: &str, _: &SerialSettings) -> io::Result<Box<dyn SerialStream>> {
                Err(io::Error::from(io::ErrorKind::NotFound))
            }
        }

        let result = SerialTransport::with_opener(" ", SerialSettings::default(), Arc::new(NeverOpens));
        assert!(matches!(result, Err(TransportError::InvalidArgument(_))));
    }
    #[cfg(feature = "serial")]
    #[test]
    fn combined_handshake_uses_hardware_flow_control() {
        use crate::settings::Handshake;

        assert_eq!(
            system::flow_control(Handshake::RequestToSendXonXoff),
            serialport::FlowControl::Hardware
        );
        assert_eq!(
            system::flow_control(Handshake::XonXoff),
            serialport::FlowControl::Software
        );
    }

    #[cfg(feature = "serial")]
    #[test]
    fn one_and_a_half_stop_bits_is_unsupported() {
        use crate::settings::StopBits;

        let err = system::stop_bits(StopBits::OnePointFive).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert_eq!(
            system::stop_bits(StopBits::Two).unwrap(),
            serialport::StopBits::Two
        );
    }
}
