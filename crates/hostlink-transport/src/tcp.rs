//! Stream transport over TCP.
//!
//! Messages are framed as `[u64 LE length][payload]`. One background task
//! reads frames and owns reconnection; sends share the write half behind
//! the send lock.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use hostlink_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::event::{EventHub, TransportEvent};
use crate::link::{LinkCore, SessionContext};
use crate::metrics::MetricsSnapshot;
use crate::settings::TcpSettings;
use crate::state::{ConnectionState, DisconnectReason};
use crate::traits::Transport;

/// Client-side TCP transport.
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

struct TcpInner {
    core: LinkCore,
    settings: TcpSettings,
    host: String,
    port: u16,
    writer: Mutex<Option<FrameWriter<OwnedWriteHalf>>>,
}

impl TcpTransport {
    /// Create a transport for `host:port`. Must be called inside a tokio runtime.
    pub fn new(host: impl Into<String>, port: u16, settings: TcpSettings) -> Result<Self> {
        settings.validate()?;
        let host = host.into();
        if host.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "tcp host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(TransportError::InvalidArgument(
                "tcp port must not be zero".to_string(),
            ));
        }

        let core = LinkCore::new("tcp", &settings.base)?;
        debug!(
            keep_alive_interval_ms = settings.keep_alive_interval_ms,
            keep_alive_time_ms = settings.keep_alive_time_ms,
            keep_alive_retry_count = settings.keep_alive_retry_count,
            "tcp keep-alive timing left to the operating system"
        );

        Ok(Self {
            inner: Arc::new(TcpInner {
                core,
                settings,
                host,
                port,
                writer: Mutex::new(None),
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.inner.settings
    }
}

impl TcpInner {
    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            chunk_size: self.settings.base.max_message_size.max(1),
            max_frame_len: Some(self.settings.max_frame_size),
        }
    }

    fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        let timeout = self.settings.base.connection_timeout();
        match tokio::time::timeout(timeout, self.dial()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout {
                addr: self.label(),
                timeout,
            }),
        }
    }

    async fn dial(&self) -> Result<TcpStream> {
        let connect_err = |source: io::Error| TransportError::Connect {
            addr: self.label(),
            source,
        };

        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(connect_err)?;
        self.apply_socket_options(&socket).map_err(connect_err)?;

        let stream = socket.connect(addr).await.map_err(connect_err)?;
        stream
            .set_nodelay(self.settings.no_delay)
            .map_err(connect_err)?;
        debug!(%addr, "tcp socket connected");
        Ok(stream)
    }

    fn apply_socket_options(&self, socket: &TcpSocket) -> io::Result<()> {
        socket.set_reuseaddr(self.settings.reuse_address)?;
        socket.set_keepalive(self.settings.keep_alive)?;
        socket.set_send_buffer_size(self.settings.send_buffer_size)?;
        socket.set_recv_buffer_size(self.settings.receive_buffer_size)?;
        if let Some(seconds) = self.settings.linger_seconds {
            socket.set_linger(Some(Duration::from_secs(seconds)))?;
        }
        Ok(())
    }

    async fn install(&self, stream: TcpStream) -> FrameReader<OwnedReadHalf> {
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(FrameWriter::with_config(write_half, self.frame_config()));
        FrameReader::with_config(read_half, self.frame_config())
    }

    async fn close_writer(&self) {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        if let Err(err) = writer.shutdown().await {
            let already_gone = matches!(
                &err,
                hostlink_frame::FrameError::Io(io) if io.kind() == io::ErrorKind::NotConnected
            );
            if already_gone {
                debug!("tcp write half already disconnected");
            } else {
                self.core.report_error(err);
            }
        }
    }

    async fn receive_loop(
        self: Arc<Self>,
        mut reader: FrameReader<OwnedReadHalf>,
        mut ctx: SessionContext,
    ) {
        loop {
            let reason = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                Some(reason) = ctx.faults.recv() => reason,
                frame = reader.read_frame() => match frame {
                    Ok(Some(payload)) => {
                        self.core.deliver(payload);
                        continue;
                    }
                    Ok(None) => {
                        info!(host = %self.host, port = self.port, "peer closed the connection");
                        DisconnectReason::Normal
                    }
                    Err(FrameError::PayloadTooLarge { size, max }) => {
                        warn!(host = %self.host, port = self.port, size, max, "peer sent an oversized frame");
                        self.core.report_error(io::Error::new(
                            io::ErrorKind::InvalidData,
                            FrameError::PayloadTooLarge { size, max },
                        ));
                        DisconnectReason::ProtocolError
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

            self.writer.lock().await.take();
            let reopened = self
                .core
                .handle_link_loss(reason, &ctx.cancel, |_| self.open_stream())
                .await;
            match reopened {
                Some(stream) => {
                    reader = self.install(stream).await;
                    ctx.clear_faults();
                    self.core.mark_open();
                }
                None => break,
            }
        }
        debug!(host = %self.host, port = self.port, "tcp receive loop stopped");
    }
}

#[async_trait]
impl Transport for TcpTransport {
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
            result = inner.open_stream() => result,
        };

        match opened {
            Ok(stream) => {
                let reader = inner.install(stream).await;
                let loop_inner = Arc::clone(inner);
                inner
                    .core
                    .start_session(move |ctx| loop_inner.receive_loop(reader, ctx));
                inner.core.mark_open();
                info!(host = %inner.host, port = inner.port, "tcp connected");
                Ok(true)
            }
            Err(TransportError::ConnectTimeout { addr, timeout }) => {
                warn!(%addr, ?timeout, "tcp connect timed out");
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
        inner.close_writer().await;
        inner.core.clear_inbox();
        inner.core.mark_closed(previous);
        if previous != ConnectionState::Closed {
            info!(host = %inner.host, port = inner.port, "tcp disconnected");
        }
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<bool> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        if !inner.core.is_open() {
            return Ok(false);
        }

        let _permit = inner.core.acquire_send().await?;
        let started = Instant::now();
        let mut writer = inner.writer.lock().await;
        let Some(frame_writer) = writer.as_mut() else {
            return Ok(false);
        };

        let timeout = inner.settings.base.send_timeout();
        let failure = match tokio::time::timeout(timeout, frame_writer.send(data)).await {
            Ok(Ok(())) => {
                inner
                    .core
                    .metrics()
                    .record_send(data.len(), started.elapsed());
                if inner.core.trace_frames() {
                    debug!(len = data.len(), "tcp message sent");
                }
                return Ok(true);
            }
            Ok(Err(err)) => TransportError::from(err),
            Err(_) => TransportError::SendTimeout { timeout },
        };

        writer.take();
        drop(writer);
        inner.core.metrics().record_send_failure();
        inner.core.report_error(failure);
        inner.core.report_fault(DisconnectReason::TransmissionError);
        Ok(false)
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
        inner.close_writer().await;
        inner.core.clear_inbox();
        inner.core.mark_closed(previous);
        debug!(host = %inner.host, port = inner.port, "tcp transport disposed");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.inner.core.cancel_all();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("state", &self.inner.core.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_host_and_zero_port() {
        assert!(matches!(
            TcpTransport::new("", 80, TcpSettings::default()),
            Err(TransportError::InvalidArgument(_))
        ));
        assert!(matches!(
            TcpTransport::new("127.0.0.1", 0, TcpSettings::default()),
            Err(TransportError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_settings() {
        let mut settings = TcpSettings::default();
        settings.send_buffer_size = 0;
        assert!(matches!(
            TcpTransport::new("127.0.0.1", 80, settings),
            Err(TransportError::Settings(_))
        ));
    }

    #[tokio::test]
    async fn send_before_connect_returns_false() {
        let transport = TcpTransport::new("127.0.0.1", 9, TcpSettings::default())
            .expect("transport should build");
        assert!(!transport.is_connected());
        assert!(!transport.send(b"hello").await.unwrap());
    }
}
