//! Datagram transport over UDP.
//!
//! Unreliable mode sends each message as one raw datagram. Reliable mode
//! splits messages into chunks, acknowledges every chunk, retransmits on a
//! timer and reassembles on the receiving side; see [`hostlink_frame::datagram`]
//! for the wire layout.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use hostlink_frame::{
    classify, encode_ack, split_into_chunks, Ack, Datagram, FrameError, ACK_SIZE,
    MAX_DATAGRAM_SIZE,
};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::event::{EventHub, TransportEvent};
use crate::link::{LinkCore, SessionContext};
use crate::metrics::MetricsSnapshot;
use crate::reliable::{Inbound, InboundTracker, OutboundTracker};
use crate::settings::UdpSettings;
use crate::state::{ConnectionState, DisconnectReason};
use crate::traits::Transport;

/// Delivered sequences remembered for duplicate suppression.
const COMPLETED_SEQUENCE_MEMORY: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn initial_sequence() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(1)
}

/// UDP transport bound to one remote peer.
pub struct UdpTransport {
    inner: Arc<UdpInner>,
}

struct UdpInner {
    core: LinkCore,
    settings: UdpSettings,
    host: String,
    port: u16,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    send_lock: tokio::sync::Mutex<()>,
    outbound: Mutex<OutboundTracker>,
    inbound: Mutex<InboundTracker>,
    next_sequence: AtomicU64,
}

impl UdpTransport {
    /// Create a transport for the peer at `host:port`. Must be called inside a tokio runtime.
    pub fn new(host: impl Into<String>, port: u16, settings: UdpSettings) -> Result<Self> {
        settings.validate()?;
        let host = host.into();
        if host.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "udp host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(TransportError::InvalidArgument(
                "udp port must not be zero".to_string(),
            ));
        }

        let core = LinkCore::new("udp", &settings.base)?;
        if settings.dont_fragment {
            debug!("udp don't-fragment flag is not applied");
        }

        Ok(Self {
            inner: Arc::new(UdpInner {
                core,
                settings,
                host,
                port,
                socket: Mutex::new(None),
                send_lock: tokio::sync::Mutex::new(()),
                outbound: Mutex::new(OutboundTracker::default()),
                inbound: Mutex::new(InboundTracker::new(COMPLETED_SEQUENCE_MEMORY)),
                next_sequence: AtomicU64::new(initial_sequence()),
            }),
        })
    }

    pub fn settings(&self) -> &UdpSettings {
        &self.inner.settings
    }

    /// Local address of the bound socket while connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .current_socket()
            .and_then(|socket| socket.local_addr().ok())
    }
}

impl UdpInner {
    fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn current_socket(&self) -> Option<Arc<UdpSocket>> {
        lock(&self.socket).clone()
    }

    fn install(&self, socket: UdpSocket) -> Arc<UdpSocket> {
        let socket = Arc::new(socket);
        *lock(&self.socket) = Some(Arc::clone(&socket));
        lock(&self.inbound).reset_partial();
        socket
    }

    /// Drop the socket and fail every reliable send still waiting on it.
    fn release(&self) {
        lock(&self.socket).take();
        lock(&self.outbound).fail_all();
        lock(&self.inbound).reset_partial();
    }

    async fn open_socket(&self) -> Result<UdpSocket> {
        let timeout = self.settings.base.connection_timeout();
        match tokio::time::timeout(timeout, self.bind_and_connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout {
                addr: self.label(),
                timeout,
            }),
        }
    }

    async fn bind_and_connect(&self) -> Result<UdpSocket> {
        let connect_err = |source: io::Error| TransportError::Connect {
            addr: self.label(),
            source,
        };

        let remote = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })?;

        let mut local = self.settings.local_bind;
        if self.settings.enable_multicast && local.port() == 0 {
            local.set_port(self.settings.multicast_port);
        }
        if remote.is_ipv6() && local.is_ipv4() && local.ip().is_unspecified() {
            local = SocketAddr::from(([0u16; 8], local.port()));
        }

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local.to_string(),
                source,
            })?;
        self.apply_socket_options(&socket, local)?;
        socket.connect(remote).await.map_err(connect_err)?;
        debug!(%local, %remote, "udp socket connected");
        Ok(socket)
    }

    fn apply_socket_options(&self, socket: &UdpSocket, local: SocketAddr) -> io::Result<()> {
        socket.set_broadcast(self.settings.broadcast)?;
        if local.is_ipv4() {
            socket.set_ttl(self.settings.time_to_live)?;
        }
        if self.settings.enable_multicast {
            socket.set_multicast_loop_v4(self.settings.multicast_loopback)?;
            socket.set_multicast_ttl_v4(self.settings.time_to_live)?;
            socket.join_multicast_v4(self.settings.multicast_group, Ipv4Addr::UNSPECIFIED)?;
            info!(group = %self.settings.multicast_group, "joined multicast group");
        }
        Ok(())
    }

    async fn send_datagram(&self, socket: &UdpSocket, data: &[u8]) -> bool {
        if data.len() > self.settings.max_packet_size {
            self.core.report_error(FrameError::PayloadTooLarge {
                size: data.len(),
                max: self.settings.max_packet_size,
            });
            return false;
        }

        let _guard = self.send_lock.lock().await;
        let timeout = self.settings.base.send_timeout();
        match tokio::time::timeout(timeout, socket.send(data)).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                self.on_send_error(err);
                false
            }
            Err(_) => {
                self.core
                    .report_error(TransportError::SendTimeout { timeout });
                false
            }
        }
    }

    async fn send_reliable(&self, socket: &UdpSocket, data: &[u8]) -> bool {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let chunks = match split_into_chunks(sequence, data, self.settings.max_packet_size) {
            Ok(chunks) => chunks,
            Err(err) => {
                self.core.report_error(err);
                return false;
            }
        };

        let done = lock(&self.outbound).register(sequence, chunks.clone());
        {
            let _guard = self.send_lock.lock().await;
            for chunk in &chunks {
                if let Err(err) = socket.send(chunk).await {
                    lock(&self.outbound).forget(sequence);
                    self.on_send_error(err);
                    return false;
                }
            }
        }
        if self.core.trace_frames() {
            debug!(sequence, chunks = chunks.len(), len = data.len(), "reliable send transmitted");
        }

        let deadline = self.settings.reliable_send_deadline();
        match tokio::time::timeout(deadline, done).await {
            Ok(Ok(true)) => true,
            _ => {
                lock(&self.outbound).forget(sequence);
                if self.core.is_open() {
                    self.core.report_error(TransportError::Unacknowledged {
                        sequence,
                        retransmissions: self.settings.max_retransmissions,
                    });
                }
                false
            }
        }
    }

    fn on_send_error(&self, err: io::Error) {
        let transient = err.kind() == io::ErrorKind::ConnectionRefused;
        self.core.report_error(err);
        if !transient {
            self.core.report_fault(DisconnectReason::TransmissionError);
        }
    }

    async fn on_tick(&self, socket: &UdpSocket) {
        let plan = lock(&self.outbound).due(
            Instant::now(),
            self.settings.ack_timeout(),
            self.settings.max_retransmissions,
        );
        for sequence in &plan.exhausted {
            warn!(sequence, "reliable send ran out of retransmissions");
        }
        if !plan.resend.is_empty() {
            debug!(chunks = plan.resend.len(), "retransmitting unacknowledged chunks");
        }
        for datagram in plan.resend {
            if let Err(err) = socket.send(&datagram).await {
                debug!(error = %err, "retransmission failed");
            }
        }

        let swept = lock(&self.inbound).sweep(self.settings.reassembly_timeout());
        if swept > 0 {
            debug!(swept, "discarded stale partial messages");
        }
    }

    async fn on_datagram(&self, socket: &UdpSocket, datagram: Bytes) {
        if !self.settings.enable_reliable_delivery {
            self.core.deliver(datagram);
            return;
        }

        match classify(datagram) {
            Ok(Datagram::Ack(ack)) => {
                let outcome = lock(&self.outbound).acknowledge(ack);
                if self.core.trace_frames() {
                    debug!(sequence = ack.sequence, index = ack.chunk_index, ?outcome, "ack received");
                }
            }
            Ok(Datagram::Chunk { header, payload }) => {
                let accepted = lock(&self.inbound).accept(header, payload);
                let inbound = match accepted {
                    Ok(inbound) => inbound,
                    Err(err) => {
                        self.core.report_error(err);
                        return;
                    }
                };

                let mut ack = BytesMut::with_capacity(ACK_SIZE);
                encode_ack(
                    Ack {
                        sequence: header.sequence,
                        chunk_index: header.chunk_index,
                    },
                    &mut ack,
                );
                if let Err(err) = socket.send(&ack).await {
                    debug!(error = %err, sequence = header.sequence, "ack send failed");
                }

                if let Inbound::Complete(message) = inbound {
                    self.core.deliver(message);
                }
            }
            Err(err) => self.core.report_error(err),
        }
    }

    async fn receive_loop(self: Arc<Self>, mut socket: Arc<UdpSocket>, mut ctx: SessionContext) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE.max(self.settings.base.buffer_size)];
        let mut tick = tokio::time::interval(self.settings.retransmit_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reason = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                Some(reason) = ctx.faults.recv() => reason,
                _ = tick.tick(), if self.settings.enable_reliable_delivery => {
                    self.on_tick(&socket).await;
                    continue;
                }
                received = socket.recv(&mut buf) => match received {
                    Ok(len) => {
                        let datagram = Bytes::copy_from_slice(&buf[..len]);
                        self.on_datagram(&socket, datagram).await;
                        continue;
                    }
                    Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                        self.core.report_error(err);
                        continue;
                    }
                    Err(err) => {
                        if ctx.cancel.is_cancelled() {
                            break;
                        }
                        self.core.report_error(err);
                        DisconnectReason::NetworkError
                    }
                },
            };

            self.release();
            let reopened = self
                .core
                .handle_link_loss(reason, &ctx.cancel, |_| self.open_socket())
                .await;
            match reopened {
                Some(new_socket) => {
                    socket = self.install(new_socket);
                    ctx.clear_faults();
                    self.core.mark_open();
                }
                None => break,
            }
        }
        debug!(host = %self.host, port = self.port, "udp receive loop stopped");
    }
}

#[async_trait]
impl Transport for UdpTransport {
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
            result = inner.open_socket() => result,
        };

        match opened {
            Ok(socket) => {
                let socket = inner.install(socket);
                let loop_inner = Arc::clone(inner);
                inner
                    .core
                    .start_session(move |ctx| loop_inner.receive_loop(socket, ctx));
                inner.core.mark_open();
                info!(
                    host = %inner.host,
                    port = inner.port,
                    reliable = inner.settings.enable_reliable_delivery,
                    "udp connected"
                );
                Ok(true)
            }
            Err(TransportError::ConnectTimeout { addr, timeout }) => {
                warn!(%addr, ?timeout, "udp connect timed out");
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
            info!(host = %inner.host, port = inner.port, "udp disconnected");
        }
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<bool> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        if !inner.core.is_open() {
            return Ok(false);
        }
        let Some(socket) = inner.current_socket() else {
            return Ok(false);
        };

        let _permit = inner.core.acquire_send().await?;
        let started = Instant::now();
        let delivered = if inner.settings.enable_reliable_delivery {
            inner.send_reliable(&socket, data).await
        } else {
            inner.send_datagram(&socket, data).await
        };

        if delivered {
            inner
                .core
                .metrics()
                .record_send(data.len(), started.elapsed());
        } else {
            inner.core.metrics().record_send_failure();
        }
        Ok(delivered)
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
        debug!(host = %inner.host, port = inner.port, "udp transport disposed");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.inner.core.cancel_all();
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("reliable", &self.inner.settings.enable_reliable_delivery)
            .field("state", &self.inner.core.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_zero_port() {
        assert!(matches!(
            UdpTransport::new("127.0.0.1", 0, UdpSettings::default()),
            Err(TransportError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn local_addr_is_none_until_connected() {
        let transport = UdpTransport::new("127.0.0.1", 9, UdpSettings::default())
            .expect("transport should build");
        assert!(transport.local_addr().is_none());
        assert!(!transport.send(b"x").await.unwrap());
    }
}
