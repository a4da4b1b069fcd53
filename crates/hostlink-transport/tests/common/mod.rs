#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use hostlink_frame::{encode_frame, FrameReader};
use hostlink_transport::{ProtocolSettings, TransportEvent};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

pub const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Short timeouts and quick reconnects so failure paths finish fast.
pub fn fast_base() -> ProtocolSettings {
    ProtocolSettings {
        connection_timeout_ms: 1000,
        send_timeout_ms: 1000,
        receive_timeout_ms: 2000,
        reconnect_delay_ms: 10,
        max_reconnect_delay_ms: 50,
        max_reconnect_attempts: 3,
        ..ProtocolSettings::default()
    }
}

/// Wait for the first event matching `pred`, returning everything seen up to and including it.
pub async fn collect_until<F>(
    rx: &mut UnboundedReceiver<TransportEvent>,
    mut pred: F,
) -> Vec<TransportEvent>
where
    F: FnMut(&TransportEvent) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            let event = rx.recv().await.expect("event stream should stay open");
            let done = pred(&event);
            seen.push(event);
            if done {
                return;
            }
        }
    })
    .await
    .expect("expected event should arrive in time");
    seen
}

/// Events already queued, without waiting.
pub fn drain(rx: &mut UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    listener.local_addr().expect("listener should have an address")
}

/// Echo every frame back, written a few bytes at a time.
pub async fn echo_connection(stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    while let Ok(Some(payload)) = reader.read_frame().await {
        let mut frame = BytesMut::new();
        encode_frame(&payload, &mut frame);
        for piece in frame.chunks(7) {
            if write_half.write_all(piece).await.is_err() {
                return;
            }
        }
    }
}

pub async fn spawn_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("echo server should bind");
    let addr = listener.local_addr().expect("echo server should have an address");
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(echo_connection(stream));
        }
    });
    (addr, task)
}
