#![cfg(feature = "cli")]

use std::io::{Read, Write};
use std::net::{TcpListener, UdpSocket};
use std::process::Command;
use std::thread;
use std::time::Duration;

use hostlink_frame::{encode_prefix, PREFIX_SIZE};

fn hostlink() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_hostlink"));
    command.arg("--log-level").arg("error");
    command
}

fn write_config(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
    file.write_all(json.as_bytes())
        .expect("config should be written");
    file
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    listener
        .local_addr()
        .expect("listener should have an address")
        .port()
}

#[test]
fn check_prints_effective_config() {
    let file = write_config(r#"{"protocol_type": "tcp", "port": 7001, "process_name": "sim"}"#);

    let output = hostlink()
        .arg("--format")
        .arg("json")
        .arg("check")
        .arg(file.path())
        .output()
        .expect("check should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let config: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("check output should be JSON");
    assert_eq!(config["transport_type"], "tcp");
    assert_eq!(config["port"], 7001);
    assert_eq!(config["host"], "127.0.0.1");
}

#[test]
fn check_rejects_incomplete_config() {
    let file = write_config(r#"{"transport_type": "tcp"}"#);

    let output = hostlink()
        .arg("check")
        .arg(file.path())
        .output()
        .expect("check should run");

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("port"));
}

#[test]
fn check_rejects_malformed_json() {
    let file = write_config("{\"transport_type\": ");

    let output = hostlink()
        .arg("check")
        .arg(file.path())
        .output()
        .expect("check should run");

    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn udp_send_delivers_one_datagram() {
    let peer = UdpSocket::bind("127.0.0.1:0").expect("peer should bind");
    peer.set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout should be set");
    let port = peer.local_addr().expect("peer address").port();

    let status = hostlink()
        .args(["send", "--transport", "udp", "--port"])
        .arg(port.to_string())
        .args(["--data", "hello over udp"])
        .status()
        .expect("send should run");
    assert!(status.success());

    let mut buf = [0u8; 1024];
    let (len, _) = peer.recv_from(&mut buf).expect("datagram should arrive");
    assert_eq!(&buf[..len], b"hello over udp");
}

#[test]
fn tcp_send_wait_prints_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let port = listener.local_addr().expect("listener address").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("client should connect");
        let mut prefix = [0u8; PREFIX_SIZE];
        stream.read_exact(&mut prefix).expect("prefix should arrive");
        let len = u64::from_le_bytes(prefix) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).expect("payload should arrive");

        let mut reply = b"ack:".to_vec();
        reply.extend_from_slice(&payload);
        stream
            .write_all(&encode_prefix(reply.len()))
            .expect("reply prefix should be written");
        stream.write_all(&reply).expect("reply should be written");
        thread::sleep(Duration::from_millis(200));
    });

    let output = hostlink()
        .args(["--format", "json", "send", "--transport", "tcp", "--port"])
        .arg(port.to_string())
        .args(["--json", r#"{"cmd":"ping"}"#, "--wait", "--wait-timeout", "5s"])
        .output()
        .expect("send should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("reply output should be JSON");
    assert_eq!(reply["transport"], "tcp");
    assert_eq!(reply["payload"], r#"ack:{"cmd":"ping"}"#);
    assert_eq!(reply["source"], format!("127.0.0.1:{port}"));

    server.join().expect("server thread should finish");
}

#[test]
fn send_to_closed_port_fails() {
    let port = closed_port();

    let output = hostlink()
        .args(["send", "--transport", "tcp", "--timeout", "2s", "--port"])
        .arg(port.to_string())
        .args(["--data", "nobody home"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect"));
}

#[test]
fn send_without_target_is_usage_error() {
    let output = hostlink()
        .args(["send", "--data", "x"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn extended_version_lists_transports() {
    let output = hostlink()
        .args(["version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: hostlink"));
    assert!(stdout.contains("transports: InMemory, Serial, TCP, UDP"));
}
