use std::fmt;
use std::io;

use hostlink_factory::FactoryError;
use hostlink_frame::FrameError;
use hostlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(&err), format!("{context}: {err}"))
}

fn frame_code(err: &FrameError) -> i32 {
    match err {
        FrameError::Io(source) => io_code(source),
        FrameError::PayloadTooLarge { .. } => DATA_INVALID,
        FrameError::ConnectionClosed => FAILURE,
        _ => TRANSPORT_ERROR,
    }
}

fn transport_code(err: &TransportError) -> i32 {
    match err {
        TransportError::Connect { source, .. }
        | TransportError::Bind { source, .. }
        | TransportError::SerialOpen { source, .. }
        | TransportError::Io(source) => io_code(source),
        TransportError::ConnectTimeout { .. } | TransportError::SendTimeout { .. } => TIMEOUT,
        TransportError::Settings(_) | TransportError::InvalidArgument(_) => USAGE,
        TransportError::Frame(frame) => frame_code(frame),
        TransportError::NoRuntime(_) | TransportError::Disposed { .. } => INTERNAL,
        _ => TRANSPORT_ERROR,
    }
}

/// Map a transport error, including ones observed through the error event.
pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    CliError::new(transport_code(err), format!("{context}: {err}"))
}

pub fn factory_error(context: &str, err: FactoryError) -> CliError {
    let code = match &err {
        FactoryError::Io { source, .. } => io_code(source),
        FactoryError::Json(_) => DATA_INVALID,
        FactoryError::Transport(inner) => transport_code(inner),
        FactoryError::Settings { .. }
        | FactoryError::MissingField { .. }
        | FactoryError::MissingType
        | FactoryError::UnknownTransport { .. } => USAGE,
    };
    CliError::new(code, format!("{context}: {err}"))
}
