//! Talk to external programs and devices through interchangeable transports.
//!
//! # Crate Structure
//!
//! - [`frame`]: Stream length-prefix codec and reliable-datagram chunk/ack codec
//! - [`transport`]: The `Transport` contract, settings, events and the TCP, UDP,
//!   serial and in-process implementations
//! - [`factory`]: `ProgramConfig` loading and config-driven transport construction

/// Re-export frame types.
pub mod frame {
    pub use hostlink_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use hostlink_transport::*;
}

/// Re-export factory types.
pub mod factory {
    pub use hostlink_factory::*;
}
