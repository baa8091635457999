//! Transport: TCP/TLS streams, framing, and configuration.

mod config;
mod framed;
mod stream;

pub use config::{SessionConfig, TlsVerify};
pub use framed::FramedStream;
pub use stream::{ImapStream, connect_plain, connect_tls, tls_connector};
