//! Session error type.

/// Errors surfaced by the session core.
///
/// Transport failures never escape the public connect/disconnect API; they
/// are reported through the log buffer and `on_disconnect` instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid server endpoint {host:?}:{port}")]
    InvalidEndpoint { host: String, port: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed {kind} packet: {reason}")]
    MalformedPacket { kind: &'static str, reason: String },

    #[error("config error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("client token error: {0}")]
    ClientToken(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
