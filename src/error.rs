//! Error taxonomy shared by both servers.
//!
//! Library code returns these typed errors; binaries wrap them in
//! [`anyhow::Error`] at the edges. Session-scoped variants are caught at the
//! worker root and mapped to a best-effort `END_SESSION` frame.

use thiserror::Error;

/// Startup-time configuration problem. Fatal: the process exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(&'static str),
    #[error("invalid value for {option}: {reason}")]
    Invalid { option: &'static str, reason: String },
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// TLS context setup failure. Fatal at startup.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot load certificate material: {0}")]
    CertLoad(String),
    #[error("cannot load private key material: {0}")]
    KeyLoad(String),
    #[error("tls handshake failed: {0}")]
    Handshake(#[from] rustls::Error),
    #[error("tls config error: {0}")]
    Config(String),
}

/// Malformed wire traffic. Session-scoped: ends the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown element tag {0}")]
    UnknownTag(u8),
    #[error("missing required element {0}")]
    MissingElement(&'static str),
    #[error("unexpected command {0:#x} in current state")]
    UnexpectedCommand(u8),
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },
    #[error("session id mismatch: expected {expected}, got {got}")]
    SessionIdMismatch { expected: u32, got: u32 },
    #[error("frame too short: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("bad protocol id: expected {expected:#x}, got {got:#x}")]
    BadProtocolId { expected: u8, got: u8 },
    #[error("body length mismatch: header says {declared}, frame carried {actual}")]
    BodyLengthMismatch { declared: u16, actual: usize },
    #[error("invalid string element: {0}")]
    InvalidString(#[from] std::str::Utf8Error),
    #[error("device name syntax invalid: {0}")]
    InvalidDeviceName(String),
}

/// Phone authentication failure. Session-scoped: ends the connection with
/// `REASON=INVALID_ELEMENT` or `REASON=UNKNOWN_DEVICE`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown device {0}")]
    UnknownDevice(String),
    #[error("password mismatch")]
    BadPassword,
    #[error("unknown certificate issuer")]
    UnknownIssuer,
    #[error("invalid sha2 hash-algorithm")]
    InvalidSha2HashAlgorithm,
    #[error("signature verification failed")]
    BadSignature,
    #[error("certificate parse error: {0}")]
    CertParse(String),
}

/// Persistence-layer failure. Session-scoped: logged and ends the connection.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record not found")]
    NotFound,
    #[error("malformed row: {0}")]
    Malformed(String),
}

/// Socket-level failure. Session-scoped: ends the connection silently.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read timed out")]
    Timeout,
    #[error("peer closed connection")]
    Closed,
}

/// Union of every session-scoped failure, used as the worker loop's error type.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] IoError),
}
