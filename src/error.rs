use std::io;
use thiserror::Error;

/// Failure to open the UDP endpoint
#[derive(Error, Debug)]
pub enum BindError {
    #[error("Port {0} is out of range (1-65535)")]
    OutOfRange(u32),

    #[error("Invalid port '{0}'")]
    InvalidPort(String),

    #[error("Cannot listen on port {port}: {source}")]
    Io {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Listener is not running")]
    ListenerStopped,
}

/// Datagram could not be turned into text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Empty datagram")]
    Empty,

    #[error("Datagram is not valid UTF-8 (valid up to byte {valid_up_to} of {len})")]
    InvalidUtf8 { valid_up_to: usize, len: usize },
}

/// Text did not match the configured wire grammar
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Empty packet")]
    Empty,

    #[error("Missing leading 's' tag")]
    MissingStartTag,

    #[error("Missing trailing ';' terminator")]
    MissingTerminator,

    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Invalid number '{token}' at field {position}")]
    InvalidNumber { position: usize, token: String },

    #[error("Non-finite value '{token}' at field {position}")]
    NonFinite { position: usize, token: String },

    #[error("Invalid group tag '{token}' at field {position}")]
    InvalidTag { position: usize, token: String },

    #[error("Group {tag} at field {position} has fewer than 3 values")]
    TruncatedGroup { tag: i64, position: usize },
}

/// Anything that stops a datagram from becoming a packet
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Raw buffer lock poisoned")]
    Poisoned,
}

/// Invalid or unreadable configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
