use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum FixError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Message parsing error: {0}")]
    ParseError(String),

    #[error("Missing required field: tag {0}")]
    MissingField(u32),

    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Logon timed out")]
    LogonTimeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection is closed")]
    Closed,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}
