//! Error types for the audio streaming application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire framing errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Bad magic, unknown type, or a length below the header size.
    #[error("Invalid frame: {0}")]
    Framing(String),

    /// Declared length exceeds the message cap.
    #[error("Frame of {0} bytes exceeds maximum")]
    Oversize(u32),

    /// Peer closed the connection at a frame boundary.
    #[error("Peer disconnected")]
    Disconnected,

    /// Audio payload not a whole number of f32 samples.
    #[error("Audio payload of {0} bytes is not sample-aligned")]
    Alignment(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connect timed out")]
    Timeout,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
