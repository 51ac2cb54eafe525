//! Error types for the audio bridge

use thiserror::Error;

use crate::protocol::ChannelId;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Audio engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device has no playback channels: {0}")]
    NoPlaybackChannels(String),

    #[error("Failed to register port {0}")]
    PortRegistration(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Byte-stream transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed on {channel} channel: {reason}")]
    ConnectFailed { channel: ChannelId, reason: String },

    #[error("Listen failed on {channel} channel: {reason}")]
    BindFailed { channel: ChannelId, reason: String },

    #[error("Channel closed")]
    Closed,

    #[error("Short read: wanted {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Short write: wanted {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("Transport not available: {0}")]
    Unsupported(String),
}

/// Control packet framing errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("Bad start marker: {0:#04x}")]
    BadStartMarker(u8),

    #[error("Bad end marker: {0:#04x}")]
    BadEndMarker(u8),

    #[error("Truncated packet: {0} bytes")]
    Truncated(usize),
}

impl From<cpal::DevicesError> for EngineError {
    fn from(e: cpal::DevicesError) -> Self {
        EngineError::CpalError(e.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for EngineError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        EngineError::DeviceNotFound(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for EngineError {
    fn from(e: cpal::BuildStreamError) -> Self {
        EngineError::StreamError(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for EngineError {
    fn from(e: cpal::PlayStreamError) -> Self {
        EngineError::StreamError(e.to_string())
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
