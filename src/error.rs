//! Error types for framepace.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaceError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Sink errors
    #[error("Sink not connected: {addr}")]
    SinkNotConnected { addr: String },

    #[error("Sink backpressure: writer for {addr} is full")]
    SinkBackpressure { addr: String },

    #[error("Sink closed")]
    SinkClosed,

    #[error("Sink rejected frame: {message}")]
    SinkRejected { message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // WAV input for the synthetic producer
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PaceError>;
