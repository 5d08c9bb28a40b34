//! Error types for the tape deck core.

use thiserror::Error;

/// Errors surfaced to the immediate caller.
///
/// Illegal lifecycle transitions are not represented here: they are reported
/// through the diagnostics sink and the call is ignored.
#[derive(Error, Debug)]
pub enum TapError {
    #[error("TAP file too short: {0} bytes, header alone is 20")]
    TooShort(usize),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("No cassette inserted")]
    NoTape,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    #[error("Timed out waiting for the hardware to stop")]
    TeardownTimeout,

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for tape deck operations.
pub type TapResult<T> = Result<T, TapError>;
