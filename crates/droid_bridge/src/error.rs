/// Error types for adb operations
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdbError {
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Command timed out: {0}")]
    Timeout(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to launch {binary}: {message}")]
    SpawnFailed { binary: String, message: String },

    #[error("A log capture session is already running")]
    CaptureInProgress,

    #[error("No log capture session has been started")]
    NoCaptureSession,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, AdbError>;
