//! Error types shared by the codec, the device session and the transport.

use thiserror::Error;

use crate::session::SessionState;

/// Failures reported by the USB layer.
///
/// The `Display` text is what gets surfaced to users as the "last error".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device not found")]
    NotFound,

    #[error("An IO error occurred while communicating with device")]
    Io,

    #[error("Access denied")]
    Access,

    #[error("No such device")]
    NoDevice,

    #[error("Device is being used by another process")]
    Busy,

    #[error("Timeout while communicating with device")]
    Timeout,

    #[error("Communication was interrupted")]
    Interrupted,

    #[error("Out of memory")]
    NoMemory,

    #[error("An unknown error occurred ({0})")]
    Unknown(String),
}

impl From<rusb::Error> for TransportError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::NotFound => TransportError::NotFound,
            rusb::Error::Io => TransportError::Io,
            rusb::Error::Access => TransportError::Access,
            rusb::Error::NoDevice => TransportError::NoDevice,
            rusb::Error::Busy => TransportError::Busy,
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::Interrupted => TransportError::Interrupted,
            rusb::Error::NoMem => TransportError::NoMemory,
            other => TransportError::Unknown(other.to_string()),
        }
    }
}

/// Errors from pedal configuration operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Transport layer error
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("Unknown key {0}")]
    UnknownKey(String),

    #[error("{0} key already specified")]
    DuplicateKey(String),

    #[error("At least one key must be provided")]
    NoKeys,

    #[error("Too many non-modifier keys ({0}). Only 6 keys may be given at once")]
    TooManyKeys(usize),

    #[error("At least one mouse button must be provided")]
    NoMouseButtons,

    #[error("Invalid mouse {axis} value {value}. Expected a value between -100 and 100")]
    AxisOutOfRange { axis: &'static str, value: i64 },

    /// A media key, gamepad button, mouse button or similar name that
    /// does not exist.
    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("Device is not ready (state: {0:?})")]
    NotReady(SessionState),

    #[error("Pedal configuration has not been loaded from the device")]
    NotLoaded,

    #[error("Invalid pedal index {index}. The device has {count} pedal(s)")]
    InvalidPedal { index: usize, count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
