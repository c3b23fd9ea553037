use thiserror::Error;

use crate::state::ConnectionState;
use crate::transport::{ChannelHandle, NativeError};

/// Errors raised while encoding, decoding or loading a session configuration
///
/// Every variant except [`ConfigError::TooLong`] and
/// [`ConfigError::DuplicateName`] means the input bytes or text were
/// structurally inconsistent (a malformed configuration). The caller can
/// retry with fresh input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Truncated configuration: need {needed} more bits, have {remaining}")]
    Truncated { needed: usize, remaining: usize },

    #[error("Declared {field} count {count} overruns the remaining {remaining} bits")]
    CountOverrun {
        field: &'static str,
        count: u16,
        remaining: usize,
    },

    #[error("Configuration has {extra} trailing bytes")]
    TrailingBytes { extra: usize },

    #[error("Configuration padding bits are not zero")]
    NonZeroPadding,

    #[error("Invalid {field} value: {value}")]
    InvalidEnum { field: &'static str, value: u8 },

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid base64: {0}")]
    InvalidBase64(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("{field} is too long for the wire form: {len}")]
    TooLong { field: &'static str, len: usize },

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },
}

impl ConfigError {
    /// Returns true if the error describes structurally inconsistent input
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ConfigError::TooLong { .. } | ConfigError::DuplicateName { .. })
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors reported by transport backends
#[derive(Error, Debug)]
pub enum TransportError {
    /// Native error code reported by the backend, passed through opaquely
    #[error("Backend error code {code}")]
    Backend { code: u8 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Receive buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Unknown channel handle: {0}")]
    UnknownChannel(ChannelHandle),

    #[error("Too many channels registered (max {max})")]
    TooManyChannels { max: usize },

    #[error("Could not resolve address: {0}")]
    AddressResolution(String),

    #[error("Transport is shut down")]
    ShutDown,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl TransportError {
    /// Returns the native backend code if this is a backend error
    pub fn backend_code(&self) -> Option<u8> {
        match self {
            TransportError::Backend { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<NativeError> for TransportError {
    fn from(error: NativeError) -> Self {
        TransportError::Backend { code: error.code() }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised while registering a configuration's channels with a backend
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
