//! Error types for the command station core.
//!
//! None of these are fatal. Registry errors are reported back to the caller
//! (and usually rendered as `<X>` by the protocol layer), command errors come
//! from argument parsing inside a handler, and store errors are logged by the
//! registries and otherwise ignored.

use thiserror::Error;

/// Errors raised by the locomotive and turnout registries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("turnout {0} not found")]
    TurnoutNotFound(u16),

    #[error("locomotive {0} not found")]
    LocomotiveNotFound(u16),

    #[error("consist {0} not found")]
    ConsistNotFound(u16),

    /// Automatic consist address selection found nothing free in 1..=127.
    #[error("no free consist address available")]
    NoFreeConsistAddress,

    #[error("consist {0} already exists")]
    ConsistExists(u16),

    #[error("locomotive {address} is already a member of consist {consist}")]
    AlreadyInConsist { address: u16, consist: u16 },

    #[error("invalid address {0}")]
    InvalidAddress(u16),
}

impl RegistryError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TurnoutNotFound(_) => "turnout_not_found",
            Self::LocomotiveNotFound(_) => "locomotive_not_found",
            Self::ConsistNotFound(_) => "consist_not_found",
            Self::NoFreeConsistAddress => "no_free_consist_address",
            Self::ConsistExists(_) => "consist_exists",
            Self::AlreadyInConsist { .. } => "already_in_consist",
            Self::InvalidAddress(_) => "invalid_address",
        }
    }

    /// Whether this error is a lookup miss rather than a rejected request.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TurnoutNotFound(_) | Self::LocomotiveNotFound(_) | Self::ConsistNotFound(_)
        )
    }
}

/// Errors raised while parsing the arguments of a text command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("missing argument `{0}`")]
    MissingArgument(&'static str),

    #[error("invalid value `{value}` for argument `{name}`")]
    InvalidArgument { name: &'static str, value: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised by a [`ConfigStore`](crate::traits::ConfigStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named document does not exist.
    #[error("document {0} not found")]
    Missing(String),

    #[error("i/o error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {name}: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
