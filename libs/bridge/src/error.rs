//! Bridge Error Types
//!
//! Error handling for the dispatch cycle: transport faults, missing
//! session preconditions, reconstructed remote errors, and malformed
//! wire data.

use crate::value::Dict;
use thiserror::Error;

/// Main bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The server answered with a non-success HTTP status
    #[error("Transport error: HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    /// The request never produced an HTTP status (connect, IO, TLS)
    #[error("HTTP error: {message}")]
    Http {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No host was given and no session is bound
    #[error("No host for command '{command}': create a session first or pass a host")]
    MissingHost { command: String },

    /// The remote reported an error for the operation
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Error-shaped response without any message to report
    #[error("Remote call '{command}' failed without a message")]
    NoMessage { command: String },

    /// Malformed response JSON or envelope structure
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A value could not be converted to or from its wire form
    #[error("Codec error: {message}")]
    Codec { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Create a transport error from a non-success response
    pub fn transport(status: u16, body: impl Into<String>) -> Self {
        Self::Transport {
            status,
            body: body.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
            source: None,
        }
    }

    /// Create an HTTP error with source
    pub fn http_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Http {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a missing host error
    pub fn missing_host(command: impl Into<String>) -> Self {
        Self::MissingHost {
            command: command.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Fatal errors mean the command could not be carried out at all,
    /// as opposed to the remote rejecting it
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Transport { .. } => true,
            BridgeError::Http { .. } => true,
            BridgeError::MissingHost { .. } => true,
            BridgeError::Configuration { .. } => true,
            BridgeError::Remote(_) => false,
            BridgeError::NoMessage { .. } => false,
            BridgeError::Protocol { .. } => false,
            BridgeError::Codec { .. } => false,
        }
    }

    /// The reconstructed remote error, if this is one
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            BridgeError::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

/// Error raised by the remote process, rebuilt on this side
///
/// `message` has any leading `"<Word>: "` prefix removed so errors read the
/// same regardless of which runtime formatted them. Structured errors keep
/// their remaining fields.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub fields: Dict,
}

impl RemoteError {
    /// Create a remote error without extra fields
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Dict::new(),
        }
    }

    /// Create a remote error carrying structured fields
    pub fn with_fields(message: impl Into<String>, fields: Dict) -> Self {
        Self {
            message: message.into(),
            fields,
        }
    }

    /// Look up an extra field by name
    pub fn field(&self, name: &str) -> Option<&crate::Value> {
        self.fields.get(name)
    }
}
