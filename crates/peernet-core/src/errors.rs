//! Unified error type for the simulator
//!
//! A single error enum covers every failure class the simulator can hit:
//! scenario resolution, subprocess lifecycle, wire-protocol exchanges,
//! cryptography, and test-query mismatches. Nothing is swallowed at the
//! boundary; background loops log and unwind with one of these.

/// Unified error type for all simulator operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SimError {
    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// What was invalid
        message: String,
    },

    /// A scenario referenced a server, identity, or activity that does not exist
    #[error("Not found: {message}")]
    NotFound {
        /// What could not be resolved
        message: String,
    },

    /// Child process failed to start, failed readiness, or exited unexpectedly
    #[error("Process error: {message}")]
    Process {
        /// What went wrong with the child process
        message: String,
    },

    /// Framing failure, unexpected message id/status, or counterpart disconnect
    #[error("Protocol error: {message}")]
    Protocol {
        /// What the counterpart did wrong
        message: String,
    },

    /// Signature or contract verification failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// What failed to verify
        message: String,
    },

    /// Filesystem or socket I/O failed
    #[error("I/O error: {message}")]
    Io {
        /// The underlying I/O failure
        message: String,
    },

    /// Snapshot state could not be serialized or deserialized
    #[error("Serialization error: {message}")]
    Serialization {
        /// The underlying codec failure
        message: String,
    },

    /// A test query produced results that differ from the prediction
    #[error("Query mismatch: {message}")]
    Mismatch {
        /// Expected-vs-actual summary
        message: String,
    },

    /// An operation did not finish within its deadline
    #[error("Timed out: {message}")]
    Timeout {
        /// What was being waited on
        message: String,
    },

    /// Internal invariant violated
    #[error("Internal error: {message}")]
    Internal {
        /// The broken invariant
        message: String,
    },
}

impl SimError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a child-process error
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    /// Create a wire-protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a cryptography error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a test-query mismatch error
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::Mismatch {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Result alias used across the workspace.
pub type SimResult<T> = Result<T, SimError>;
