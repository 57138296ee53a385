use std::{error::Error, fmt::Display, path::PathBuf};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a hyperfleet-related operation.
pub type HyperfleetResult<T> = Result<T, HyperfleetError>;

/// An error that occurred while managing the sandbox fleet.
#[derive(Debug, Error)]
pub enum HyperfleetError {
    /// A request carried a malformed or oversized value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The sandbox's vsock socket is missing or the dial failed.
    #[error("sandbox unreachable: {0}")]
    SandboxUnreachable(String),

    /// The vsock relay refused or mangled the CONNECT handshake.
    #[error("vsock handshake rejected: {0}")]
    VsockHandshakeRejected(String),

    /// The VMM API returned a non-success response.
    #[error("VMM API error {status}: {body}")]
    VmmApi {
        /// HTTP status returned by the VMM control socket.
        status: u16,

        /// Response body, verbatim.
        body: String,
    },

    /// The VMM process failed to boot; carries the captured log tail.
    #[error("VM crashed on start: {0}")]
    BootFailed(String),

    /// The guest agent returned an error or an unparseable response.
    #[error("agent error: {0}")]
    Agent(String),

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A TAP or bridge operation was refused by the kernel.
    #[error("network setup failed on {device}: {reason}")]
    NetworkSetup {
        /// The device involved.
        device: String,

        /// What the kernel said.
        reason: String,
    },

    /// A spawned helper command exited unsuccessfully.
    #[error("command `{command}` failed: {output}")]
    CommandFailed {
        /// The command that was run.
        command: String,

        /// Combined stdout/stderr of the failed command.
        output: String,
    },

    /// A path that should exist does not.
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A database error.
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    /// A JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HyperfleetError {
    /// Creates a custom error from any error type.
    pub fn custom(error: impl Into<anyhow::Error>) -> HyperfleetError {
        HyperfleetError::Custom(AnyError {
            error: error.into(),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `HyperfleetResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> HyperfleetResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
