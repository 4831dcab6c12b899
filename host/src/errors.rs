//! Error taxonomy for the server lifecycle.
//!
//! `stop` has no error type by design: stopping an already-stopped
//! supervisor is a no-op success. Nothing here retries automatically;
//! re-invoking `start` is the caller's responsibility.

use thiserror::Error;

/// Failure while starting the server session.
///
/// Any variant leaves the supervisor in the `Stopped` state.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("language server has already been started")]
    AlreadyStarted,

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error("failed to start server process")]
    Spawn(#[source] SpawnError),
}

/// Failure while downloading and installing the server binary.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Fatal for this machine; surfaced to the user, never retried.
    #[error("no release artifact for platform {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("invalid release URL")]
    Url(#[source] url::ParseError),

    #[error("download failed")]
    Http(#[from] reqwest::Error),

    #[error("release server returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("artifact exceeds size limit ({size} > {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("artifact checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("failed to unpack release artifact")]
    Archive(#[source] zip::result::ZipError),

    #[error("release artifact does not contain {name}")]
    MissingEntry { name: String },

    #[error("failed to store server binary")]
    Io(#[from] std::io::Error),
}

/// Failure while launching the server process or completing its handshake.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server process exposed no {0} pipe")]
    MissingStdio(&'static str),

    #[error("server handshake failed: {0}")]
    Handshake(String),
}

/// Error reply produced by a registered request handler.
///
/// Carried back to the server as a JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct HandlerError {
    pub code: i64,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// JSON-RPC invalid-params error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }
}
