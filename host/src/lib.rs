//! Client-side host for the Sherpa language server.
//!
//! Editors embed this crate to manage the external server binary: find it
//! on the search path or download a platform-matched release, launch it
//! with `serve` over stdio, answer its custom requests, and keep exactly
//! one session alive across start/stop/restart commands.
//!
//! The entry point is [`supervisor::Supervisor`], assembled from the four
//! pluggable seams: [`resolver::ResolveBinary`], [`download::AcquireBinary`],
//! [`auth::CredentialProvider`], and [`session::Launcher`].

pub mod auth;
pub mod codec;
pub mod config;
pub mod download;
pub mod errors;
pub mod output;
pub mod resolver;
pub mod router;
pub mod session;
pub mod supervisor;

pub(crate) mod protocol;

pub use auth::{Credential, CredentialProvider, EnvCredentials};
pub use config::{CREDENTIAL_ENV, HostConfig, RATE_LIMIT_METHOD, SERVE_ARG};
pub use download::{AcquireBinary, ReleaseDownloader};
pub use errors::{AcquireError, HandlerError, SpawnError, StartError};
pub use output::OutputChannel;
pub use resolver::{PathProbe, ResolveBinary};
pub use router::RateLimitStatus;
pub use session::{Launcher, ServerSession, StdioLauncher};
pub use supervisor::{SessionState, Supervisor};
