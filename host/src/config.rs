//! Host configuration and protocol constants.
//!
//! The editor glue constructs [`HostConfig`] (usually by deserializing its
//! extension settings) and hands it to the supervisor. Every field has a
//! default so `{}` is a valid configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Fixed argument that puts the binary into server mode.
pub const SERVE_ARG: &str = "serve";

/// Environment variable the server reads its bearer token from.
///
/// Always present in the child environment; empty string when the user has
/// not configured a credential.
pub const CREDENTIAL_ENV: &str = "GITHUB_TOKEN";

/// Custom request method the server uses to push rate-limit status.
pub const RATE_LIMIT_METHOD: &str = "$/sherpa/rateLimit";

/// Configuration for the server host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Executable name probed on the search path (e.g. "sherpa").
    pub binary_name: String,
    /// Human-readable name used in progress output.
    pub display_name: String,
    /// Server release version to download when the binary is absent.
    pub version: String,
    /// Base URL of the versioned release-artifact source.
    pub release_base_url: String,
    /// Expected SHA-256 of the release artifact, lowercase hex.
    ///
    /// Verification is skipped when absent.
    pub artifact_sha256: Option<String>,
    /// Root of extension-private storage for downloaded binaries.
    pub storage_dir: PathBuf,
    /// Timeout for the initialize handshake and other direct requests.
    pub handshake_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            binary_name: "sherpa".to_string(),
            display_name: "Sherpa Language Server".to_string(),
            version: "0.4.2".to_string(),
            release_base_url: "https://github.com/sherpa-ls/sherpa/releases/download".to_string(),
            artifact_sha256: None,
            storage_dir: default_storage_dir(),
            handshake_timeout_secs: 30,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sherpa")
}
