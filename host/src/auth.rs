//! Credential boundary for the server's upstream API access.
//!
//! The supervisor only ever asks "what is the current token, if any" and
//! forwards the answer into the child environment. Where tokens live, how
//! users are prompted, and how revocation works belong behind
//! [`CredentialProvider`]. Token values never appear in logs or errors.

use crate::errors::StartError;
use crate::router::RateLimitStatus;

/// An opaque bearer token.
///
/// Debug output is redacted; only [`Credential::expose`] yields the value,
/// and the sole caller is the launch-spec builder.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source of the user's upstream API credential.
pub trait CredentialProvider: Send + Sync {
    /// Current stored credential, if any.
    ///
    /// Absence is not an error; the server runs unauthenticated at a lower
    /// upstream rate limit.
    fn get(&self) -> impl Future<Output = Option<Credential>> + Send;

    /// Interactively obtain and store a new credential.
    fn prompt(&self) -> impl Future<Output = anyhow::Result<Credential>> + Send;

    /// Remove the stored credential.
    fn reset(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Non-interactive provider reading a single environment variable.
///
/// Suits headless hosts where the token is managed outside the process;
/// `prompt` and `reset` report that no interactive store exists.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredentials {
    async fn get(&self) -> Option<Credential> {
        std::env::var(&self.var)
            .ok()
            .filter(|token| !token.is_empty())
            .map(Credential::new)
    }

    async fn prompt(&self) -> anyhow::Result<Credential> {
        anyhow::bail!(
            "no interactive credential store; set the {} environment variable instead",
            self.var
        )
    }

    async fn reset(&self) -> anyhow::Result<()> {
        anyhow::bail!(
            "no interactive credential store; unset the {} environment variable instead",
            self.var
        )
    }
}

/// Prompt for a new credential, then restart so the server picks it up.
pub async fn prompt_credential_and_restart<R, A, C, L>(
    supervisor: &crate::supervisor::Supervisor<R, A, C, L>,
) -> anyhow::Result<()>
where
    R: crate::resolver::ResolveBinary,
    A: crate::download::AcquireBinary,
    C: CredentialProvider,
    L: crate::session::Launcher,
{
    supervisor.credentials().prompt().await?;
    restart_for_credential_change(supervisor).await
}

/// Discard the stored credential, then restart without it.
pub async fn reset_credential_and_restart<R, A, C, L>(
    supervisor: &crate::supervisor::Supervisor<R, A, C, L>,
) -> anyhow::Result<()>
where
    R: crate::resolver::ResolveBinary,
    A: crate::download::AcquireBinary,
    C: CredentialProvider,
    L: crate::session::Launcher,
{
    supervisor.credentials().reset().await?;
    restart_for_credential_change(supervisor).await
}

async fn restart_for_credential_change<R, A, C, L>(
    supervisor: &crate::supervisor::Supervisor<R, A, C, L>,
) -> anyhow::Result<()>
where
    R: crate::resolver::ResolveBinary,
    A: crate::download::AcquireBinary,
    C: CredentialProvider,
    L: crate::session::Launcher,
{
    tracing::info!("credential changed, restarting language server");
    match supervisor.restart().await {
        Ok(()) => Ok(()),
        Err(StartError::AlreadyStarted) => {
            // Racing start from elsewhere; the new session already
            // observed the updated credential.
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// `true` when the published status says the server is limited upstream.
#[must_use]
pub fn is_rate_limited(status: Option<&RateLimitStatus>) -> bool {
    status.is_some_and(|s| s.limited)
}
