//! Lifecycle supervision for the single server session.
//!
//! One supervisor owns at most one live session. Every lifecycle operation
//! runs under the session mutex, so overlapping starts, stops, and restarts
//! from concurrent editor events serialize instead of racing; the losing
//! `start` observes `AlreadyStarted` rather than spawning a duplicate
//! process.

use tokio::sync::{Mutex, watch};

use crate::auth::CredentialProvider;
use crate::config::HostConfig;
use crate::download::AcquireBinary;
use crate::errors::StartError;
use crate::output::OutputChannel;
use crate::resolver::{BinaryLocation, ResolveBinary};
use crate::router::{RateLimitStatus, register_rate_limit};
use crate::session::{LaunchSpec, Launcher, ServerSession};

/// Lifecycle state as observed between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running,
}

/// Owns the server session and drives its lifecycle.
pub struct Supervisor<R, A, C, L: Launcher> {
    config: HostConfig,
    resolver: R,
    acquirer: A,
    credentials: C,
    launcher: L,
    output: OutputChannel,
    session: Mutex<Option<L::Session>>,
    rate_limit: watch::Sender<Option<RateLimitStatus>>,
}

impl<R, A, C, L> Supervisor<R, A, C, L>
where
    R: ResolveBinary,
    A: AcquireBinary,
    C: CredentialProvider,
    L: Launcher,
{
    pub fn new(
        config: HostConfig,
        resolver: R,
        acquirer: A,
        credentials: C,
        launcher: L,
        output: OutputChannel,
    ) -> Self {
        let (rate_limit, _) = watch::channel(None);
        Self {
            config,
            resolver,
            acquirer,
            credentials,
            launcher,
            output,
            session: Mutex::new(None),
            rate_limit,
        }
    }

    /// Start the server session.
    ///
    /// Resolves the binary (search path first, then acquisition), reads the
    /// current credential, launches, and registers the built-in handlers.
    /// Fails with [`StartError::AlreadyStarted`] when a session is live; any
    /// failure leaves the supervisor stopped with the previous session, if
    /// any, untouched.
    pub async fn start(&self) -> Result<(), StartError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(StartError::AlreadyStarted);
        }

        let location = self.locate().await?;
        let credential = self.credentials.get().await;
        let spec = LaunchSpec::server(location.into_path(), credential.as_ref());

        tracing::info!(program = %spec.program.display(), "starting language server");
        let mut session = self
            .launcher
            .launch(spec)
            .await
            .map_err(StartError::Spawn)?;
        register_rate_limit(&mut session, self.rate_limit.clone());

        *slot = Some(session);
        self.output
            .line(format!("{} started", self.config.display_name));
        Ok(())
    }

    /// Stop the server session.
    ///
    /// Returns `true` when a session was actually shut down and `false` when
    /// there was nothing to stop. Never fails; a stubborn process is killed
    /// after the grace period.
    pub async fn stop(&self) -> bool {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            return false;
        };

        tracing::info!("stopping language server");
        session.shutdown().await;
        // Stale status must not outlive the session that reported it.
        self.rate_limit.send_replace(None);
        self.output
            .line(format!("{} stopped", self.config.display_name));
        true
    }

    /// Stop if running, then start.
    pub async fn restart(&self) -> Result<(), StartError> {
        self.stop().await;
        self.start().await
    }

    pub async fn state(&self) -> SessionState {
        if self.session.lock().await.is_some() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    /// Subscribe to rate-limit status pushed by the server.
    #[must_use]
    pub fn rate_limit(&self) -> watch::Receiver<Option<RateLimitStatus>> {
        self.rate_limit.subscribe()
    }

    #[must_use]
    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    #[must_use]
    pub fn output(&self) -> &OutputChannel {
        &self.output
    }

    /// Two-step binary resolution: the search path wins, acquisition only
    /// runs on a miss.
    async fn locate(&self) -> Result<BinaryLocation, StartError> {
        if let Some(found) = self.resolver.resolve(&self.config.binary_name) {
            self.output.line(format!(
                "Using server binary found on PATH: {}",
                found.display()
            ));
            return Ok(BinaryLocation::Found(found));
        }

        tracing::debug!(
            binary = %self.config.binary_name,
            "server binary not on search path, acquiring release"
        );
        let acquired = self.acquirer.acquire(&self.output).await?;
        Ok(BinaryLocation::Acquired(acquired))
    }
}
