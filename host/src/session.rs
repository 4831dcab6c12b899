//! Server process ownership and the stdio protocol session.
//!
//! [`StdioSession`] owns the child process plus its protocol client: a
//! writer task fed over a channel, and a reader task that routes responses
//! to pending requests and server requests through the handler registry.
//! The [`Launcher`] / [`ServerSession`] seam exists so the supervisor's
//! lifecycle rules can be exercised without spawning real processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::auth::Credential;
use crate::codec::{MessageReader, MessageWriter};
use crate::config::{CREDENTIAL_ENV, HostConfig, SERVE_ARG};
use crate::errors::SpawnError;
use crate::output::OutputChannel;
use crate::protocol::{self, Incoming, Notification, Request};
use crate::router::{Handler, HandlerRegistry};

/// How long to wait for the process to exit after a graceful shutdown.
const SHUTDOWN_WAIT_SECS: u64 = 2;

const WRITER_QUEUE_CAPACITY: usize = 64;

/// Everything needed to launch the server process.
///
/// The environment is exactly the inherited search path plus the credential
/// variable; the child inherits nothing else. The credential is forwarded as
/// an empty string when absent.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Launch parameters for server mode with the given credential.
    #[must_use]
    pub fn server(program: PathBuf, credential: Option<&Credential>) -> Self {
        let search_path = std::env::var("PATH").unwrap_or_default();
        let token = credential.map(Credential::expose).unwrap_or_default();
        Self {
            program,
            args: vec![SERVE_ARG.to_string()],
            env: vec![
                ("PATH".to_string(), search_path),
                (CREDENTIAL_ENV.to_string(), token.to_string()),
            ],
        }
    }

    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// The credential forwarded to the server; empty when unauthenticated.
    #[must_use]
    pub fn credential_value(&self) -> Option<&str> {
        self.env_value(CREDENTIAL_ENV)
    }
}

/// A live protocol session bound to a running server process.
pub trait ServerSession: Send {
    /// Bind a handler for a custom request method.
    fn register(&mut self, method: &str, handler: Handler);

    /// Gracefully shut the session down, consuming it.
    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

/// Factory turning a [`LaunchSpec`] into a live session.
pub trait Launcher: Send + Sync {
    type Session: ServerSession;

    fn launch(
        &self,
        spec: LaunchSpec,
    ) -> impl Future<Output = Result<Self::Session, SpawnError>> + Send;
}

type PendingMap = Arc<tokio::sync::Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum WriterCommand {
    Frame(serde_json::Value),
    Close,
}

/// Production launcher: spawns the binary and completes the handshake.
pub struct StdioLauncher {
    request_timeout: Duration,
    output: OutputChannel,
}

impl StdioLauncher {
    #[must_use]
    pub fn new(config: &HostConfig, output: OutputChannel) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.handshake_timeout_secs),
            output,
        }
    }
}

impl Launcher for StdioLauncher {
    type Session = StdioSession;

    async fn launch(&self, spec: LaunchSpec) -> Result<StdioSession, SpawnError> {
        let mut session =
            StdioSession::spawn(&spec, self.request_timeout, self.output.clone())?;
        session
            .initialize()
            .await
            .map_err(|e| SpawnError::Handshake(format!("{e:#}")))?;
        Ok(session)
    }
}

/// The single server process plus its attached protocol client.
pub struct StdioSession {
    child: Child,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    registry: HandlerRegistry,
    request_timeout: Duration,
}

impl StdioSession {
    fn spawn(
        spec: &LaunchSpec,
        request_timeout: Duration,
        output: OutputChannel,
    ) -> Result<Self, SpawnError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| SpawnError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SpawnError::MissingStdio("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingStdio("stdout"))?;

        let pending: PendingMap = Arc::new(tokio::sync::Mutex::new(HashMap::new()));
        let registry = HandlerRegistry::new();

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_QUEUE_CAPACITY);
        tokio::spawn(async move {
            let mut writer = MessageWriter::new(stdin);
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Frame(frame) => {
                        if let Err(e) = writer.write_message(&frame).await {
                            tracing::warn!("server write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Close => break,
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_registry = registry.clone();
        let reader_output = output;
        tokio::spawn(async move {
            let mut reader = MessageReader::new(stdout);
            loop {
                match reader.read_message().await {
                    Ok(Some(frame)) => {
                        dispatch_message(
                            &frame,
                            &reader_pending,
                            &reader_writer_tx,
                            &reader_registry,
                            &reader_output,
                        )
                        .await;
                    }
                    Ok(None) => {
                        tracing::info!("server closed its output stream");
                        reader_output.line("Language server exited");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("server read error: {e:#}");
                        reader_output.line(format!("Language server transport error: {e:#}"));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            writer_tx,
            next_id: 1,
            pending,
            registry,
            request_timeout,
        })
    }

    async fn initialize(&mut self) -> Result<()> {
        let response = self
            .send_request("initialize", Some(protocol::initialize_params()))
            .await?;
        if let Some(error) = response.get("error") {
            bail!(
                "initialize rejected: {}",
                error["message"].as_str().unwrap_or("unknown error")
            );
        }
        self.send_notification("initialized", Some(serde_json::json!({})))
            .await?;
        Ok(())
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .context("encoding request")?;
        if self
            .writer_tx
            .send(WriterCommand::Frame(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            bail!("writer channel closed");
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Reader task went away, typically because the server died.
                self.pending.lock().await.remove(&id);
                bail!("response channel dropped");
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                bail!("request {method} timed out");
            }
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("encoding notification")?;
        self.writer_tx
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))
    }
}

impl ServerSession for StdioSession {
    fn register(&mut self, method: &str, handler: Handler) {
        self.registry.register(method, handler);
    }

    async fn shutdown(mut self) {
        if let Ok(response) = self.send_request("shutdown", None).await
            && response.get("error").is_none()
        {
            let _ = self.send_notification("exit", None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Close).await;

        let waited = tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_WAIT_SECS),
            self.child.wait(),
        )
        .await;
        if waited.is_err() {
            tracing::debug!("server did not exit in time, killing it");
            let _ = self.child.kill().await;
        }
    }
}

/// Route one incoming frame.
///
/// Responses complete their pending request; server requests go through the
/// registry (unregistered methods get a method-not-found reply so the server
/// never blocks on us); log notifications land on the output channel.
async fn dispatch_message(
    frame: &serde_json::Value,
    pending: &tokio::sync::Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
    writer_tx: &mpsc::Sender<WriterCommand>,
    registry: &HandlerRegistry,
    output: &OutputChannel,
) {
    let Some(incoming) = protocol::classify(frame) else {
        tracing::trace!("ignoring malformed frame from server");
        return;
    };

    match incoming {
        Incoming::Response { id, body } => {
            let sender = pending.lock().await.remove(&id);
            if let Some(tx) = sender {
                let _ = tx.send(body);
            }
        }
        Incoming::ServerRequest { id, method, params } => {
            let reply = match registry.dispatch(&method, params) {
                Some(Ok(result)) => protocol::reply_ok(&id, result),
                Some(Err(e)) => protocol::reply_err(&id, e.code, &e.message),
                None => {
                    tracing::debug!("no handler for server request {method}");
                    protocol::reply_err(&id, -32601, &format!("Method not found: {method}"))
                }
            };
            let _ = writer_tx.send(WriterCommand::Frame(reply)).await;
        }
        Incoming::Notification { method, params } => {
            if method == "window/logMessage" {
                if let Some(text) = protocol::log_message_text(params.as_ref()) {
                    output.line(text);
                }
            } else {
                tracing::trace!("ignoring server notification {method}");
            }
        }
    }
}
