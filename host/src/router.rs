//! Routing of custom (non-standard) server requests.
//!
//! The session's reader task owns dispatch; this module owns the
//! method-name-to-handler binding. Handlers are registered synchronously
//! during `start`, after the session is up and before any request can be
//! answered, so a successful start always has its handlers in place.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tokio::sync::watch;

use crate::config::RATE_LIMIT_METHOD;
use crate::errors::HandlerError;
use crate::session::ServerSession;

/// Handler for one custom request method.
///
/// Receives the request params and produces the reply payload. Handlers run
/// on the session's reader task and must not block.
pub type Handler =
    Arc<dyn Fn(Option<serde_json::Value>) -> Result<serde_json::Value, HandlerError> + Send + Sync>;

/// Method-name-to-handler map shared between the session owner and the
/// reader task. Registration after the session is live is visible to frames
/// that arrive later; last registration for a name wins.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<String, Handler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, method: &str, handler: Handler) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .insert(method.to_string(), handler);
    }

    /// Run the handler bound to `method`, or `None` when nothing is bound.
    pub fn dispatch(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Option<Result<serde_json::Value, HandlerError>> {
        let handler = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .get(method)
            .cloned()?;
        Some(handler(params))
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .contains_key(method)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<String> = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("methods", &methods)
            .finish()
    }
}

/// Rate-limit status pushed by the server.
///
/// The payload shape is owned by the server; unknown fields are ignored and
/// absent fields default, so payload evolution does not break dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RateLimitStatus {
    /// Whether the server is currently rate limited upstream.
    #[serde(default)]
    pub limited: bool,
    /// Unix timestamp at which the upstream limit resets, when known.
    #[serde(default)]
    pub resets_at: Option<u64>,
}

/// Register the built-in rate-limit handler on a live session.
///
/// Parsed status is published on `updates` for an external status surface
/// (for example a UI indicator); the reply to the server is always `null`.
pub fn register_rate_limit<S: ServerSession>(
    session: &mut S,
    updates: watch::Sender<Option<RateLimitStatus>>,
) {
    let handler: Handler = Arc::new(move |params| {
        let status = match params {
            Some(value) => serde_json::from_value::<RateLimitStatus>(value)
                .map_err(|e| HandlerError::invalid_params(e.to_string()))?,
            None => RateLimitStatus::default(),
        };
        tracing::debug!(limited = status.limited, "rate limit status updated");
        updates.send_replace(Some(status));
        Ok(serde_json::Value::Null)
    });
    session.register(RATE_LIMIT_METHOD, handler);
}
