//! Append-only output surface for session history.
//!
//! Created once with the supervisor and reused across restarts, so operators
//! see the full history of every session in one place. Appends have no
//! internal consistency requirement beyond ordering, so the channel is
//! freely cloneable and shared without locking.

use std::sync::Arc;

/// Destination for human-readable session output.
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str);
}

/// Sink that forwards lines to the `tracing` pipeline.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn append(&self, line: &str) {
        tracing::info!(target: "sherpa::server", "{line}");
    }
}

/// Shared handle to the session log surface.
#[derive(Clone)]
pub struct OutputChannel {
    sink: Arc<dyn LogSink>,
}

impl OutputChannel {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Channel backed by the `tracing` pipeline.
    #[must_use]
    pub fn to_tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    /// Append one line of output.
    pub fn line(&self, line: impl AsRef<str>) {
        self.sink.append(line.as_ref());
    }
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel").finish_non_exhaustive()
    }
}

/// In-memory sink used by tests to assert on emitted lines.
#[cfg(test)]
pub(crate) struct BufferSink {
    lines: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl BufferSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl LogSink for BufferSink {
    fn append(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
