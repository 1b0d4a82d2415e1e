//! Detached side effects
//!
//! Work submitted here runs on the tokio runtime independently of the
//! request that triggered it: the request neither waits for it nor sees
//! its outcome, and the request timeout does not apply. Failures are
//! logged with the submitting operation's tag.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{error, info_span, Instrument};

/// Fire-and-forget executor for best-effort side effects
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedTasks;

impl DetachedTasks {
    pub fn new() -> Self {
        Self
    }

    /// Run `task` in the background. The returned handle may be dropped;
    /// tests await it to observe completion.
    pub fn spawn<F>(&self, op: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let span = info_span!("detached_task", op);
        tokio::spawn(
            async move {
                if let Err(err) = task.await {
                    error!(op, error = %format!("{err:#}"), "detached task failed");
                }
            }
            .instrument(span),
        )
    }
}
