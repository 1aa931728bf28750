//! Structured task group for one orchestration run.
//!
//! Every background task and listener of a reload cycle is spawned into one
//! [`TaskGroup`]. The group owns a cancellation scope derived from the
//! reload signal's token: the first task to complete (success or failure)
//! cancels the scope, and `wait` does not return until every spawned task
//! has reported back. After `wait` returns the number of outstanding tasks
//! is zero, which is what makes hot reload leak-free.
use std::future::Future;

use eyre::{Result, eyre};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct TaskGroup {
    token: CancellationToken,
    tasks: JoinSet<Result<()>>,
}

impl TaskGroup {
    /// Create a group whose scope is a child of `parent`: cancelling the
    /// parent (the reload signal) drains the group, while the group
    /// cancelling itself never propagates upwards.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            tasks: JoinSet::new(),
        }
    }

    /// The group's cancellation scope, for handing to request-serving code
    /// that needs to observe shutdown without being a task itself.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task into the group. The task receives the group scope and
    /// must return once that scope is cancelled.
    pub fn spawn<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(f(self.token.clone()));
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for every spawned task. The first completion, successful or
    /// not, cancels the scope so siblings begin their own shutdown. The
    /// outcome is the first error reported by any task; a drain where all
    /// tasks return cleanly (a signal-triggered stop) yields `Ok(())`.
    /// A panicked task is a failed completion, never a hang.
    pub async fn wait(mut self) -> Result<()> {
        let mut outcome = Ok(());
        let mut completed = 0usize;
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.unwrap_or_else(|join_error| Err(eyre!(join_error)));
            if outcome.is_ok()
                && let Err(error) = result
            {
                outcome = Err(error);
            }
            if completed == 0 {
                self.token.cancel();
            }
            completed += 1;
        }
        outcome
    }
}
