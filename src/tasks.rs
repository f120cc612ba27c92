//! Background work whose outcome the caller never waits on.

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;

/// Run `task` on the runtime without blocking the caller. Failures are logged under `label`.
pub fn spawn_detached<F, E>(label: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        match task.await {
            Ok(()) => tracing::debug!(task = label, "Background task finished"),
            Err(error) => tracing::warn!(task = label, error = %error, "Background task failed"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn detached_task_runs_to_completion() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = spawn_detached("flag", async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), String>(())
        });

        handle.await.expect("join");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn detached_failure_does_not_panic() {
        let handle = spawn_detached("failing", async { Err::<(), _>("boom") });
        handle.await.expect("failure is swallowed after logging");
    }
}
