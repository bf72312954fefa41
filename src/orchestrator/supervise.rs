//! Supervised tasks: spawn, join with a deadline, terminate on deadline.
//!
//! A [`Supervised`] task receives a one-shot shutdown signal. Joining past
//! the deadline fires that signal, gives the task a grace period to clean
//! up (typically SIGTERM then SIGKILL of its child process), and aborts it
//! if it still has not returned. Aborting drops the task's future, which
//! kills any `kill_on_drop` child it owns.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Extra time past the grace period before a task is aborted outright.
const ABORT_SLACK: Duration = Duration::from_secs(1);

/// How a supervised task ended.
#[derive(Debug)]
pub enum JoinOutcome<T> {
    /// The task returned on its own before the deadline.
    Finished(T),
    /// The deadline passed; the task was terminated.
    TimedOut,
    /// The task panicked or was cancelled.
    Failed(String),
}

pub struct Supervised<T> {
    name: String,
    handle: JoinHandle<T>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    grace: Duration,
    started: Instant,
}

impl<T: Send + 'static> Supervised<T> {
    /// Spawn `task` on the runtime. The closure receives the shutdown signal.
    pub fn spawn<F, Fut>(name: impl Into<String>, grace: Duration, task: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(task(shutdown_rx));
        debug!(task = name.as_str(), "supervised task started");

        Self {
            name,
            handle,
            shutdown_tx: Some(shutdown_tx),
            grace,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wait up to `deadline` for the task; terminate it if it is still running.
    pub async fn join_with_deadline(mut self, deadline: Duration) -> JoinOutcome<T> {
        match tokio::time::timeout(deadline, &mut self.handle).await {
            Ok(Ok(value)) => {
                debug!(
                    task = self.name.as_str(),
                    elapsed_sec = self.elapsed().as_secs_f64(),
                    "supervised task finished"
                );
                JoinOutcome::Finished(value)
            }
            Ok(Err(e)) => JoinOutcome::Failed(e.to_string()),
            Err(_) => {
                warn!(
                    task = self.name.as_str(),
                    deadline_sec = deadline.as_secs_f64(),
                    "supervised task exceeded its deadline, terminating"
                );
                self.terminate().await;
                JoinOutcome::TimedOut
            }
        }
    }

    /// Signal shutdown and wait for the task to wind down, aborting it if it
    /// outlives the grace period. Returns the task's value if it produced one.
    pub async fn terminate(&mut self) -> Option<T> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(self.grace + ABORT_SLACK, &mut self.handle).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(task = self.name.as_str(), "task ignored shutdown, aborting");
                self.handle.abort();
                let _ = (&mut self.handle).await;
                None
            }
        }
    }
}

impl<T> Drop for Supervised<T> {
    fn drop(&mut self) {
        // A detached task would keep its child process alive.
        self.handle.abort();
    }
}

/// Gracefully terminate a child process.
///
/// Sends SIGTERM first, waits up to `grace`, then sends SIGKILL if the
/// process is still running.
pub async fn terminate_child(child: &mut tokio::process::Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(exit_code = status.code(), "child exited after SIGTERM");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for child after SIGTERM");
        }
        Err(_) => {
            warn!("child did not exit after SIGTERM, sending SIGKILL");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to SIGKILL child");
            }
        }
    }
}
