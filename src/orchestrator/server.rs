//! Local iperf3 server, one per target.
//!
//! Spawns `iperf3 -s --one-off` bound to the configured address and port.
//! The server serves exactly one test and exits, or is terminated by the
//! orchestrator when the pair is reaped.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::supervise::{terminate_child, Supervised};
use crate::config::Iperf3Config;
use crate::targets::Target;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to spawn iperf3 at '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("iperf3 server exited with code {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("failed to wait for iperf3: {0}")]
    Wait(#[source] std::io::Error),
}

/// How the server process ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    /// Served its one test and exited cleanly.
    Served,
    /// Stopped by the orchestrator.
    Terminated,
}

pub type ServerTask = Supervised<Result<ServerExit, ServerError>>;

/// Starts the measurement server for one target.
pub trait ServerLauncher: Send + Sync {
    fn launch(&self, target: &Target, grace: Duration) -> ServerTask;
}

pub struct Iperf3Server {
    config: Iperf3Config,
}

impl Iperf3Server {
    pub fn new(config: Iperf3Config) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.path);
        cmd.arg("-s")
            .arg("-B")
            .arg(&self.config.address)
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg("--one-off")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl ServerLauncher for Iperf3Server {
    fn launch(&self, target: &Target, grace: Duration) -> ServerTask {
        let cmd = self.command();
        let path = self.config.path.clone();
        let port = self.config.port;
        let ip = target.bare_ip().to_string();

        Supervised::spawn(format!("iperf3-server[{ip}]"), grace, move |shutdown_rx| async move {
            let mut cmd = cmd;
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(source) => return Err(ServerError::Spawn { path, source }),
            };
            info!(%ip, port, pid = child.id(), "iperf3 server has been started");

            let stderr = child.stderr.take().map(|mut pipe| {
                tokio::spawn(async move {
                    let mut buf = String::new();
                    let _ = pipe.read_to_string(&mut buf).await;
                    buf
                })
            });

            let result = tokio::select! {
                biased;

                _ = shutdown_rx => {
                    debug!(%ip, "shutdown signal received, terminating iperf3 server");
                    terminate_child(&mut child, grace).await;
                    Ok(ServerExit::Terminated)
                }

                status = child.wait() => {
                    match status {
                        Ok(exit) if exit.success() => Ok(ServerExit::Served),
                        Ok(exit) => {
                            let stderr = match stderr {
                                Some(reader) => reader.await.unwrap_or_default(),
                                None => String::new(),
                            };
                            Err(ServerError::Exited {
                                code: exit.code(),
                                stderr: stderr.trim().to_string(),
                            })
                        }
                        Err(e) => Err(ServerError::Wait(e)),
                    }
                }
            };

            info!(%ip, "iperf3 server has been stopped");
            result
        })
    }
}
