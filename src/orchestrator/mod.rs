//! Test-run orchestration: one measurement server and one device-driven
//! client per target, run strictly one target at a time.
//!
//! Per target the lifecycle is
//! `Pending -> ServerStarting -> ClientRunning -> {Completed | TimedOut |
//! ConnectionError} -> Joined`. A failing target is recorded and skipped;
//! nothing a single target does aborts the batch.

pub mod server;
pub mod supervise;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::CircuitCheckConfig;
use crate::config::OrchestratorConfig;
use crate::device::{traffictest_commands, CommandSession, DeviceCommand, SessionError};
use crate::targets::Target;
use crate::workspace;

use server::{ServerLauncher, ServerTask};
use supervise::{JoinOutcome, Supervised};

/// Lifecycle position of a single target's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    ServerStarting,
    ClientRunning,
    Completed,
    TimedOut,
    ConnectionError,
    Joined,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::ServerStarting => "server-starting",
            RunState::ClientRunning => "client-running",
            RunState::Completed => "completed",
            RunState::TimedOut => "timed-out",
            RunState::ConnectionError => "connection-error",
            RunState::Joined => "joined",
        };
        f.write_str(s)
    }
}

/// Final result of one target's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Pending,
    Completed,
    /// Client or server outlived the join deadline and was terminated.
    TimedOut,
    /// The device session could not be established or broke.
    ConnectionError(String),
    /// The local iperf3 server failed to start or exited with an error.
    ServerFailed(String),
}

impl RunOutcome {
    fn terminal_state(&self) -> RunState {
        match self {
            RunOutcome::Pending => RunState::Pending,
            RunOutcome::Completed | RunOutcome::ServerFailed(_) => RunState::Completed,
            RunOutcome::TimedOut => RunState::TimedOut,
            RunOutcome::ConnectionError(_) => RunState::ConnectionError,
        }
    }
}

/// What the device-side client produced.
#[derive(Debug, Clone)]
pub struct ClientReport {
    /// Measurement file written from the run command's output, if any.
    pub measurement: Option<PathBuf>,
    pub elapsed: Duration,
}

type ClientTask = Supervised<Result<ClientReport, SessionError>>;

/// Per-target result handed back to the caller.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub target: Target,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    pub measurement: Option<PathBuf>,
}

/// Transient state of the target currently under test.
struct RunRecord {
    target: Target,
    server: Option<ServerTask>,
    client: Option<ClientTask>,
    started: Instant,
    state: RunState,
    outcome: RunOutcome,
}

impl RunRecord {
    fn new(target: Target) -> Self {
        Self {
            target,
            server: None,
            client: None,
            started: Instant::now(),
            state: RunState::Pending,
            outcome: RunOutcome::Pending,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "run state");
        self.state = next;
    }
}

pub struct Orchestrator {
    launcher: Arc<dyn ServerLauncher>,
    session: Arc<dyn CommandSession>,
    settings: OrchestratorConfig,
    server_address: String,
    server_port: u16,
    loopback_prefix: String,
    files_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn ServerLauncher>,
        session: Arc<dyn CommandSession>,
        config: &CircuitCheckConfig,
        files_dir: PathBuf,
    ) -> Self {
        Self {
            launcher,
            session,
            settings: config.orchestrator.clone(),
            server_address: config.iperf3.address.clone(),
            server_port: config.iperf3.port,
            loopback_prefix: config.device.loopback_prefix.clone(),
            files_dir,
        }
    }

    /// Commands that run the traffic test on `target`.
    pub fn commands_for(&self, target: &Target) -> Vec<DeviceCommand> {
        traffictest_commands(
            &self.server_address,
            self.server_port,
            target.bare_ip(),
            &target.device_type_slug,
            &self.loopback_prefix,
        )
    }

    /// Test every target in order. Always returns one summary per target.
    pub async fn run_batch(&self, targets: &[Target]) -> Vec<RunSummary> {
        let mut summaries = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            let span = info_span!("target", host = %target.hostname, ip = target.bare_ip());
            info!(
                index = i + 1,
                total = targets.len(),
                "running test on {}",
                target
            );
            let summary = self.run_target(target).instrument(span).await;
            summaries.push(summary);
        }
        summaries
    }

    /// Run the server/client pair for one target through to `Joined`.
    pub async fn run_target(&self, target: &Target) -> RunSummary {
        let mut record = RunRecord::new(target.clone());
        let grace = self.settings.terminate_grace();
        let settle = self.settings.settle_delay();

        record.advance(RunState::ServerStarting);
        record.server = Some(self.launcher.launch(target, grace));
        tokio::time::sleep(settle).await;

        record.advance(RunState::ClientRunning);
        record.client = Some(self.spawn_client(target, grace));
        tokio::time::sleep(settle).await;

        let measurement = self.reap(&mut record).await;
        record.advance(record.outcome.terminal_state());

        match &record.outcome {
            RunOutcome::Completed => info!(
                elapsed_sec = record.started.elapsed().as_secs_f64(),
                "iperf3 client run completed"
            ),
            RunOutcome::TimedOut => warn!(
                "process taking too long, skipping {}",
                record.target.bare_ip()
            ),
            RunOutcome::ConnectionError(e) => error!(
                error = %e,
                "connection error to {}; forgot to export device credentials?",
                record.target.bare_ip()
            ),
            RunOutcome::ServerFailed(e) => error!(error = %e, "iperf3 server failed"),
            RunOutcome::Pending => {}
        }
        record.advance(RunState::Joined);

        RunSummary {
            target: record.target,
            outcome: record.outcome,
            elapsed: record.started.elapsed(),
            measurement,
        }
    }

    /// Join the client, then the server. Whatever is still alive past the
    /// deadline is terminated; the server is always gone on return.
    async fn reap(&self, record: &mut RunRecord) -> Option<PathBuf> {
        let deadline = self.settings.join_timeout();
        let mut measurement = None;

        let client_outcome = match record.client.take() {
            Some(client) => client.join_with_deadline(deadline).await,
            None => JoinOutcome::Failed("client never started".to_string()),
        };

        record.outcome = match client_outcome {
            JoinOutcome::Finished(Ok(report)) => {
                debug!(elapsed_sec = report.elapsed.as_secs_f64(), "device commands finished");
                measurement = report.measurement;
                RunOutcome::Completed
            }
            JoinOutcome::Finished(Err(e)) => RunOutcome::ConnectionError(e.to_string()),
            JoinOutcome::Failed(e) => RunOutcome::ConnectionError(e),
            JoinOutcome::TimedOut => RunOutcome::TimedOut,
        };

        if let Some(mut server) = record.server.take() {
            if record.outcome == RunOutcome::Completed {
                record.outcome = match server.join_with_deadline(deadline).await {
                    JoinOutcome::Finished(Ok(_)) => RunOutcome::Completed,
                    JoinOutcome::Finished(Err(e)) => RunOutcome::ServerFailed(e.to_string()),
                    JoinOutcome::Failed(e) => RunOutcome::ServerFailed(e),
                    JoinOutcome::TimedOut => RunOutcome::TimedOut,
                };
            } else {
                // No test will reach the server now.
                match server.terminate().await {
                    Some(Err(e)) => debug!(error = %e, "iperf3 server ended with error"),
                    _ => debug!("iperf3 server stopped"),
                }
            }
        }

        measurement
    }

    fn spawn_client(&self, target: &Target, grace: Duration) -> ClientTask {
        let session = Arc::clone(&self.session);
        let commands = self.commands_for(target);
        let files_dir = self.files_dir.clone();
        let ip = target.bare_ip().to_string();

        Supervised::spawn(format!("client[{ip}]"), grace, move |shutdown_rx| {
            async move {
                info!("iperf3 client has been started");
                let run = drive_client(session.as_ref(), &ip, &commands, &files_dir);
                tokio::select! {
                    biased;
                    _ = shutdown_rx => Err(SessionError::Interrupted { ip: ip.clone() }),
                    result = run => result,
                }
            }
            .in_current_span()
        })
    }
}

/// Issue `commands` on the device, persisting the run command's output.
async fn drive_client(
    session: &dyn CommandSession,
    ip: &str,
    commands: &[DeviceCommand],
    files_dir: &Path,
) -> Result<ClientReport, SessionError> {
    let started = Instant::now();
    let mut measurement = None;

    for command in commands {
        let output = session.execute(ip, &command.text).await?;
        if command.is_run() {
            match persist_output(files_dir, ip, &output) {
                Ok(path) => {
                    debug!(path = %path.display(), bytes = output.len(), "measurement written");
                    measurement = Some(path);
                }
                Err(e) => warn!(error = %e, "cannot write measurement file for {}", ip),
            }
        }
    }

    Ok(ClientReport {
        measurement,
        elapsed: started.elapsed(),
    })
}

/// Write the run command's raw output to `<files_dir>/<ip>`.
pub fn persist_output(files_dir: &Path, ip: &str, output: &str) -> std::io::Result<PathBuf> {
    let path = workspace::measurement_path(files_dir, ip);
    let mut content = String::with_capacity(output.len() + 2);
    content.push_str(output);
    content.push_str("\r\n");
    std::fs::write(&path, content)?;
    Ok(path)
}
