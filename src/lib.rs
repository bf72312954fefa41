//! circuitcheck -- contracted-bandwidth verification for gateway firewalls.
//!
//! The crate discovers firewalls and their contracted circuit speeds in the
//! inventory, runs an iperf3 test from every firewall toward a local iperf3
//! server, and reconciles measured against contracted throughput into one
//! JSON report.

pub mod config;
pub mod convert;
pub mod device;
pub mod inventory;
pub mod logging;
pub mod measurement;
pub mod orchestrator;
pub mod probe;
pub mod reconcile;
pub mod report;
pub mod targets;
pub mod workspace;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, info_span, Instrument};

use crate::config::CircuitCheckConfig;
use crate::device::{Credentials, SshSession};
use crate::inventory::{Inventory, NetboxClient};
use crate::orchestrator::server::Iperf3Server;
use crate::orchestrator::{Orchestrator, RunOutcome, RunSummary};
use crate::probe::{IcmpProbe, Liveness};
use crate::reconcile::{Reconciler, Report};
use crate::targets::Target;
use crate::workspace::RunPaths;

/// Operator-supplied file locations for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Rebuilt from inventory, then read back as the batch to test.
    pub client_list: PathBuf,
    /// Final JSON report.
    pub output_file: PathBuf,
}

/// Run the whole pipeline against the real inventory, devices, and iperf3.
pub async fn run(config: &CircuitCheckConfig, paths: &RunPaths, request: &RunRequest) -> Result<Report> {
    println!("::Pulling data from inventory API [{}]", config.inventory.url);
    let inventory = NetboxClient::new(&config.inventory).context("failed to build inventory client")?;

    let credentials = Credentials::from_env(&config.device.username_env, &config.device.password_env);
    let session = Arc::new(SshSession::new(config.device.clone(), credentials));
    let launcher = Arc::new(Iperf3Server::new(config.iperf3.clone()));
    let orchestrator = Orchestrator::new(launcher, session, config, paths.files_dir.clone());

    run_with(config, paths, request, &inventory, &orchestrator, &IcmpProbe::default()).await
}

/// Pipeline over explicit collaborators: build targets, test them, reconcile,
/// write the report.
pub async fn run_with(
    config: &CircuitCheckConfig,
    paths: &RunPaths,
    request: &RunRequest,
    inventory: &dyn Inventory,
    orchestrator: &Orchestrator,
    probe: &dyn Liveness,
) -> Result<Report> {
    let run_id = uuid::Uuid::new_v4();
    execute(config, paths, request, inventory, orchestrator, probe)
        .instrument(info_span!("run", %run_id))
        .await
}

async fn execute(
    config: &CircuitCheckConfig,
    paths: &RunPaths,
    request: &RunRequest,
    inventory: &dyn Inventory,
    orchestrator: &Orchestrator,
    probe: &dyn Liveness,
) -> Result<Report> {
    let targets = targets::build(inventory, &config.inventory.filter, &request.client_list)
        .await
        .context("cannot build the list of devices to test")?;

    print_run_info(&targets, orchestrator, paths, request);

    let summaries = orchestrator.run_batch(&targets).await;
    log_batch(&summaries);

    let reconciler = Reconciler::new(
        inventory,
        probe,
        config.inventory.speed_unit,
        config.inventory.speed_source,
        paths.files_dir.clone(),
    );
    let final_report = reconciler.reconcile(&targets).await;
    report::write_report(&final_report, &request.output_file)?;

    Ok(final_report)
}

fn print_run_info(targets: &[Target], orchestrator: &Orchestrator, paths: &RunPaths, request: &RunRequest) {
    let rule = "=".repeat(100);
    let ips: Vec<&str> = targets.iter().map(Target::bare_ip).collect();
    let template = Target {
        ip: "<source_ip>".to_string(),
        hostname: String::new(),
        device_type_slug: "<fortigate_model_slug>".to_string(),
    };
    let commands: Vec<String> = orchestrator
        .commands_for(&template)
        .iter()
        .map(ToString::to_string)
        .collect();

    println!("{rule}");
    println!("=== FOLLOWING DEVICES WILL BE TESTED: {ips:?}");
    println!("=== TOTAL NUMBER OF DEVICES TO BE TESTED: {}", targets.len());
    println!("{rule}");
    println!("=== FOLLOWING COMMANDS WILL BE ISSUED: {commands:?}");
    println!("{rule}");
    println!("=== RUN OUTPUT CAN BE VIEWED AT:     tail -f {}", paths.log_file().display());
    println!("{rule}");
    println!("=== OUTPUT FILES CAN BE VIEWED AT:   {}/", paths.files_dir.display());
    println!("{rule}");
    println!("=== OUTPUT FILE STORED AT:           {}", request.output_file.display());
    println!("{rule}");
}

fn log_batch(summaries: &[RunSummary]) {
    let completed = summaries
        .iter()
        .filter(|s| s.outcome == RunOutcome::Completed)
        .count();
    let timed_out = summaries
        .iter()
        .filter(|s| s.outcome == RunOutcome::TimedOut)
        .count();
    info!(
        total = summaries.len(),
        completed,
        timed_out,
        failed = summaries.len() - completed - timed_out,
        "batch finished"
    );
}

