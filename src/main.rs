use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use circuitcheck::config::{CircuitCheckConfig, ConfigOrigin};
use circuitcheck::workspace::RunPaths;
use circuitcheck::RunRequest;

#[derive(Parser)]
#[command(
    name = "circuitcheck",
    about = "Verify contracted circuit bandwidth of branch firewalls with iperf3",
    version,
    long_about = None
)]
struct Cli {
    /// File the device list is rebuilt into and read back from
    #[arg(short = 'c', long = "client-list")]
    client_list: PathBuf,

    /// Where the JSON report is written
    #[arg(short = 'o', long = "output-file")]
    output_file: PathBuf,

    /// Configuration file (falls back to CIRCUITCHECK_CONFIG, then ./circuitcheck.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let started = Instant::now();

    println!(
        "EXECUTION STARTED [{}]",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let (config, origin) = match &cli.config {
        Some(path) => {
            let config = CircuitCheckConfig::load(path)?;
            let origin = ConfigOrigin {
                path: Some(path.clone()),
                ..ConfigOrigin::default()
            };
            (config, origin)
        }
        None => CircuitCheckConfig::load_or_default(),
    };

    let base = std::env::current_dir().context("cannot determine working directory")?;
    let paths = RunPaths::prepare(&config.paths, &base)?;
    let log = circuitcheck::logging::init(&paths.log_file())?;
    origin.log();

    let request = RunRequest {
        client_list: cli.client_list,
        output_file: cli.output_file,
    };

    let result = circuitcheck::run(&config, &paths, &request).await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "run aborted");
    }

    println!(
        "EXECUTION COMPLETED [{}] in {:.2}s",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        started.elapsed().as_secs_f64()
    );
    log.finish();

    result.map(|_| ())
}
