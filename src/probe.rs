//! Device liveness check, used to explain a missing measurement.

use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};

/// Answers "does this address respond at all?".
#[async_trait::async_trait]
pub trait Liveness: Send + Sync {
    async fn is_online(&self, ip: &str) -> bool;
}

/// ICMP echo through the system `ping` binary.
pub struct IcmpProbe {
    pub program: String,
    pub timeout: Duration,
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait::async_trait]
impl Liveness for IcmpProbe {
    async fn is_online(&self, ip: &str) -> bool {
        debug!(%ip, "pinging device");

        // -c 1: one echo, -W: reply timeout in seconds, -q: summary only
        let timeout_secs = self.timeout.as_secs().max(1);
        let status = tokio::process::Command::new(&self.program)
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(timeout_secs.to_string())
            .arg("-q")
            .arg(ip)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                debug!(%ip, "device answered ping");
                true
            }
            // ping exits 1 on no reply, 2 on other errors
            Ok(status) => {
                debug!(%ip, exit_code = status.code(), "no ping reply");
                false
            }
            Err(e) => {
                warn!(%ip, program = %self.program, error = %e, "failed to execute ping");
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn probe(program: &str) -> IcmpProbe {
        IcmpProbe {
            program: program.to_string(),
            ..IcmpProbe::default()
        }
    }

    #[tokio::test]
    async fn test_zero_exit_is_online() {
        assert!(probe("true").is_online("10.0.0.5").await);
    }

    #[tokio::test]
    async fn test_no_reply_is_offline() {
        assert!(!probe("false").is_online("10.0.0.5").await);
    }

    #[tokio::test]
    async fn test_missing_ping_binary_is_offline() {
        assert!(!probe("/nonexistent/ping").is_online("10.0.0.5").await);
    }
}
