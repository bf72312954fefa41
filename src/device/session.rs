//! Remote command execution on a firewall through the system ssh client.
//!
//! Each command runs in its own ssh invocation; the traffic-test settings
//! issued by earlier commands persist on the device between sessions. When a
//! password is exported it is handed to ssh through `sshpass -e`, otherwise
//! ssh runs in batch mode and relies on keys or the ssh config.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use super::SessionError;
use crate::config::DeviceConfig;

/// Exit status ssh uses for its own (connection-level) failures.
const SSH_CONNECTION_ERROR: i32 = 255;
/// `sshpass` exit status for a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// Other `sshpass` failures: invalid or conflicting arguments, runtime
/// error, unrecognized ssh prompt, unknown host key.
const SSHPASS_FAILURES: [i32; 5] = [1, 2, 3, 4, 6];

/// Device login, read once per run from the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    username_var: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username,
            password,
            username_var: "USER".to_string(),
        }
    }

    pub fn from_env(username_var: &str, password_var: &str) -> Self {
        let read = |var: &str| std::env::var(var).ok().filter(|v| !v.is_empty());
        let creds = Self {
            username: read(username_var),
            password: read(password_var),
            username_var: username_var.to_string(),
        };
        if creds.username.is_none() || creds.password.is_none() {
            warn!(
                username_var,
                password_var, "device credentials not fully exported, sessions may fail"
            );
        }
        creds
    }
}

/// Executes one command on a device and returns its output.
#[async_trait::async_trait]
pub trait CommandSession: Send + Sync {
    async fn execute(&self, ip: &str, command: &str) -> Result<String, SessionError>;
}

pub struct SshSession {
    config: DeviceConfig,
    credentials: Credentials,
}

impl SshSession {
    pub fn new(config: DeviceConfig, credentials: Credentials) -> Self {
        Self { config, credentials }
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_sec)
    }

    /// Build the process invocation for `command` on `ip`.
    fn build(&self, ip: &str, command: &str) -> Result<(String, Command), SessionError> {
        let username = self
            .credentials
            .username
            .as_deref()
            .ok_or_else(|| SessionError::MissingUsername {
                var: self.credentials.username_var.clone(),
            })?;

        let (program, mut cmd) = match &self.credentials.password {
            Some(password) => {
                let mut cmd = Command::new(&self.config.sshpass_path);
                cmd.arg("-e").arg(&self.config.ssh_path).env("SSHPASS", password);
                (self.config.sshpass_path.clone(), cmd)
            }
            None => {
                let mut cmd = Command::new(&self.config.ssh_path);
                cmd.arg("-o").arg("BatchMode=yes");
                (self.config.ssh_path.clone(), cmd)
            }
        };

        cmd.arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_sec))
            .arg("-p")
            .arg(self.config.ssh_port.to_string());
        if let Some(cfg) = &self.config.ssh_config_file {
            cmd.arg("-F").arg(cfg);
        }
        cmd.arg("-l")
            .arg(username)
            .arg(ip)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok((program, cmd))
    }
}

#[async_trait::async_trait]
impl CommandSession for SshSession {
    async fn execute(&self, ip: &str, command: &str) -> Result<String, SessionError> {
        let (program, mut cmd) = self.build(ip, command)?;
        debug!(%ip, command, "sending device command");

        let timeout = self.command_timeout();
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(source)) => return Err(SessionError::Spawn { program, source }),
            Err(_) => {
                return Err(SessionError::CommandTimeout {
                    ip: ip.to_string(),
                    command: command.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(SSHPASS_BAD_PASSWORD) if self.credentials.password.is_some() => {
                return Err(SessionError::Auth { ip: ip.to_string() });
            }
            Some(code) if self.credentials.password.is_some() && SSHPASS_FAILURES.contains(&code) => {
                return Err(SessionError::Connect {
                    ip: ip.to_string(),
                    detail: format!("sshpass exited with {code}: {}", stderr.trim()),
                });
            }
            Some(SSH_CONNECTION_ERROR) => {
                if stderr.contains("Permission denied") {
                    return Err(SessionError::Auth { ip: ip.to_string() });
                }
                return Err(SessionError::Connect {
                    ip: ip.to_string(),
                    detail: stderr.trim().to_string(),
                });
            }
            Some(0) => {}
            code => {
                warn!(%ip, command, ?code, stderr = %stderr.trim(), "device command exited non-zero");
            }
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
