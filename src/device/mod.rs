//! Firewall-side half of a test: command templates and the remote session
//! that runs them.

pub mod commands;
pub mod session;

use thiserror::Error;

pub use commands::{traffictest_commands, CommandKind, DeviceCommand};
pub use session::{CommandSession, Credentials, SshSession};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no device username exported in ${var}")]
    MissingUsername { var: String },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication to {ip} rejected")]
    Auth { ip: String },

    #[error("connection to {ip} failed: {detail}")]
    Connect { ip: String, detail: String },

    #[error("command `{command}` on {ip} did not finish within {secs}s")]
    CommandTimeout {
        ip: String,
        command: String,
        secs: u64,
    },

    #[error("session to {ip} interrupted")]
    Interrupted { ip: String },
}
