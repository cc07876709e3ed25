//! External process supervisor for the proxy daemon.
//!
//! # Design Decisions
//! - Commands are argv lists from settings, run synchronously, no shell
//! - No timeout; a hung command stalls the cycle (wrap externally if needed)
//! - `status` returns trimmed stdout; interpreting it is the caller's job

use std::process::Command;
use thiserror::Error;

use crate::config::schema::SupervisorConfig;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("No {0} command configured")]
    NotConfigured(&'static str),
}

/// Lifecycle control of the proxy daemon.
pub trait ProcessSupervisor {
    fn stop(&self) -> Result<(), SupervisorError>;

    fn start(&self) -> Result<(), SupervisorError>;

    /// Reported daemon state, e.g. `running`.
    fn status(&self) -> Result<String, SupervisorError>;
}

/// Supervisor driven by configured commands.
#[derive(Debug, Clone)]
pub struct CommandSupervisor {
    stop: Vec<String>,
    start: Vec<String>,
    status: Vec<String>,
}

impl CommandSupervisor {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            stop: config.stop_command.clone(),
            start: config.start_command.clone(),
            status: config.status_command.clone(),
        }
    }

    fn run(&self, which: &'static str, argv: &[String]) -> Result<String, SupervisorError> {
        let (program, args) = argv.split_first().ok_or(SupervisorError::NotConfigured(which))?;
        let command = argv.join(" ");
        tracing::debug!(command = %command, "Running supervisor command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| SupervisorError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SupervisorError::CommandFailed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ProcessSupervisor for CommandSupervisor {
    fn stop(&self) -> Result<(), SupervisorError> {
        self.run("stop", &self.stop).map(|_| ())
    }

    fn start(&self) -> Result<(), SupervisorError> {
        self.run("start", &self.start).map(|_| ())
    }

    fn status(&self) -> Result<String, SupervisorError> {
        self.run("status", &self.status)
    }
}
