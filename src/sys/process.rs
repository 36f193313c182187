// src/sys/process.rs

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::Signal;
use tokio::process::{Child, Command};

use crate::error::{AgentError, Result};

/// How the workload left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadOutcome {
    Exited(i32),
    Signaled(i32),
}

impl WorkloadOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signal)) => Self::Signaled(signal),
            // Unix always reports one of the two.
            (None, None) => Self::Exited(1),
        }
    }

    /// The code the agent exits with: the workload's own, or 128+N for signal N.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(signal) => match Signal::try_from(signal) {
                Ok(sig) => format!("killed by {}", sig.as_str()),
                Err(_) => format!("killed by signal {}", signal),
            },
        }
    }
}

/// The supervised child. Owned exclusively by the supervisor.
pub struct Workload {
    child: Child,
    pid: Option<u32>,
}

impl Workload {
    /// Spawns `argv` directly (no shell). stdin, stdout and stderr are inherited so the
    /// workload's output passes through untouched.
    pub fn spawn(argv: &[String], working_dir: Option<&Path>) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or_else(|| AgentError::SpawnFailed {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| AgentError::SpawnFailed {
            command: argv.join(" "),
            source,
        })?;
        let pid = child.id();
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Resolves when the child exits. Cancel-safe, so it can sit in a `select!`.
    pub async fn wait(&mut self) -> Result<WorkloadOutcome> {
        let status = self.child.wait().await.map_err(AgentError::Wait)?;
        Ok(WorkloadOutcome::from_status(status))
    }
}
