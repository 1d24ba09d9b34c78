//! Remote command execution on the storage host.
//!
//! [`CommandRunner`] is the only seam between the ZFS backend and the remote
//! shell: it runs one command line and hands back the combined output.  It
//! knows nothing about ZFS.  [`SshCommandRunner`] implements it on top of the
//! system `ssh` client, one process (and therefore one session) per call.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CsiError;

/// Result of a command that was started on the storage host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr.
    pub output: String,
    /// Whether the command exited with status zero.
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

/// Executes shell command lines on the storage host.
///
/// An `Err` means the command could not be run at all (no session); a command
/// that ran and failed is reported through [`CommandOutput::success`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput, CsiError>;
}

/// Connection parameters for the storage host.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key used for public key authentication.
    pub identity_file: PathBuf,
    /// Pinned host keys.  Without it the host key is not verified.
    pub known_hosts: Option<PathBuf>,
}

/// [`CommandRunner`] that shells out to `ssh`.
pub struct SshCommandRunner {
    target: SshTarget,
    program: PathBuf,
}

impl SshCommandRunner {
    pub fn new(target: SshTarget) -> Self {
        Self {
            target,
            program: PathBuf::from("ssh"),
        }
    }

    /// Use a specific `ssh` binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments placed before the remote command line.
    fn ssh_args(&self) -> Vec<String> {
        let t = &self.target;
        let mut args = vec![
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-p".to_owned(),
            t.port.to_string(),
            "-i".to_owned(),
            t.identity_file.to_string_lossy().into_owned(),
        ];
        match &t.known_hosts {
            Some(path) => {
                args.push("-o".to_owned());
                args.push("StrictHostKeyChecking=yes".to_owned());
                args.push("-o".to_owned());
                args.push(format!("UserKnownHostsFile={}", path.display()));
            }
            None => {
                args.push("-o".to_owned());
                args.push("StrictHostKeyChecking=no".to_owned());
                args.push("-o".to_owned());
                args.push("UserKnownHostsFile=/dev/null".to_owned());
            }
        }
        args.push(format!("{}@{}", t.user, t.host));
        args.push("--".to_owned());
        args
    }
}

#[async_trait]
impl CommandRunner for SshCommandRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput, CsiError> {
        // The child is killed if this future is dropped, so the session never
        // outlives the call.
        let output = tokio::process::Command::new(&self.program)
            .args(self.ssh_args())
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CsiError::TransportError(format!(
                    "ssh {}@{}: {e}",
                    self.target.user, self.target.host
                ))
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!(code = ?output.status.code(), "ssh session closed");

        Ok(CommandOutput {
            output: combined,
            success: output.status.success(),
        })
    }
}

/// Join arguments into one command line, quoting anything the remote shell
/// could interpret.
pub fn command_line(args: &[String]) -> String {
    args.iter()
        .map(|a| quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ',' | '+' | '%')
        });
    if safe {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
