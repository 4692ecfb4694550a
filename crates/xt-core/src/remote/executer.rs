//! Runs one command on one host.
//!
//! `SshExecuter` shells out to the system `ssh` binary:
//!
//! ```text
//! ssh <options…> <user>@<host><domain> <argv…>
//! ```
//!
//! Captured runs drop the `-t` tty request from the options so stdout stays
//! clean for parsing; interactive runs pass the terminal through untouched.
//!
//! `ScpExecuter` copies one file per host with the same options (minus `-t`):
//!
//! ```text
//! scp <options…> <local> <user>@<host><domain>:<remote>     upload
//! scp <options…> <user>@<host><domain>:<remote> <local>     download
//! ```

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;

use crate::config::SshOptions;
use crate::error::TransportError;

/// Captured result of a finished remote process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable failure description: stderr when there is any,
    /// otherwise the exit status.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

#[async_trait]
pub trait RemoteExecuter: Send + Sync {
    /// Run `argv` on `host` and capture its output.
    async fn execute(&self, host: &str, argv: &[String]) -> Result<ExecOutput, TransportError>;

    /// Run `argv` on `host` attached to the controlling terminal and return
    /// its exit code.
    async fn execute_interactive(
        &self,
        host: &str,
        argv: &[String],
    ) -> Result<Option<i32>, TransportError>;
}

/// Options that take a value; a flag cluster containing one of these is left
/// alone when stripping `-t`.
const VALUE_FLAGS: &str = "BbcDEeFIiJLlmOopQRSWw";

pub struct SshExecuter {
    binary: String,
    user: String,
    domain: String,
    options: Vec<String>,
}

impl SshExecuter {
    pub fn new(user: impl Into<String>, domain: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            binary: "ssh".to_string(),
            user: user.into(),
            domain: domain.into(),
            options,
        }
    }

    pub fn from_options(ssh: &SshOptions) -> Self {
        Self::new(ssh.user.clone(), ssh.domain.clone(), ssh.args())
    }

    /// Use a different ssh-compatible binary (mainly for tests).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn destination(&self, host: &str) -> String {
        destination(&self.user, host, &self.domain)
    }

    /// Full argument list passed to the ssh binary.
    pub fn build_args(&self, host: &str, argv: &[String], interactive: bool) -> Vec<String> {
        let mut args: Vec<String> = if interactive {
            self.options.clone()
        } else {
            self.options.iter().filter_map(|o| strip_tty_flag(o)).collect()
        };
        args.push(self.destination(host));
        args.extend(argv.iter().cloned());
        args
    }

    fn command(&self, host: &str, argv: &[String], interactive: bool) -> tokio::process::Command {
        let args = self.build_args(host, argv, interactive);
        tracing::debug!("[Ssh] {} {}", self.binary, args.join(" "));

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(&args).kill_on_drop(true);
        cmd
    }

    fn transport_error(&self, host: &str, err: std::io::Error) -> TransportError {
        TransportError {
            host: host.to_string(),
            program: self.binary.clone(),
            message: format!("failed to start: {}", err),
        }
    }
}

#[async_trait]
impl RemoteExecuter for SshExecuter {
    async fn execute(&self, host: &str, argv: &[String]) -> Result<ExecOutput, TransportError> {
        let output = self
            .command(host, argv, false)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.transport_error(host, e))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }

    async fn execute_interactive(
        &self,
        host: &str,
        argv: &[String],
    ) -> Result<Option<i32>, TransportError> {
        let status = self
            .command(host, argv, true)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.transport_error(host, e))?;

        Ok(status.code())
    }
}

fn destination(user: &str, host: &str, domain: &str) -> String {
    format!("{}@{}{}", user, host, domain)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// One file copy between this machine and a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub local: String,
    pub remote: String,
}

impl Transfer {
    pub fn upload(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            direction: Direction::Upload,
            local: local.into(),
            remote: remote.into(),
        }
    }

    pub fn download(remote: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            direction: Direction::Download,
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// Runs a fixed [`Transfer`] against whichever host it is given.
///
/// The `argv` passed through [`RemoteExecuter`] is ignored, which lets the
/// fan-out runner copy to or from many hosts at once.
pub struct ScpExecuter {
    binary: String,
    user: String,
    domain: String,
    options: Vec<String>,
    transfer: Transfer,
    host_prefix: bool,
}

impl ScpExecuter {
    pub fn new(
        user: impl Into<String>,
        domain: impl Into<String>,
        options: Vec<String>,
        transfer: Transfer,
    ) -> Self {
        Self {
            binary: "scp".to_string(),
            user: user.into(),
            domain: domain.into(),
            options: options.iter().filter_map(|o| strip_tty_flag(o)).collect(),
            transfer,
            host_prefix: false,
        }
    }

    pub fn from_options(ssh: &SshOptions, transfer: Transfer) -> Self {
        Self::new(ssh.user.clone(), ssh.domain.clone(), ssh.args(), transfer)
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Download into the `local` directory as `<host>-<file name>`, so copies
    /// from several hosts do not overwrite each other.
    pub fn with_host_prefix(mut self) -> Self {
        self.host_prefix = true;
        self
    }

    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    /// Local side of the copy for `host`.
    pub fn local_path(&self, host: &str) -> String {
        if !self.host_prefix || self.transfer.direction == Direction::Upload {
            return self.transfer.local.clone();
        }
        let file_name = Path::new(&self.transfer.remote)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());
        Path::new(&self.transfer.local)
            .join(format!("{}-{}", host, file_name))
            .to_string_lossy()
            .to_string()
    }

    /// Full argument list passed to the scp binary.
    pub fn build_args(&self, host: &str) -> Vec<String> {
        let remote = format!(
            "{}:{}",
            destination(&self.user, host, &self.domain),
            self.transfer.remote
        );
        let local = self.local_path(host);

        let mut args = self.options.clone();
        match self.transfer.direction {
            Direction::Upload => args.extend([local, remote]),
            Direction::Download => args.extend([remote, local]),
        }
        args
    }

    fn command(&self, host: &str) -> tokio::process::Command {
        let args = self.build_args(host);
        tracing::debug!("[Scp] {} {}", self.binary, args.join(" "));

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(&args).kill_on_drop(true);
        cmd
    }

    fn transport_error(&self, host: &str, err: std::io::Error) -> TransportError {
        TransportError {
            host: host.to_string(),
            program: self.binary.clone(),
            message: format!("failed to start: {}", err),
        }
    }
}

#[async_trait]
impl RemoteExecuter for ScpExecuter {
    async fn execute(&self, host: &str, _argv: &[String]) -> Result<ExecOutput, TransportError> {
        let output = self
            .command(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.transport_error(host, e))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }

    /// Runs with the terminal attached so scp can show its progress meter.
    async fn execute_interactive(
        &self,
        host: &str,
        _argv: &[String],
    ) -> Result<Option<i32>, TransportError> {
        let status = self
            .command(host)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.transport_error(host, e))?;

        Ok(status.code())
    }
}

/// Remove the tty request from a single ssh option word.
///
/// `-t`/`-tt` disappear, `-Ct` becomes `-C`; anything else is kept.
fn strip_tty_flag(option: &str) -> Option<String> {
    let Some(flags) = option.strip_prefix('-') else {
        return Some(option.to_string());
    };
    let is_cluster = !flags.is_empty()
        && !flags.starts_with('-')
        && flags.chars().all(|c| c.is_ascii_alphanumeric());
    if !is_cluster || !flags.contains('t') || flags.chars().any(|c| VALUE_FLAGS.contains(c)) {
        return Some(option.to_string());
    }

    let kept: String = flags.chars().filter(|&c| c != 't').collect();
    if kept.is_empty() {
        None
    } else {
        Some(format!("-{}", kept))
    }
}
