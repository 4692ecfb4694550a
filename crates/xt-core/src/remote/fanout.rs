//! Fan-out runner: the same command on many hosts at once.
//!
//! One task per host, no concurrency cap. Tasks send their result over an
//! mpsc channel and the runner reports each one as it arrives. A single
//! deadline covers the whole batch; hosts still running when it passes are
//! recorded as [`ExecutionResult::Timeout`] and their tasks are aborted, which
//! kills the underlying processes.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::remote::executer::{ExecOutput, RemoteExecuter};

/// Outcome for one host of a fan-out batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Exit status 0. `stderr` is kept for display (ssh itself writes there).
    Success { stdout: String, stderr: String },
    /// Non-zero exit, signal, or a process that could not be started.
    Failure {
        exit_code: Option<i32>,
        stderr: String,
    },
    /// No result before the batch deadline.
    Timeout,
}

impl ExecutionResult {
    pub fn from_output(output: ExecOutput) -> Self {
        if output.success() {
            ExecutionResult::Success {
                stdout: output.stdout,
                stderr: output.stderr,
            }
        } else {
            ExecutionResult::Failure {
                stderr: output.diagnostic(),
                exit_code: output.exit_code,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn stdout(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

/// Receives each host's result the moment it is known.
pub trait FanoutReporter: Send + Sync {
    fn host_result(&self, host: &str, result: &ExecutionResult);
}

/// Reporter that only logs.
pub struct TracingReporter;

impl FanoutReporter for TracingReporter {
    fn host_result(&self, host: &str, result: &ExecutionResult) {
        match result {
            ExecutionResult::Success { .. } => {
                tracing::info!("[Fanout] command succeeded on host {}", host)
            }
            ExecutionResult::Failure { stderr, .. } => {
                tracing::error!("[Fanout] command failed on host {}: {}", host, stderr)
            }
            ExecutionResult::Timeout => tracing::warn!("[Fanout] command timed out on host {}", host),
        }
    }
}

/// Per-host results, in target order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    results: IndexMap<String, ExecutionResult>,
}

impl FanoutReport {
    pub fn get(&self, host: &str) -> Option<&ExecutionResult> {
        self.results.get(host)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExecutionResult)> {
        self.results.iter().map(|(h, r)| (h.as_str(), r))
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Hosts that failed or timed out, in target order.
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, r)| !r.is_success())
            .map(|(h, _)| h)
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(ExecutionResult::is_success)
    }

    pub fn into_map(self) -> IndexMap<String, ExecutionResult> {
        self.results
    }
}

pub struct FanoutRunner {
    executer: Arc<dyn RemoteExecuter>,
}

impl FanoutRunner {
    pub fn new(executer: Arc<dyn RemoteExecuter>) -> Self {
        Self { executer }
    }

    /// Run `argv` on every target and collect the results within `timeout`,
    /// measured from the start of the batch.
    ///
    /// Duplicate targets run once. Every target appears exactly once in the
    /// returned report.
    pub async fn run_all(
        &self,
        targets: &[String],
        argv: &[String],
        timeout: Duration,
        reporter: &(impl FanoutReporter + ?Sized),
    ) -> FanoutReport {
        let deadline = Instant::now() + timeout;
        let mut hosts: Vec<&String> = Vec::with_capacity(targets.len());
        for host in targets {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<(String, ExecutionResult)>();
        let mut tasks = JoinSet::new();
        for host in &hosts {
            let tx = tx.clone();
            let executer = Arc::clone(&self.executer);
            let host = (*host).clone();
            let argv = argv.to_vec();
            tasks.spawn(async move {
                let result = match executer.execute(&host, &argv).await {
                    Ok(output) => ExecutionResult::from_output(output),
                    Err(e) => ExecutionResult::Failure {
                        exit_code: None,
                        stderr: e.to_string(),
                    },
                };
                let _ = tx.send((host, result));
            });
        }
        drop(tx);

        tracing::info!(
            "[Fanout] running `{}` on {} host(s), timeout {:?}",
            argv.join(" "),
            hosts.len(),
            timeout
        );

        let mut arrived: IndexMap<String, ExecutionResult> = IndexMap::new();
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((host, result))) => {
                    reporter.host_result(&host, &result);
                    arrived.insert(host, result);
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }
        tasks.abort_all();

        let mut results = IndexMap::with_capacity(hosts.len());
        for host in hosts {
            let result = match arrived.swap_remove(host) {
                Some(result) => result,
                None => {
                    let result = if timed_out {
                        ExecutionResult::Timeout
                    } else {
                        ExecutionResult::Failure {
                            exit_code: None,
                            stderr: "execution task ended without a result".to_string(),
                        }
                    };
                    reporter.host_result(host, &result);
                    result
                }
            };
            results.insert(host.clone(), result);
        }

        FanoutReport { results }
    }
}
