//! Flow engine: runs the steps of a flow in order and threads the selected
//! record of each structured step into the next command.
//!
//! ```text
//! Idle ─► Running(0) ─► Running(1) ─► … ─► Completed
//!              │             │
//!              └─────────────┴──────────► Failed(i)
//! ```
//!
//! Per step: render the command with the live binding, execute it (one host,
//! or every target for fan-out steps), and for structured steps parse the
//! output and select the record that becomes the next binding. The host a
//! selected record came from becomes the host of later single-target steps.
//! The final step never prompts for a selection. Any error aborts the flow; a fan-out
//! step with failed hosts does not, its per-host results end up in the
//! returned [`FlowReport`].

use std::sync::Arc;
use std::time::Duration;

use crate::error::{FlowError, SelectionError};
use crate::flow::binder;
use crate::flow::parser::{self, Binding, Record};
use crate::flow::schema::{Flow, Step};
use crate::flow::selector::{self, Chooser};
use crate::remote::executer::{ExecOutput, RemoteExecuter};
use crate::remote::fanout::{FanoutReport, FanoutReporter, FanoutRunner};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    /// Executing the step at this (0-based) index
    Running(usize),
    Completed,
    /// Aborted at this step index
    Failed(usize),
}

/// Everything the operator sees while a flow runs.
///
/// Fan-out results arrive through the [`FanoutReporter`] supertrait as soon
/// as each host finishes.
pub trait FlowReporter: FanoutReporter {
    fn state_changed(&self, _state: FlowState) {}

    fn step_started(&self, _index: usize, _total: usize, _step: &Step, _argv: &[String]) {}

    /// Output of a captured, plain, single-host step.
    fn step_output(&self, _host: &str, _output: &ExecOutput) {}

    /// Records of a structured step with `print` enabled.
    fn records(&self, _step: &Step, _records: &[Record]) {}

    fn selected(&self, _field: &str, _record: &Record) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Interactive {
        host: String,
        exit_code: Option<i32>,
    },
    Captured {
        host: String,
    },
    Fanout(FanoutReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// 1-based step number
    pub number: usize,
    pub argv: Vec<String>,
    pub outcome: StepOutcome,
    pub record_count: usize,
    pub selected: Option<Record>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub flow: String,
    pub steps: Vec<StepReport>,
}

impl FlowReport {
    /// `(step number, host)` for every fan-out host that failed or timed out.
    pub fn failed_hosts(&self) -> Vec<(usize, String)> {
        self.steps
            .iter()
            .filter_map(|s| match &s.outcome {
                StepOutcome::Fanout(report) => Some((s.number, report)),
                _ => None,
            })
            .flat_map(|(number, report)| {
                report
                    .failed_hosts()
                    .into_iter()
                    .map(move |host| (number, host.to_string()))
            })
            .collect()
    }

    pub fn all_hosts_succeeded(&self) -> bool {
        self.failed_hosts().is_empty()
    }
}

/// Mutable state of one flow run.
struct FlowRun<'a> {
    targets: &'a [String],
    total: usize,
    binding: Option<Binding>,
    host: Option<String>,
}

pub struct FlowEngine {
    executer: Arc<dyn RemoteExecuter>,
    chooser: Arc<dyn Chooser>,
    reporter: Arc<dyn FlowReporter>,
    timeout: Duration,
}

impl FlowEngine {
    pub fn new(
        executer: Arc<dyn RemoteExecuter>,
        chooser: Arc<dyn Chooser>,
        reporter: Arc<dyn FlowReporter>,
    ) -> Self {
        Self {
            executer,
            chooser,
            reporter,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Deadline for captured single-host steps and for each fan-out batch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run every step of `flow` against `initial_targets`.
    pub async fn run_flow(
        &self,
        flow: &Flow,
        initial_targets: &[String],
    ) -> Result<FlowReport, FlowError> {
        self.reporter.state_changed(FlowState::Idle);
        tracing::info!(
            "[Flow] '{}': {} step(s), {} target(s)",
            flow.name(),
            flow.len(),
            initial_targets.len()
        );

        let mut run = FlowRun {
            targets: initial_targets,
            total: flow.len(),
            binding: None,
            host: None,
        };
        let mut steps = Vec::with_capacity(flow.len());

        for (index, step) in flow.steps().iter().enumerate() {
            self.reporter.state_changed(FlowState::Running(index));
            match self.run_step(&mut run, index, step).await {
                Ok(report) => steps.push(report),
                Err(err) => {
                    tracing::error!("[Flow] '{}' aborted: {}", flow.name(), err);
                    self.reporter.state_changed(FlowState::Failed(index));
                    return Err(err);
                }
            }
        }

        self.reporter.state_changed(FlowState::Completed);
        Ok(FlowReport {
            flow: flow.name().to_string(),
            steps,
        })
    }

    async fn run_step(
        &self,
        run: &mut FlowRun<'_>,
        index: usize,
        step: &Step,
    ) -> Result<StepReport, FlowError> {
        let number = index + 1;
        let is_last = number == run.total;

        // The binding only ever feeds the step right after its producer.
        let binding = run.binding.take();
        let argv = binder::render(&step.command, binding.as_ref())
            .map_err(|source| FlowError::Bind { step: number, source })?;
        self.reporter.step_started(index, run.total, step, &argv);

        let (outcome, outputs) = if step.fanout {
            self.fanout(number, run.targets, step, &argv).await?
        } else {
            let host = self.single_host(number, run)?;
            self.single(number, &host, step, &argv).await?
        };

        let mut report = StepReport {
            number,
            argv,
            outcome,
            record_count: 0,
            selected: None,
        };
        if !step.is_structured() {
            return Ok(report);
        }

        let root = step.root_path.as_deref().unwrap_or_default();
        let mut records = Vec::new();
        let mut origins = Vec::new();
        for (host, output) in &outputs {
            let parsed = parser::parse(output, root, &step.fields)
                .map_err(|source| FlowError::Parse { step: number, source })?;
            origins.extend(std::iter::repeat(host).take(parsed.len()));
            records.extend(parsed);
        }
        report.record_count = records.len();
        tracing::debug!("[Flow] step {}: {} record(s)", number, records.len());

        if step.print_results {
            self.reporter.records(step, &records);
        }

        if is_last {
            return Ok(report);
        }

        let field = step.selector_name().unwrap_or_default();
        let record = self.select(number, &records, field)?;
        self.reporter.selected(field, record);

        let origin = records
            .iter()
            .position(|r| std::ptr::eq(r, record))
            .and_then(|i| origins.get(i));
        if let Some(&origin) = origin {
            if run.host.as_ref() != Some(origin) {
                tracing::info!("[Flow] step {}: record came from {}, using it", number, origin);
            }
            run.host = Some(origin.clone());
        }
        run.binding = Some(Binding::from_record(record));
        report.selected = Some(record.clone());
        Ok(report)
    }

    async fn fanout(
        &self,
        number: usize,
        targets: &[String],
        step: &Step,
        argv: &[String],
    ) -> Result<(StepOutcome, Vec<(String, String)>), FlowError> {
        if targets.is_empty() {
            return Err(FlowError::Selection {
                step: number,
                source: SelectionError::NoCandidates {
                    field: "host".to_string(),
                },
            });
        }

        let runner = FanoutRunner::new(Arc::clone(&self.executer));
        let report = runner
            .run_all(targets, argv, self.timeout, self.reporter.as_ref())
            .await;

        let failed = report.failed_hosts();
        if !failed.is_empty() {
            tracing::warn!(
                "[Flow] step {}: {} of {} host(s) failed: {}",
                number,
                failed.len(),
                report.len(),
                failed.join(", ")
            );
        }

        // Structured fan-out steps select among the records of the hosts
        // that succeeded, in target order, each tagged with its host.
        let outputs: Vec<(String, String)> = report
            .iter()
            .filter_map(|(host, result)| {
                result.stdout().map(|out| (host.to_string(), out.to_string()))
            })
            .collect();
        if step.is_structured() && outputs.is_empty() {
            return Err(FlowError::NoSuccessfulHosts {
                step: number,
                hosts: report.hosts().map(str::to_string).collect(),
            });
        }

        Ok((StepOutcome::Fanout(report), outputs))
    }

    async fn single(
        &self,
        number: usize,
        host: &str,
        step: &Step,
        argv: &[String],
    ) -> Result<(StepOutcome, Vec<(String, String)>), FlowError> {
        let execution_error = |message: String| FlowError::Execution {
            step: number,
            host: host.to_string(),
            message,
        };

        if step.interactive {
            let exit_code = self
                .executer
                .execute_interactive(host, argv)
                .await
                .map_err(|e| execution_error(e.to_string()))?;
            if exit_code != Some(0) {
                let status = exit_code.map_or_else(
                    || "terminated by signal".to_string(),
                    |code| format!("exit status {}", code),
                );
                return Err(execution_error(status));
            }
            let outcome = StepOutcome::Interactive {
                host: host.to_string(),
                exit_code,
            };
            return Ok((outcome, Vec::new()));
        }

        let output = tokio::time::timeout(self.timeout, self.executer.execute(host, argv))
            .await
            .map_err(|_| FlowError::Timeout {
                step: number,
                host: host.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| execution_error(e.to_string()))?;

        if !output.success() {
            return Err(execution_error(output.diagnostic()));
        }
        if !step.is_structured() {
            self.reporter.step_output(host, &output);
        }

        let outcome = StepOutcome::Captured {
            host: host.to_string(),
        };
        Ok((outcome, vec![(host.to_string(), output.stdout)]))
    }

    /// The host single-target steps run on, chosen once per flow run.
    fn single_host(&self, number: usize, run: &mut FlowRun<'_>) -> Result<String, FlowError> {
        if let Some(ref host) = run.host {
            return Ok(host.clone());
        }

        let mut candidates = run.targets.to_vec();
        candidates.sort();
        candidates.dedup();
        let host = selector::pick(candidates, "host", "Hosts:", self.chooser.as_ref())
            .map_err(|e| selection_error(number, e))?;
        tracing::info!("[Flow] using host {}", host);
        run.host = Some(host.clone());
        Ok(host)
    }

    fn select<'r>(
        &self,
        number: usize,
        records: &'r [Record],
        field: &str,
    ) -> Result<&'r Record, FlowError> {
        let values = selector::selector_values(records, field);
        for duplicate in selector::duplicate_values(&values) {
            tracing::warn!(
                "[Flow] step {}: `{}` value '{}' is not unique, the first matching record is used",
                number,
                field,
                duplicate
            );
        }

        selector::select(records, field, self.chooser.as_ref())
            .map_err(|e| selection_error(number, e))
    }
}

fn selection_error(number: usize, err: SelectionError) -> FlowError {
    match err {
        SelectionError::Cancelled => {
            FlowError::Cancelled(format!("selection cancelled at step {}", number))
        }
        source => FlowError::Selection {
            step: number,
            source,
        },
    }
}
