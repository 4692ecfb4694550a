//! End-to-end flow runs against a scripted executer and chooser.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use xt_core::error::{FlowError, ParseError, SelectionError, TransportError};
use xt_core::flow::{
    Chooser, FieldSpec, Flow, FlowEngine, FlowReporter, FlowState, Record, Step, StepOutcome,
};
use xt_core::remote::{ExecOutput, ExecutionResult, FanoutReporter, RemoteExecuter};

// ─── Test doubles ────────────────────────────────────────────────────────

enum Reply {
    Output(ExecOutput),
    Hang,
}

fn ok(stdout: &str) -> Reply {
    Reply::Output(ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    })
}

fn fail(code: i32, stderr: &str) -> Reply {
    Reply::Output(ExecOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
    })
}

type Script = Box<dyn Fn(&str, &str) -> Reply + Send + Sync>;

/// Answers by `(host, command line)` and records every call.
struct FakeExecuter {
    script: Script,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    interactive_exit: Option<i32>,
}

impl FakeExecuter {
    fn new(script: impl Fn(&str, &str) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Self::build(script, Some(0))
    }

    fn with_interactive_exit(code: Option<i32>) -> Arc<Self> {
        Self::build(|_, _| ok(""), code)
    }

    fn build(
        script: impl Fn(&str, &str) -> Reply + Send + Sync + 'static,
        interactive_exit: Option<i32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            interactive_exit,
        })
    }

    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    fn argvs(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|(_, argv)| argv).collect()
    }
}

#[async_trait]
impl RemoteExecuter for FakeExecuter {
    async fn execute(&self, host: &str, argv: &[String]) -> Result<ExecOutput, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), argv.to_vec()));
        match (self.script)(host, &argv.join(" ")) {
            Reply::Output(output) => Ok(output),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn execute_interactive(
        &self,
        host: &str,
        argv: &[String],
    ) -> Result<Option<i32>, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), argv.to_vec()));
        Ok(self.interactive_exit)
    }
}

/// Replays queued answers and remembers every prompt it was shown.
#[derive(Default)]
struct ScriptedChooser {
    answers: Mutex<VecDeque<Result<String, SelectionError>>>,
    prompts: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedChooser {
    fn answering(answers: &[&str]) -> Arc<Self> {
        let chooser = Self::default();
        chooser
            .answers
            .lock()
            .unwrap()
            .extend(answers.iter().map(|a| Ok(a.to_string())));
        Arc::new(chooser)
    }

    fn cancelling() -> Arc<Self> {
        let chooser = Self::default();
        chooser
            .answers
            .lock()
            .unwrap()
            .push_back(Err(SelectionError::Cancelled));
        Arc::new(chooser)
    }

    fn prompts(&self) -> Vec<(String, Vec<String>)> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Chooser for ScriptedChooser {
    fn choose(&self, message: &str, candidates: &[String]) -> Result<String, SelectionError> {
        self.prompts
            .lock()
            .unwrap()
            .push((message.to_string(), candidates.to_vec()));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected prompt: {}", message))
    }
}

#[derive(Default)]
struct RecordingReporter {
    states: Mutex<Vec<FlowState>>,
    host_results: Mutex<Vec<(String, ExecutionResult)>>,
    printed: Mutex<Vec<usize>>,
}

impl FanoutReporter for RecordingReporter {
    fn host_result(&self, host: &str, result: &ExecutionResult) {
        self.host_results
            .lock()
            .unwrap()
            .push((host.to_string(), result.clone()));
    }
}

impl FlowReporter for RecordingReporter {
    fn state_changed(&self, state: FlowState) {
        self.states.lock().unwrap().push(state);
    }

    fn records(&self, _step: &Step, records: &[Record]) {
        self.printed.lock().unwrap().push(records.len());
    }
}

fn engine(
    executer: &Arc<FakeExecuter>,
    chooser: &Arc<ScriptedChooser>,
    reporter: &Arc<RecordingReporter>,
) -> FlowEngine {
    FlowEngine::new(executer.clone(), chooser.clone(), reporter.clone())
}

fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn words(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

fn items_step(command: &str) -> Step {
    Step::structured(
        command,
        "items",
        vec![FieldSpec::new("id", "id"), FieldSpec::new("name", "name")],
    )
    .with_selector("id")
}

const ITEMS: &str = r#"{"items":[{"id":"a","name":"x"},{"id":"b","name":"y"}]}"#;

// ─── Flows ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_selected_record_binds_into_next_step() {
    let executer = FakeExecuter::new(|_, cmd| match cmd {
        "list items" => ok(ITEMS),
        _ => ok("done"),
    });
    let chooser = ScriptedChooser::answering(&["b"]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "inspect",
        vec![
            items_step("list items"),
            Step::plain("show {{id}} --name {{ .name }}"),
        ],
    )
    .unwrap();

    let report = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap();

    assert_eq!(
        chooser.prompts(),
        vec![("id:".to_string(), targets(&["a", "b"]))]
    );
    assert_eq!(
        executer.argvs(),
        vec![words("list items"), words("show b --name y")]
    );

    let selected = report.steps[0].selected.as_ref().unwrap();
    assert_eq!(selected.get("id"), Some("b"));
    assert_eq!(selected.get("name"), Some("y"));
    assert_eq!(report.steps[0].record_count, 2);
    assert!(report.steps[1].selected.is_none());

    assert_eq!(
        *reporter.states.lock().unwrap(),
        vec![
            FlowState::Idle,
            FlowState::Running(0),
            FlowState::Running(1),
            FlowState::Completed
        ]
    );
}

#[tokio::test]
async fn test_root_that_is_not_a_list_stops_the_flow() {
    let executer = FakeExecuter::new(|_, _| ok(r#"{"items":{}}"#));
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "broken",
        vec![items_step("list items"), Step::plain("show {{id}}")],
    )
    .unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap_err();

    match err {
        FlowError::Parse { step, source } => {
            assert_eq!(step, 1);
            assert_eq!(source, ParseError::NotAnArray("items".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executer.calls().len(), 1);
    assert_eq!(
        reporter.states.lock().unwrap().last(),
        Some(&FlowState::Failed(0))
    );
}

#[tokio::test]
async fn test_empty_record_list_stops_before_next_step() {
    let executer = FakeExecuter::new(|_, _| ok(r#"{"items":[]}"#));
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "empty",
        vec![items_step("list items"), Step::plain("show {{id}}")],
    )
    .unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap_err();

    let message = err.to_string();
    match err {
        FlowError::Selection { step, source } => {
            assert_eq!(step, 1);
            assert_eq!(
                source,
                SelectionError::NoCandidates {
                    field: "id".to_string()
                }
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(message.contains("Step 1"), "{}", message);
    assert!(message.contains("`id`"), "{}", message);
    assert_eq!(executer.argvs(), vec![words("list items")]);
    assert!(chooser.prompts().is_empty());
}

#[tokio::test]
async fn test_missing_field_stops_before_next_step() {
    let executer = FakeExecuter::new(|_, _| ok(r#"{"items":[{"id":"a","name":"x"},{"id":"b"}]}"#));
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "partial",
        vec![items_step("list items"), Step::plain("show {{id}}")],
    )
    .unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FlowError::Parse { step: 1, source: ParseError::FieldNotFound(ref path) } if path == "name"
    ));
    assert_eq!(executer.calls().len(), 1);
    assert!(chooser.prompts().is_empty());
    assert_eq!(
        reporter.states.lock().unwrap().last(),
        Some(&FlowState::Failed(0))
    );
}

#[tokio::test]
async fn test_fanout_reports_each_host_and_continues() {
    let executer = FakeExecuter::new(|host, _| match host {
        "web-2" => fail(1, "permission denied"),
        _ => ok("up 3 days"),
    });
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "uptime",
        vec![Step::plain("uptime").fanout(), Step::plain("hostname").fanout()],
    )
    .unwrap();
    let hosts = targets(&["web-1", "web-2", "web-3"]);

    let report = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &hosts)
        .await
        .unwrap();

    assert_eq!(report.steps.len(), 2);
    let StepOutcome::Fanout(ref first) = report.steps[0].outcome else {
        panic!("expected a fan-out outcome");
    };
    assert_eq!(first.hosts().collect::<Vec<_>>(), vec!["web-1", "web-2", "web-3"]);
    assert_eq!(first.get("web-1").unwrap().stdout(), Some("up 3 days"));
    assert_eq!(first.get("web-3").unwrap().stdout(), Some("up 3 days"));
    assert_eq!(
        first.get("web-2"),
        Some(&ExecutionResult::Failure {
            exit_code: Some(1),
            stderr: "permission denied".to_string()
        })
    );

    assert_eq!(
        report.failed_hosts(),
        vec![(1, "web-2".to_string()), (2, "web-2".to_string())]
    );
    assert!(!report.all_hosts_succeeded());
    assert_eq!(reporter.host_results.lock().unwrap().len(), 6);
    assert!(chooser.prompts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fanout_deadline_covers_the_whole_batch() {
    let executer = FakeExecuter::new(|host, _| match host {
        "web-2" => Reply::Hang,
        _ => ok("fine"),
    });
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());
    let timeout = Duration::from_secs(5);

    let flow = Flow::new("slow", vec![Step::plain("sleep 600").fanout()]).unwrap();

    let start = tokio::time::Instant::now();
    let report = engine(&executer, &chooser, &reporter)
        .with_timeout(timeout)
        .run_flow(&flow, &targets(&["web-1", "web-2"]))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1));

    let StepOutcome::Fanout(ref results) = report.steps[0].outcome else {
        panic!("expected a fan-out outcome");
    };
    assert!(results.get("web-1").unwrap().is_success());
    assert_eq!(results.get("web-2"), Some(&ExecutionResult::Timeout));
    assert_eq!(report.failed_hosts(), vec![(1, "web-2".to_string())]);
}

#[tokio::test]
async fn test_fanout_report_covers_every_target() {
    let executer = FakeExecuter::new(|host, _| {
        if host.ends_with('3') {
            fail(255, "ssh: connect to host refused")
        } else {
            ok(host)
        }
    });
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());
    let flow = Flow::new("who", vec![Step::plain("whoami").fanout()]).unwrap();

    for k in 1..=6 {
        let hosts: Vec<String> = (1..=k).map(|i| format!("node-{}", i)).collect();
        let report = engine(&executer, &chooser, &reporter)
            .run_flow(&flow, &hosts)
            .await
            .unwrap();

        let StepOutcome::Fanout(ref results) = report.steps[0].outcome else {
            panic!("expected a fan-out outcome");
        };
        assert_eq!(results.len(), k);
        assert_eq!(results.hosts().collect::<Vec<_>>(), hosts.iter().map(String::as_str).collect::<Vec<_>>());
        let expected_failures = usize::from(k >= 3);
        assert_eq!(results.failed_hosts().len(), expected_failures);
    }
}

#[tokio::test]
async fn test_structured_fanout_merges_successful_hosts_in_target_order() {
    let executer = FakeExecuter::new(|host, _| match host {
        "web-1" => ok(r#"{"items":[{"id":"p1","name":"api"}]}"#),
        "web-2" => ok(r#"{"items":[{"id":"p2","name":"worker"},{"id":"p3","name":"cron"}]}"#),
        _ => fail(1, "kubectl: not found"),
    });
    let chooser = ScriptedChooser::answering(&["p3"]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "pods",
        vec![
            items_step("get pods").printed().fanout(),
            Step::plain("logs {{id}}"),
        ],
    )
    .unwrap();

    let report = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1", "web-2", "web-3"]))
        .await
        .unwrap();

    // p3 came from web-2, so the next step runs there without a host prompt.
    assert_eq!(
        chooser.prompts(),
        vec![("id:".to_string(), targets(&["p1", "p2", "p3"]))]
    );
    assert_eq!(executer.calls().last().unwrap(), &("web-2".to_string(), words("logs p3")));
    assert_eq!(*reporter.printed.lock().unwrap(), vec![3]);
    assert_eq!(report.steps[0].record_count, 3);
    assert_eq!(
        report.steps[0].selected.as_ref().and_then(|r| r.get("name")),
        Some("cron")
    );
    assert_eq!(report.failed_hosts(), vec![(1, "web-3".to_string())]);
}

#[tokio::test]
async fn test_selected_record_pins_the_host_it_came_from() {
    let executer = FakeExecuter::new(|host, cmd| match (host, cmd) {
        ("web-1", "get pods") => ok(r#"{"items":[{"id":"p1","name":"api"}]}"#),
        ("web-2", "get pods") => ok(r#"{"items":[{"id":"p2","name":"worker"}]}"#),
        _ => ok("ok"),
    });
    let chooser = ScriptedChooser::answering(&["p1"]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "pods",
        vec![
            items_step("get pods").fanout(),
            Step::plain("logs {{id}}"),
            Step::plain("uptime"),
        ],
    )
    .unwrap();

    engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-2", "web-1"]))
        .await
        .unwrap();

    assert_eq!(chooser.prompts().len(), 1);
    let calls = executer.calls();
    assert_eq!(calls[2], ("web-1".to_string(), words("logs p1")));
    assert_eq!(calls[3], ("web-1".to_string(), words("uptime")));
}

#[tokio::test]
async fn test_structured_fanout_without_any_success_fails() {
    let executer = FakeExecuter::new(|_, _| fail(1, "boom"));
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());
    let flow = Flow::new("pods", vec![items_step("get pods").fanout()]).unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1", "web-2"]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FlowError::NoSuccessfulHosts { step: 1, ref hosts } if hosts == &targets(&["web-1", "web-2"])
    ));
}

#[tokio::test]
async fn test_single_host_is_chosen_once() {
    let executer = FakeExecuter::new(|_, cmd| match cmd {
        "list items" => ok(ITEMS),
        _ => ok(""),
    });
    let chooser = ScriptedChooser::answering(&["db-1", "a"]);
    let reporter = Arc::new(RecordingReporter::default());

    let flow = Flow::new(
        "two",
        vec![items_step("list items"), Step::plain("cat {{name}}")],
    )
    .unwrap();

    engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1", "db-1", "web-1"]))
        .await
        .unwrap();

    let prompts = chooser.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], ("Hosts:".to_string(), targets(&["db-1", "web-1"])));
    assert!(executer.calls().iter().all(|(host, _)| host == "db-1"));
    assert_eq!(executer.argvs()[1], words("cat x"));
}

#[tokio::test]
async fn test_final_structured_step_does_not_prompt() {
    let executer = FakeExecuter::new(|_, _| ok(ITEMS));
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());
    let flow = Flow::new("list", vec![items_step("list items").printed()]).unwrap();

    let report = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap();

    assert!(chooser.prompts().is_empty());
    assert_eq!(report.steps[0].record_count, 2);
    assert!(report.steps[0].selected.is_none());
    assert_eq!(*reporter.printed.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn test_cancelled_selection_aborts() {
    let executer = FakeExecuter::new(|_, _| ok(ITEMS));
    let chooser = ScriptedChooser::cancelling();
    let reporter = Arc::new(RecordingReporter::default());
    let flow = Flow::new(
        "inspect",
        vec![items_step("list items"), Step::plain("show {{id}}")],
    )
    .unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Cancelled(_)));
    assert_eq!(executer.calls().len(), 1);
}

#[tokio::test]
async fn test_failed_single_host_step_aborts_with_stderr() {
    let executer = FakeExecuter::new(|_, _| fail(2, "No such file or directory\n"));
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());
    let flow = Flow::new(
        "cat",
        vec![Step::plain("cat /missing"), Step::plain("uptime")],
    )
    .unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap_err();

    match err {
        FlowError::Execution { step, host, message } => {
            assert_eq!(step, 1);
            assert_eq!(host, "web-1");
            assert_eq!(message, "No such file or directory");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executer.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_host_step_times_out() {
    let executer = FakeExecuter::new(|_, _| Reply::Hang);
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());
    let flow = Flow::new("hang", vec![Step::plain("tail -f /var/log/syslog")]).unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .with_timeout(Duration::from_secs(3))
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Timeout { step: 1, ref host, .. } if host == "web-1"));
}

#[tokio::test]
async fn test_interactive_step_exit_status() {
    let flow = Flow::new("shell", vec![Step::plain("bash").interactive()]).unwrap();
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());

    let executer = FakeExecuter::with_interactive_exit(Some(0));
    let report = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap();
    assert_eq!(
        report.steps[0].outcome,
        StepOutcome::Interactive {
            host: "web-1".to_string(),
            exit_code: Some(0)
        }
    );

    let executer = FakeExecuter::with_interactive_exit(Some(130));
    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &targets(&["web-1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Execution { ref message, .. } if message == "exit status 130"));
}

#[tokio::test]
async fn test_no_targets_fails_before_running() {
    let executer = FakeExecuter::new(|_, _| ok(""));
    let chooser = ScriptedChooser::answering(&[]);
    let reporter = Arc::new(RecordingReporter::default());
    let flow = Flow::new("any", vec![Step::plain("uptime")]).unwrap();

    let err = engine(&executer, &chooser, &reporter)
        .run_flow(&flow, &[])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FlowError::Selection {
            step: 1,
            source: SelectionError::NoCandidates { .. }
        }
    ));
    assert!(executer.calls().is_empty());
}
