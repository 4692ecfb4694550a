//! `xt file get|put`: copy a file from or to one host, or every matching host
//! with `--all`.

use std::sync::Arc;

use xt_core::flow::selector;
use xt_core::remote::{Direction, FanoutRunner, RemoteExecuter, ScpExecuter, Transfer};

use super::{load_context, GlobalArgs};
use crate::ui::{ConsoleReporter, DialoguerChooser};

pub struct TransferOptions {
    /// Copy to or from every matching host
    pub all: bool,
    pub timeout: Option<u64>,
}

pub async fn get(
    globals: &GlobalArgs<'_>,
    pattern: &str,
    remote: &str,
    local: &str,
    options: &TransferOptions,
) -> Result<(), String> {
    copy(globals, pattern, Transfer::download(remote, local), options).await
}

pub async fn put(
    globals: &GlobalArgs<'_>,
    pattern: &str,
    local: &str,
    remote: &str,
    options: &TransferOptions,
) -> Result<(), String> {
    copy(globals, pattern, Transfer::upload(local, remote), options).await
}

async fn copy(
    globals: &GlobalArgs<'_>,
    pattern: &str,
    transfer: Transfer,
    options: &TransferOptions,
) -> Result<(), String> {
    let ctx = load_context(globals)?;
    ctx.print_banner();

    let mut targets = ctx.targets(pattern).await?;
    targets.sort();
    targets.dedup();

    if !options.all {
        let host = selector::pick(targets, "host", "Hosts:", &DialoguerChooser)
            .map_err(|e| e.to_string())?;
        let executer = ScpExecuter::from_options(&ctx.profile.ssh, transfer);
        println!("📦 {}", describe(&executer, &host));

        let exit_code = executer
            .execute_interactive(&host, &[])
            .await
            .map_err(|e| e.to_string())?;
        return match exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(format!("copy failed on {}: exit status {}", host, code)),
            None => Err(format!("copy on {} was terminated by a signal", host)),
        };
    }

    let mut executer = ScpExecuter::from_options(&ctx.profile.ssh, transfer);
    if executer.transfer().direction == Direction::Download && targets.len() > 1 {
        std::fs::create_dir_all(&executer.transfer().local)
            .map_err(|e| format!("failed to create '{}': {}", executer.transfer().local, e))?;
        executer = executer.with_host_prefix();
    }
    for host in &targets {
        println!("📦 {}", describe(&executer, host));
    }

    let runner = FanoutRunner::new(Arc::new(executer));
    let report = runner
        .run_all(&targets, &[], ctx.timeout(options.timeout), &ConsoleReporter)
        .await;

    let failed = report.failed_hosts();
    if failed.is_empty() {
        println!("\n✅ copied on {} host(s)", report.len());
        Ok(())
    } else {
        Err(format!(
            "copy failed on {} of {} host(s): {}",
            failed.len(),
            report.len(),
            failed.join(", ")
        ))
    }
}

/// `local → host:remote` or `host:remote → local`.
fn describe(executer: &ScpExecuter, host: &str) -> String {
    let transfer = executer.transfer();
    let remote = format!("{}:{}", host, transfer.remote);
    let local = executer.local_path(host);
    match transfer.direction {
        Direction::Upload => format!("{} → {}", local, remote),
        Direction::Download => format!("{} → {}", remote, local),
    }
}
