//! `xt run`: ad-hoc command on one host (terminal attached) or on every
//! matching host at once.

use xt_core::flow::selector;
use xt_core::remote::{FanoutRunner, RemoteExecuter};

use super::{load_context, GlobalArgs};
use crate::ui::{self, ConsoleReporter, DialoguerChooser};

pub struct RunOptions {
    /// Fan out to every matching host
    pub all: bool,
    /// Skip the confirmation prompt
    pub force: bool,
    pub timeout: Option<u64>,
}

pub async fn run(
    globals: &GlobalArgs<'_>,
    pattern: &str,
    command: &[String],
    options: &RunOptions,
) -> Result<(), String> {
    let ctx = load_context(globals)?;
    ctx.print_banner();

    let mut targets = ctx.targets(pattern).await?;
    targets.sort();
    targets.dedup();
    let command_line = command.join(" ");

    if options.all {
        println!("Hosts ({}):", targets.len());
        for host in &targets {
            println!("  {}", host);
        }
        confirm_unless_forced(
            options.force,
            &format!("Run `{}` on {} host(s)?", command_line, targets.len()),
        )?;

        let runner = FanoutRunner::new(ctx.executer());
        let report = runner
            .run_all(&targets, command, ctx.timeout(options.timeout), &ConsoleReporter)
            .await;

        let failed = report.failed_hosts();
        if failed.is_empty() {
            println!("\n✅ `{}` succeeded on {} host(s)", command_line, report.len());
            return Ok(());
        }
        return Err(format!(
            "`{}` failed on {} of {} host(s): {}",
            command_line,
            failed.len(),
            report.len(),
            failed.join(", ")
        ));
    }

    let host = selector::pick(targets, "host", "Hosts:", &DialoguerChooser).map_err(|e| e.to_string())?;
    confirm_unless_forced(options.force, &format!("Run `{}` on {}?", command_line, host))?;

    let executer = ctx.executer();
    let exit_code = executer
        .execute_interactive(&host, command)
        .await
        .map_err(|e| e.to_string())?;

    match exit_code {
        Some(0) => Ok(()),
        Some(code) => Err(format!("command failed on {}: exit status {}", host, code)),
        None => Err(format!("command on {} was terminated by a signal", host)),
    }
}

fn confirm_unless_forced(force: bool, prompt: &str) -> Result<(), String> {
    if force || ui::confirm(prompt)? {
        Ok(())
    } else {
        Err("command cancelled".to_string())
    }
}
