//! `xt connect`: interactive ssh session on one matching host.

use xt_core::flow::selector;
use xt_core::remote::RemoteExecuter;

use super::{load_context, GlobalArgs};
use crate::ui::DialoguerChooser;

/// Exit status ssh uses for its own errors (as opposed to the remote shell's).
const SSH_ERROR_STATUS: i32 = 255;

pub async fn run(globals: &GlobalArgs<'_>, pattern: &str) -> Result<(), String> {
    let ctx = load_context(globals)?;
    ctx.print_banner();

    let mut targets = ctx.targets(pattern).await?;
    targets.sort();
    targets.dedup();
    let host = selector::pick(targets, "host", "Hosts:", &DialoguerChooser).map_err(|e| e.to_string())?;

    println!("🔗 Connecting to {}", host);
    let exit_code = ctx
        .executer()
        .execute_interactive(&host, &[])
        .await
        .map_err(|e| e.to_string())?;

    match exit_code {
        Some(SSH_ERROR_STATUS) => Err(format!("ssh to {} failed", host)),
        code => {
            tracing::debug!("[Cli] session on {} ended with {:?}", host, code);
            Ok(())
        }
    }
}
