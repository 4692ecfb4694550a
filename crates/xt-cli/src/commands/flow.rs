//! `xt flow`: run, list and validate configured flows.

use std::sync::Arc;

use xt_core::config::Config;
use xt_core::flow::{Flow, FlowEngine, Step};

use super::{load_config, load_context, GlobalArgs};
use crate::ui::{ConsoleReporter, DialoguerChooser};

/// Run `flow_name` against the hosts matching `pattern`.
pub async fn run(
    globals: &GlobalArgs<'_>,
    flow_name: &str,
    pattern: &str,
    timeout_secs: Option<u64>,
) -> Result<(), String> {
    let ctx = load_context(globals)?;
    let flow = ctx.config.flow(flow_name).map_err(|e| e.to_string())?;

    ctx.print_banner();
    let targets = ctx.targets(pattern).await?;

    println!("📄 Flow: {} ({} step(s))", flow.name(), flow.len());
    println!("   Profile: {}", ctx.profile.name);
    println!("   Hosts: {}", targets.join(", "));

    let engine = FlowEngine::new(
        ctx.executer(),
        Arc::new(DialoguerChooser),
        Arc::new(ConsoleReporter),
    )
    .with_timeout(ctx.timeout(timeout_secs));

    let report = engine
        .run_flow(&flow, &targets)
        .await
        .map_err(|e| e.to_string())?;

    let failed = report.failed_hosts();
    if failed.is_empty() {
        println!("\n🎉 Flow '{}' completed successfully!", report.flow);
        Ok(())
    } else {
        let hosts: Vec<String> = failed
            .iter()
            .map(|(step, host)| format!("{} (step {})", host, step))
            .collect();
        Err(format!(
            "Flow '{}' finished with failures on: {}",
            report.flow,
            hosts.join(", ")
        ))
    }
}

/// List the flows in the config file.
pub fn list(globals: &GlobalArgs<'_>) -> Result<(), String> {
    let config = load_config(globals)?;
    print_flow_table(&config);
    Ok(())
}

fn print_flow_table(config: &Config) {
    if config.flows.is_empty() {
        println!("No flows configured.");
        return;
    }

    println!("┌──────────────────────┬───────┬──────────────────────────────────────────┐");
    println!("│ Flow                 │ Steps │ First command                            │");
    println!("├──────────────────────┼───────┼──────────────────────────────────────────┤");
    for (name, steps) in &config.flows {
        let first = steps.first().map(|s| s.command.as_str()).unwrap_or("-");
        println!(
            "│ {:<20} │ {:>5} │ {:<40} │",
            truncate(name, 20),
            steps.len(),
            truncate(first, 40)
        );
    }
    println!("└──────────────────────┴───────┴──────────────────────────────────────────┘");
}

/// Validate a flow without executing it.
pub fn validate(globals: &GlobalArgs<'_>, flow_name: &str) -> Result<(), String> {
    let config = load_config(globals)?;
    let flow = config.flow(flow_name).map_err(|e| e.to_string())?;
    print_flow(&flow);
    Ok(())
}

fn print_flow(flow: &Flow) {
    println!("✅ Flow '{}' is valid", flow.name());
    println!("   Steps: {}", flow.len());
    for (i, step) in flow.steps().iter().enumerate() {
        println!("   {}. {} [{}]", i + 1, step.command, describe(step));
    }
}

/// Short summary of a step's mode, e.g. `json, select id, fanout`.
fn describe(step: &Step) -> String {
    let mut parts = Vec::new();
    if step.is_structured() {
        parts.push("json".to_string());
        if let Some(selector) = step.selector_name() {
            parts.push(format!("select {}", selector));
        }
        if step.print_results {
            parts.push("print".to_string());
        }
    } else {
        parts.push("text".to_string());
    }
    if step.interactive {
        parts.push("interactive".to_string());
    }
    if step.fanout {
        parts.push("fanout".to_string());
    }
    parts.join(", ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xt_core::flow::FieldSpec;

    #[test]
    fn test_describe_step_modes() {
        let step = Step::structured("kubectl get pods -o json", "items", vec![FieldSpec::new("pod", "metadata.name")])
            .printed()
            .fanout();
        assert_eq!(describe(&step), "json, select pod, print, fanout");
        assert_eq!(describe(&Step::plain("bash").interactive()), "text, interactive");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("kubectl get pods", 8), "kubectl…");
    }
}
