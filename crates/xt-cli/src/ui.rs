//! Terminal side of a flow run: prompts, per-host results and record tables.

use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};

use xt_core::error::SelectionError;
use xt_core::flow::{Chooser, FlowReporter, FlowState, Record, Step};
use xt_core::remote::{ExecOutput, ExecutionResult, FanoutReporter};

/// Rows visible at once in a selection list.
const PAGE_SIZE: usize = 15;

/// Arrow-key selection list.
pub struct DialoguerChooser;

impl Chooser for DialoguerChooser {
    fn choose(&self, message: &str, candidates: &[String]) -> Result<String, SelectionError> {
        let items = sorted_items(candidates);
        let index = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .items(&items)
            .default(0)
            .max_length(PAGE_SIZE)
            .interact_opt()
            .map_err(|e| SelectionError::Prompt(e.to_string()))?;

        match index {
            Some(i) => items.get(i).cloned().ok_or(SelectionError::Cancelled),
            None => Err(SelectionError::Cancelled),
        }
    }
}

/// Pick-list order: lexicographic, duplicates kept.
fn sorted_items(candidates: &[String]) -> Vec<String> {
    let mut items = candidates.to_vec();
    items.sort();
    items
}

/// Yes/no question, defaulting to no. Esc counts as no.
pub fn confirm(prompt: &str) -> Result<bool, String> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .map(|answer| answer.unwrap_or(false))
        .map_err(|e| format!("prompt failed: {}", e))
}

/// Prints flow progress to the terminal.
pub struct ConsoleReporter;

impl FanoutReporter for ConsoleReporter {
    fn host_result(&self, host: &str, result: &ExecutionResult) {
        match result {
            ExecutionResult::Success { stdout, stderr } => {
                println!("{} {}", style("✔").green(), style(host).green().bold());
                print_block(stdout);
                if !stderr.trim().is_empty() {
                    eprintln!("{}", style(stderr.trim_end()).dim());
                }
            }
            ExecutionResult::Failure { exit_code, stderr } => {
                let status = exit_code.map_or_else(|| "no exit status".to_string(), |c| format!("exit {}", c));
                println!(
                    "{} {} ({})",
                    style("✘").red(),
                    style(host).red().bold(),
                    status
                );
                print_block(stderr);
            }
            ExecutionResult::Timeout => {
                println!(
                    "{} {} timed out",
                    style("⏱").yellow(),
                    style(host).yellow().bold()
                );
            }
        }
    }
}

impl FlowReporter for ConsoleReporter {
    fn state_changed(&self, state: FlowState) {
        tracing::debug!("[Flow] state {:?}", state);
    }

    fn step_started(&self, index: usize, total: usize, _step: &Step, argv: &[String]) {
        println!();
        println!(
            "{} {}",
            style(format!("▶ Step {}/{}", index + 1, total)).cyan().bold(),
            argv.join(" ")
        );
    }

    fn step_output(&self, _host: &str, output: &ExecOutput) {
        print_block(&output.stdout);
        if !output.stderr.trim().is_empty() {
            eprintln!("{}", style(output.stderr.trim_end()).dim());
        }
    }

    fn records(&self, step: &Step, records: &[Record]) {
        let columns: Vec<&str> = step.fields.iter().map(|f| f.name.as_str()).collect();
        println!("{}", render_table(&columns, records));
    }

    fn selected(&self, field: &str, record: &Record) {
        println!(
            "{} {} = {}",
            style("✔").green(),
            field,
            style(record.get(field).unwrap_or_default()).bold()
        );
    }
}

fn print_block(text: &str) {
    let text = text.trim_end();
    if !text.is_empty() {
        println!("{}", text);
    }
}

/// Table headers for `columns`: the last dotted segment, upper-cased. A
/// segment already used by an earlier column gets its parent segment as a
/// prefix.
pub fn column_headers(columns: &[&str]) -> Vec<String> {
    let mut headers: Vec<String> = Vec::with_capacity(columns.len());
    for column in columns {
        let segments: Vec<&str> = column.split('.').collect();
        let last = segments[segments.len() - 1];
        let mut header = last.to_uppercase();
        if headers.contains(&header) && segments.len() > 1 {
            header = format!("{}.{}", segments[segments.len() - 2], last).to_uppercase();
        }
        headers.push(header);
    }
    headers
}

/// Borderless, left-aligned table of `records`, one column per entry of
/// `columns` in that order.
pub fn render_table(columns: &[&str], records: &[Record]) -> String {
    let headers = column_headers(columns);
    let rows: Vec<Vec<&str>> = records
        .iter()
        .map(|r| columns.iter().map(|c| r.get(c).unwrap_or_default()).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    let header_cells: Vec<&str> = headers.iter().map(String::as_str).collect();
    lines.push(table_line(&header_cells, &widths));
    for row in &rows {
        lines.push(table_line(row, &widths));
    }
    lines.join("\n")
}

fn table_line(cells: &[&str], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join("   ")
        .trim_end()
        .to_string()
}
