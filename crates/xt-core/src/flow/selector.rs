//! Candidate lists for the record selector and resolving the operator's answer.
//!
//! The prompt itself belongs to a [`Chooser`]; this module only decides when a
//! prompt is needed and maps the chosen value back to its record.

use std::collections::HashSet;

use crate::error::SelectionError;
use crate::flow::parser::Record;

/// Blocking, human-driven single choice.
///
/// Only called with two or more candidates.
pub trait Chooser: Send + Sync {
    fn choose(&self, message: &str, candidates: &[String]) -> Result<String, SelectionError>;
}

/// Project `field` out of every record, keeping order and duplicates.
///
/// A record without the field contributes an empty string, so the result is
/// always as long as `records`.
pub fn selector_values(records: &[Record], field: &str) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get(field).unwrap_or_default().to_string())
        .collect()
}

/// The first record whose `field` equals `chosen`.
///
/// When selector values repeat, the earliest record wins.
pub fn resolve<'a>(
    records: &'a [Record],
    field: &str,
    chosen: &str,
) -> Result<&'a Record, SelectionError> {
    records
        .iter()
        .find(|r| r.get(field) == Some(chosen))
        .ok_or_else(|| SelectionError::SelectionNotFound(chosen.to_string()))
}

/// Values that appear more than once, in first-seen order.
pub fn duplicate_values(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    values
        .iter()
        .filter(|v| !seen.insert(v.as_str()) && reported.insert(v.as_str()))
        .cloned()
        .collect()
}

/// Pick one of `candidates`: an error when there are none, the only entry
/// when there is one, otherwise whatever the chooser answers.
pub fn pick(
    candidates: Vec<String>,
    label: &str,
    message: &str,
    chooser: &dyn Chooser,
) -> Result<String, SelectionError> {
    match candidates.len() {
        0 => Err(SelectionError::NoCandidates {
            field: label.to_string(),
        }),
        1 => Ok(candidates.into_iter().next().unwrap_or_default()),
        _ => chooser.choose(message, &candidates),
    }
}

/// Offer the `field` values of `records` and return the chosen record.
pub fn select<'a>(
    records: &'a [Record],
    field: &str,
    chooser: &dyn Chooser,
) -> Result<&'a Record, SelectionError> {
    let candidates = selector_values(records, field);
    let chosen = pick(candidates, field, &format!("{}:", field), chooser)?;
    resolve(records, field, &chosen)
}
