//! Substitutes the selected record into the next command.
//!
//! Placeholders are `{{key}}`; the dotted form `{{ .key }}` found in older
//! config files is accepted too. After substitution the command is split on
//! whitespace into argv words. There is no quoting: an argument containing
//! spaces cannot be expressed, and a substituted value containing spaces
//! becomes several words.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::BindError;
use crate::flow::parser::Binding;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*\.?([A-Za-z0-9_]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Placeholder names in `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Render `template` with `binding`.
///
/// Without a binding the template is returned verbatim. With one, every
/// placeholder must have a value.
pub fn bind(template: &str, binding: Option<&Binding>) -> Result<String, BindError> {
    let Some(binding) = binding else {
        return Ok(template.to_string());
    };

    if let Some(missing) = placeholders(template)
        .into_iter()
        .find(|name| binding.get(name).is_none())
    {
        return Err(BindError::UnboundPlaceholder(missing));
    }

    Ok(placeholder_re()
        .replace_all(template, |caps: &Captures| {
            binding.get(&caps[1]).unwrap_or_default().to_string()
        })
        .into_owned())
}

/// Split a rendered command into argv words.
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// [`bind`] followed by [`tokenize`].
pub fn render(template: &str, binding: Option<&Binding>) -> Result<Vec<String>, BindError> {
    bind(template, binding).map(|command| tokenize(&command))
}
