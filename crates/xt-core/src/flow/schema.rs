//! Flow and step definitions as they appear in the config file.
//!
//! A flow is an ordered list of steps under the `flows` key:
//!
//! ```yaml
//! flows:
//!   connect-pods:
//!     - run: "kubectl get pods -o json"
//!       output_format: json
//!       root: items
//!       keys:
//!         - name: metadata.name
//!           path: metadata.name
//!         - name: phase
//!           path: status.phase
//!       selector: metadata.name
//!       print: true
//!     - run: "kubectl exec -it {{metadata_name}} -- bash"
//!       interactive: true
//! ```
//!
//! Placeholders refer to the keys of the previous step with every character
//! outside `[A-Za-z0-9_]` replaced by `_` (see [`normalize_key`]).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::flow::binder;

/// How a step's stdout is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Shown to the operator as-is.
    #[default]
    #[serde(alias = "text")]
    Plain,
    /// JSON parsed into records.
    #[serde(alias = "json")]
    Structured,
}

/// A named field extracted from every record of a structured step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub path: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// One remote command of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Command template, split on whitespace after substitution
    #[serde(rename = "run")]
    pub command: String,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// Attach the terminal instead of capturing output
    #[serde(default)]
    pub interactive: bool,

    /// Path of the record array inside the JSON output
    #[serde(default, rename = "root", skip_serializing_if = "Option::is_none")]
    pub root_path: Option<String>,

    #[serde(default, rename = "keys", skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,

    /// Field offered to the operator as the pick list
    #[serde(default, rename = "selector", skip_serializing_if = "Option::is_none")]
    pub selector_field: Option<String>,

    /// Render extracted records before selection
    #[serde(default, rename = "print")]
    pub print_results: bool,

    /// Run on every target instead of one chosen host
    #[serde(default)]
    pub fanout: bool,
}

impl Step {
    /// A plain, captured step.
    pub fn plain(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output_format: OutputFormat::Plain,
            interactive: false,
            root_path: None,
            fields: Vec::new(),
            selector_field: None,
            print_results: false,
            fanout: false,
        }
    }

    pub fn structured(
        command: impl Into<String>,
        root_path: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            output_format: OutputFormat::Structured,
            root_path: Some(root_path.into()),
            fields,
            ..Self::plain(command)
        }
    }

    pub fn with_selector(mut self, field: impl Into<String>) -> Self {
        self.selector_field = Some(field.into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn fanout(mut self) -> Self {
        self.fanout = true;
        self
    }

    pub fn printed(mut self) -> Self {
        self.print_results = true;
        self
    }

    pub fn is_structured(&self) -> bool {
        self.output_format == OutputFormat::Structured
    }

    /// The selector field, falling back to the first declared key.
    pub fn selector_name(&self) -> Option<&str> {
        self.selector_field
            .as_deref()
            .or_else(|| self.fields.first().map(|f| f.name.as_str()))
    }

    /// Check the invariants that hold for a step on its own.
    fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("run is required for running a flow".to_string());
        }

        if self.interactive && self.fanout {
            return Err("interactive steps cannot fan out".to_string());
        }

        if !self.is_structured() {
            return Ok(());
        }

        if self.interactive {
            return Err("interactive steps cannot produce json output".to_string());
        }
        if self.root_path.as_deref().map_or(true, |r| r.trim().is_empty()) {
            return Err("root must be set when using json output".to_string());
        }
        if self.fields.is_empty() {
            return Err("keys must be set when using json output".to_string());
        }

        // Binding keys are normalized, so `app.name` and `app_name` collide.
        let mut seen: HashMap<String, &str> = HashMap::new();
        for field in &self.fields {
            if field.name.trim().is_empty() || field.path.trim().is_empty() {
                return Err("every key needs a name and a path".to_string());
            }
            let key = normalize_key(&field.name);
            if let Some(first) = seen.insert(key.clone(), field.name.as_str()) {
                if first == field.name {
                    return Err(format!("key `{}` is declared twice", field.name));
                }
                return Err(format!(
                    "keys `{}` and `{}` both bind as `{{{{{}}}}}`",
                    first, field.name, key
                ));
            }
        }

        if let Some(ref selector) = self.selector_field {
            if !self.fields.iter().any(|f| &f.name == selector) {
                return Err("selector must equal one of the keys provided".to_string());
            }
        }

        Ok(())
    }
}

/// Turn a field name into a placeholder-safe binding key.
pub fn normalize_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// A validated, immutable flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    name: String,
    steps: Vec<Step>,
}

impl Flow {
    /// Validate `steps` and build the flow.
    ///
    /// Besides per-step checks, a step whose command has placeholders must
    /// directly follow a structured step that selects a record (the only
    /// producer of a binding), and every placeholder must name one of that
    /// step's keys.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self, ConfigError> {
        let name = name.into();
        if steps.is_empty() {
            return Err(ConfigError::EmptyFlow(name));
        }

        let invalid = |index: usize, reason: String| ConfigError::InvalidStep {
            flow: name.clone(),
            step: index + 1,
            reason,
        };

        for (index, step) in steps.iter().enumerate() {
            step.validate().map_err(|reason| invalid(index, reason))?;

            let placeholders = binder::placeholders(&step.command);
            if placeholders.is_empty() {
                continue;
            }

            let producer = index
                .checked_sub(1)
                .map(|prev| &steps[prev])
                .filter(|prev| prev.is_structured());
            let Some(producer) = producer else {
                return Err(invalid(
                    index,
                    format!(
                        "uses `{{{{{}}}}}` but the previous step produces no record",
                        placeholders[0]
                    ),
                ));
            };

            let keys: HashSet<String> = producer
                .fields
                .iter()
                .map(|f| normalize_key(&f.name))
                .collect();
            if let Some(unknown) = placeholders.iter().find(|p| !keys.contains(*p)) {
                return Err(invalid(
                    index,
                    format!(
                        "`{{{{{}}}}}` is not a key of the previous step (available: {})",
                        unknown,
                        sorted(&keys).join(", ")
                    ),
                ));
            }
        }

        Ok(Self { name, steps })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn sorted(keys: &HashSet<String>) -> Vec<&str> {
    let mut keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pods_step() -> Step {
        Step::structured(
            "kubectl get pods -o json",
            "items",
            vec![
                FieldSpec::new("metadata.name", "metadata.name"),
                FieldSpec::new("phase", "status.phase"),
            ],
        )
        .with_selector("metadata.name")
    }

    #[test]
    fn test_parse_step_yaml() {
        let yaml = r#"
- run: "kubectl get pods -o json"
  output_format: json
  root: items
  keys:
    - name: id
      path: metadata.uid
  selector: id
  print: true
- run: "echo {{id}}"
- run: "htop"
  output_format: text
  interactive: true
"#;
        let steps: Vec<Step> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps[0].is_structured());
        assert_eq!(steps[0].root_path.as_deref(), Some("items"));
        assert_eq!(steps[0].fields[0], FieldSpec::new("id", "metadata.uid"));
        assert!(steps[0].print_results);
        assert_eq!(steps[1].output_format, OutputFormat::Plain);
        assert!(steps[2].interactive);

        let flow = Flow::new("pods", steps).unwrap();
        assert_eq!(flow.len(), 3);
    }

    #[test]
    fn test_structured_requires_root_and_keys() {
        let mut step = pods_step();
        step.root_path = None;
        let err = Flow::new("f", vec![step]).unwrap_err();
        assert!(err.to_string().contains("root must be set"), "{}", err);

        let mut step = pods_step();
        step.fields.clear();
        step.selector_field = None;
        let err = Flow::new("f", vec![step]).unwrap_err();
        assert!(err.to_string().contains("keys must be set"), "{}", err);
    }

    #[test]
    fn test_selector_must_name_a_key() {
        let step = pods_step().with_selector("uid");
        let err = Flow::new("f", vec![step]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStep { step: 1, .. }));
    }

    #[test]
    fn test_interactive_cannot_be_structured_or_fanout() {
        let err = Flow::new("f", vec![pods_step().interactive()]).unwrap_err();
        assert!(err.to_string().contains("cannot produce json"), "{}", err);

        let err = Flow::new("f", vec![Step::plain("top").interactive().fanout()]).unwrap_err();
        assert!(err.to_string().contains("cannot fan out"), "{}", err);
    }

    #[test]
    fn test_placeholders_need_a_structured_predecessor() {
        let steps = vec![Step::plain("uptime").interactive(), Step::plain("kill {{pid}}")];
        let err = Flow::new("f", steps).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStep { step: 2, .. }));
        assert!(err.to_string().contains("produces no record"), "{}", err);

        let err = Flow::new("f", vec![Step::plain("echo {{id}}")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStep { step: 1, .. }));
    }

    #[test]
    fn test_placeholders_must_match_normalized_keys() {
        let ok = Flow::new(
            "f",
            vec![pods_step(), Step::plain("kubectl logs {{metadata_name}}")],
        );
        assert!(ok.is_ok());

        let err = Flow::new("f", vec![pods_step(), Step::plain("kubectl logs {{name}}")])
            .unwrap_err();
        assert!(err.to_string().contains("metadata_name, phase"), "{}", err);
    }

    #[test]
    fn test_empty_flow_and_empty_command() {
        assert!(matches!(
            Flow::new("nothing", vec![]),
            Err(ConfigError::EmptyFlow(_))
        ));
        let err = Flow::new("f", vec![Step::plain("  ")]).unwrap_err();
        assert!(err.to_string().contains("run is required"), "{}", err);
    }

    #[test]
    fn test_keys_must_not_collide_after_normalizing() {
        let step = Step::structured(
            "kubectl get deploy -o json",
            "items",
            vec![
                FieldSpec::new("app.name", "metadata.labels.app"),
                FieldSpec::new("app_name", "metadata.name"),
            ],
        );
        let err = Flow::new("f", vec![step, Step::plain("echo {{app_name}}")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStep { step: 1, .. }));
        assert!(
            err.to_string().contains("keys `app.name` and `app_name` both bind as `{{app_name}}`"),
            "{}",
            err
        );

        let step = Step::structured(
            "ls",
            "items",
            vec![FieldSpec::new("id", "a"), FieldSpec::new("id", "b")],
        );
        let err = Flow::new("f", vec![step]).unwrap_err();
        assert!(err.to_string().contains("key `id` is declared twice"), "{}", err);
    }

    #[test]
    fn test_selector_defaults_to_first_key() {
        let mut step = pods_step();
        step.selector_field = None;
        assert_eq!(step.selector_name(), Some("metadata.name"));
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("metadata.name"), "metadata_name");
        assert_eq!(normalize_key("a/b-c"), "a_b_c");
        assert_eq!(normalize_key("plain_key1"), "plain_key1");
    }
}
