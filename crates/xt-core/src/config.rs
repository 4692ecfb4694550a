//! Config file: flows, profiles and ssh settings.
//!
//! Default location is `~/.xt/config.yaml`:
//!
//! ```yaml
//! defaults:
//!   profile: staging
//!   tag: Name
//!   timeout_secs: 60
//!
//! ssh:
//!   user: ubuntu
//!
//! profiles:
//!   staging:
//!     default: true
//!     message: "You are on STAGING"
//!     ssh:
//!       domain: .staging.example.com
//!     hosts:
//!       - name: web-1
//!         tags: { Name: web, role: frontend }
//!
//! flows:
//!   restart-pod:
//!     - run: "kubectl get pods -o json"
//!       output_format: json
//!       root: items
//!       keys: [{ name: pod, path: metadata.name }]
//!     - run: "kubectl delete pod {{pod}}"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::flow::schema::{Flow, Step};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Global ssh settings; profile values take precedence
    #[serde(default)]
    pub ssh: SshOptions,

    #[serde(default)]
    pub profiles: IndexMap<String, Profile>,

    #[serde(default)]
    pub flows: IndexMap<String, Vec<Step>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub profile: Option<String>,

    /// Instance tag matched against the search pattern
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Deadline for captured steps and fan-out batches
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            profile: None,
            tag: default_tag(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_tag() -> String {
    "Name".to_string()
}

fn default_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOptions {
    #[serde(default)]
    pub user: String,

    /// Appended to every host name (e.g. `.prod.example.com`)
    #[serde(default)]
    pub domain: String,

    /// Raw ssh arguments; empty means [`default_ssh_args`]
    #[serde(default)]
    pub options: Vec<String>,
}

impl SshOptions {
    /// Options to pass to ssh.
    pub fn args(&self) -> Vec<String> {
        if self.options.is_empty() {
            default_ssh_args()
        } else {
            self.options.clone()
        }
    }

    /// `self` with empty fields filled from `fallback`.
    pub fn merged_over(&self, fallback: &SshOptions) -> SshOptions {
        let pick = |own: &String, other: &String| {
            if own.is_empty() {
                other.clone()
            } else {
                own.clone()
            }
        };
        SshOptions {
            user: pick(&self.user, &fallback.user),
            domain: pick(&self.domain, &fallback.domain),
            options: if self.options.is_empty() {
                fallback.options.clone()
            } else {
                self.options.clone()
            },
        }
    }

    fn validate(&self, profile: &str) -> Result<(), ConfigError> {
        if self.user.is_empty() {
            return Err(ConfigError::Missing(format!("profiles.{}.ssh.user", profile)));
        }
        if self.domain.is_empty() {
            return Err(ConfigError::Missing(format!("profiles.{}.ssh.domain", profile)));
        }
        Ok(())
    }
}

pub fn default_ssh_args() -> Vec<String> {
    [
        "-Ct",
        "-o",
        "LogLevel=INFO",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "ControlPath=~/.ssh/cm-%C",
        "-o",
        "ControlMaster=auto",
        "-o",
        "ControlPersist=5m",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub default: bool,

    /// Banner shown before anything runs against this profile
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub ssh: SshOptions,

    /// Static inventory used for host discovery
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// A profile with ssh settings merged and validated.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub message: Option<String>,
    pub ssh: SshOptions,
    pub hosts: Vec<HostEntry>,
}

impl ResolvedProfile {
    /// The profile message framed in a box, or `None` without a message.
    pub fn banner(&self) -> Option<String> {
        let message = self.message.as_deref().filter(|m| !m.trim().is_empty())?;
        let lines: Vec<&str> = message.trim_end().lines().collect();
        let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        let border = "-".repeat(width + 4);

        let mut out = String::new();
        out.push_str(&border);
        out.push('\n');
        for line in &lines {
            out.push_str(&format!("| {:<width$} |\n", line, width = width));
        }
        out.push_str(&border);
        Some(out)
    }
}

impl Config {
    pub fn from_yaml(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml(&content, &display)
    }

    /// `~/.xt/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".xt").join("config.yaml"))
    }

    /// Load `path`, or the default location when `path` is `None`.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_path().ok_or(ConfigError::NoHome)?,
        };
        tracing::debug!("[Config] loading {}", path.display());
        Self::from_file(&path)
    }

    /// The named flow, validated.
    pub fn flow(&self, name: &str) -> Result<Flow, ConfigError> {
        let steps = self
            .flows
            .get(name)
            .ok_or_else(|| ConfigError::FlowNotFound(name.to_string()))?;
        Flow::new(name, steps.clone())
    }

    /// Names of all flows in file order.
    pub fn flow_names(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }

    /// Profile names, sorted.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `name`, or the default profile (`defaults.profile`, then the
    /// first profile flagged `default: true`).
    pub fn profile(&self, name: Option<&str>) -> Result<ResolvedProfile, ConfigError> {
        let name = match name.or(self.defaults.profile.as_deref()) {
            Some(n) => n.to_string(),
            None => self
                .profiles
                .iter()
                .find(|(_, p)| p.default)
                .map(|(n, _)| n.clone())
                .ok_or(ConfigError::NoDefaultProfile)?,
        };

        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.clone()))?;

        let ssh = profile.ssh.merged_over(&self.ssh);
        ssh.validate(&name)?;

        Ok(ResolvedProfile {
            message: profile.message.clone(),
            hosts: profile.hosts.clone(),
            ssh,
            name,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
defaults:
  timeout_secs: 30
ssh:
  user: ubuntu
  options: ["-o", "BatchMode=yes"]
profiles:
  staging:
    default: true
    message: "STAGING\nbe careful"
    ssh:
      domain: .staging.example.com
    hosts:
      - name: web-1
        tags: { Name: web }
  prod:
    ssh:
      user: deploy
      domain: .prod.example.com
      options: ["-t"]
  broken:
    ssh:
      user: root
flows:
  restart:
    - run: "kubectl get pods -o json"
      output_format: json
      root: items
      keys:
        - name: pod
          path: metadata.name
    - run: "kubectl delete pod {{pod}}"
  bad:
    - run: "echo {{nothing}}"
"#;

    fn config() -> Config {
        Config::from_yaml(SAMPLE, "sample").unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = Config::from_yaml("{}", "empty").unwrap();
        assert_eq!(cfg.defaults.tag, "Name");
        assert_eq!(cfg.timeout(), Duration::from_secs(60));
        assert!(cfg.flows.is_empty());
        assert_eq!(config().timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_profile_merges_global_ssh() {
        let profile = config().profile(None).unwrap();
        assert_eq!(profile.name, "staging");
        assert_eq!(profile.ssh.user, "ubuntu");
        assert_eq!(profile.ssh.domain, ".staging.example.com");
        assert_eq!(profile.ssh.args(), vec!["-o", "BatchMode=yes"]);
        assert_eq!(profile.hosts.len(), 1);
    }

    #[test]
    fn test_named_profile_overrides() {
        let profile = config().profile(Some("prod")).unwrap();
        assert_eq!(profile.ssh.user, "deploy");
        assert_eq!(profile.ssh.args(), vec!["-t"]);
    }

    #[test]
    fn test_profile_errors() {
        let cfg = config();
        assert!(matches!(
            cfg.profile(Some("nope")),
            Err(ConfigError::ProfileNotFound(_))
        ));
        let err = cfg.profile(Some("broken")).unwrap_err();
        assert_eq!(err.to_string(), "profiles.broken.ssh.domain must be set");

        let empty = Config::from_yaml("profiles: {}", "empty").unwrap();
        assert!(matches!(empty.profile(None), Err(ConfigError::NoDefaultProfile)));
    }

    #[test]
    fn test_flow_lookup_validates() {
        let cfg = config();
        assert_eq!(cfg.flow_names(), vec!["restart", "bad"]);
        assert_eq!(cfg.flow("restart").unwrap().len(), 2);
        assert!(matches!(cfg.flow("bad"), Err(ConfigError::InvalidStep { .. })));
        assert!(matches!(cfg.flow("missing"), Err(ConfigError::FlowNotFound(_))));
    }

    #[test]
    fn test_default_ssh_args_when_unset() {
        let ssh = SshOptions::default();
        assert_eq!(ssh.args()[0], "-Ct");
        assert!(ssh.args().contains(&"ControlPersist=5m".to_string()));
    }

    #[test]
    fn test_banner() {
        let profile = config().profile(None).unwrap();
        assert_eq!(
            profile.banner().unwrap(),
            "--------------\n| STAGING    |\n| be careful |\n--------------"
        );
        let prod = config().profile(Some("prod")).unwrap();
        assert!(prod.banner().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = Config::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(cfg.profile_names(), vec!["broken", "prod", "staging"]);

        let err = Config::load(Some("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
