//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command. Commands that talk
//! to hosts start from a [`Context`]: the loaded config, the resolved
//! profile and the tag used for discovery.

pub mod connect;
pub mod file;
pub mod flow;
pub mod hosts;
pub mod run;

use std::sync::Arc;

use xt_core::config::{Config, ResolvedProfile};
use xt_core::discovery::{self, StaticInventory};
use xt_core::remote::SshExecuter;

/// Flags shared by every command.
pub struct GlobalArgs<'a> {
    pub config: Option<&'a str>,
    pub profile: Option<&'a str>,
    pub tag: Option<&'a str>,
}

pub struct Context {
    pub config: Config,
    pub profile: ResolvedProfile,
    pub tag: String,
}

/// Load the config file named by `--config`, or the default one.
pub fn load_config(globals: &GlobalArgs<'_>) -> Result<Config, String> {
    Config::load(globals.config).map_err(|e| e.to_string())
}

/// Load the config and resolve the profile and tag to use.
pub fn load_context(globals: &GlobalArgs<'_>) -> Result<Context, String> {
    let config = load_config(globals)?;
    let profile = config.profile(globals.profile).map_err(|e| e.to_string())?;
    let tag = globals
        .tag
        .map(str::to_string)
        .unwrap_or_else(|| config.defaults.tag.clone());
    tracing::debug!("[Cli] profile '{}', tag '{}'", profile.name, tag);

    Ok(Context {
        config,
        profile,
        tag,
    })
}

impl Context {
    /// Print the profile message box, if the profile has one.
    pub fn print_banner(&self) {
        if let Some(banner) = self.profile.banner() {
            println!("{}", console::style(banner).yellow().bold());
            println!();
        }
    }

    /// Hosts matching `pattern` under the current tag, or the pattern itself
    /// when nothing matches.
    pub async fn targets(&self, pattern: &str) -> Result<Vec<String>, String> {
        let inventory = StaticInventory::new(self.profile.hosts.clone());
        discovery::resolve_with_fallback(&inventory, &self.tag, pattern)
            .await
            .map_err(|e| e.to_string())
    }

    pub fn executer(&self) -> Arc<SshExecuter> {
        Arc::new(SshExecuter::from_options(&self.profile.ssh))
    }

    /// `--timeout` when given, otherwise `defaults.timeout_secs`.
    pub fn timeout(&self, override_secs: Option<u64>) -> std::time::Duration {
        override_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| self.config.timeout())
    }
}
