//! Resolve a tag/pattern pair to host names.
//!
//! Cloud providers plug in through [`InstanceDiscovery`]. The built-in
//! [`StaticInventory`] matches against the `hosts` list of a profile.

use async_trait::async_trait;

use crate::config::HostEntry;
use crate::error::FlowError;

#[async_trait]
pub trait InstanceDiscovery: Send + Sync {
    /// Hosts whose `tag` value matches `pattern`. An empty result is valid.
    async fn resolve_targets(&self, tag: &str, pattern: &str) -> Result<Vec<String>, FlowError>;
}

/// Inventory read from the config file.
///
/// A host matches when its `tag` value contains the pattern
/// (case-insensitive, trailing `*` ignored). An empty pattern matches every
/// host carrying the tag.
pub struct StaticInventory {
    hosts: Vec<HostEntry>,
}

impl StaticInventory {
    pub fn new(hosts: Vec<HostEntry>) -> Self {
        Self { hosts }
    }
}

#[async_trait]
impl InstanceDiscovery for StaticInventory {
    async fn resolve_targets(&self, tag: &str, pattern: &str) -> Result<Vec<String>, FlowError> {
        let needle = normalize_pattern(pattern).to_lowercase();
        let mut names: Vec<String> = self
            .hosts
            .iter()
            .filter(|h| {
                h.tags
                    .get(tag)
                    .is_some_and(|value| value.to_lowercase().contains(&needle))
            })
            .map(|h| h.name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Strip the trailing `*` operators habitually type.
pub fn normalize_pattern(pattern: &str) -> &str {
    pattern.trim().trim_end_matches('*')
}

/// Resolve targets; when nothing matches, the pattern itself is used as the
/// host name.
pub async fn resolve_with_fallback(
    discovery: &dyn InstanceDiscovery,
    tag: &str,
    pattern: &str,
) -> Result<Vec<String>, FlowError> {
    let pattern = normalize_pattern(pattern);
    let targets = discovery.resolve_targets(tag, pattern).await?;
    if targets.is_empty() {
        if pattern.is_empty() {
            return Err(FlowError::Discovery(format!(
                "no hosts tagged `{}` and no pattern to fall back on",
                tag
            )));
        }
        tracing::info!(
            "[Discovery] no instances tagged {}~{}, trying it as a hostname",
            tag,
            pattern
        );
        return Ok(vec![pattern.to_string()]);
    }
    tracing::debug!("[Discovery] {} host(s) match {}~{}", targets.len(), tag, pattern);
    Ok(targets)
}
