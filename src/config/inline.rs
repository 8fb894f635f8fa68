//! Literal configuration carried inside the bootstrap descriptor.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::store::{ConfigStore, DEFAULT_REFRESH_INTERVAL};
use crate::config::{ConfigMap, ConfigSpec};
use crate::error::Result;

/// The whole spec is provided up front; it never changes at runtime.
pub struct InlineStore {
    name: String,
    refresh: Duration,
    spec: ConfigSpec,
}

impl InlineStore {
    pub fn new(name: impl Into<String>, spec: ConfigSpec) -> Self {
        InlineStore {
            name: name.into(),
            refresh: DEFAULT_REFRESH_INTERVAL,
            spec,
        }
    }

    /// Build from a bootstrap `config` block holding the spec sections
    /// directly. The same block doubles as the `inherit` target, which
    /// is how the original file format shared datastore credentials.
    pub fn from_bootstrap(name: &str, config: &serde_json::Value, refresh: Duration) -> Result<Self> {
        let inherited: ConfigMap = config.as_object().cloned().unwrap_or_default();
        let spec = ConfigSpec::from_value(config.clone(), &inherited)?;
        Ok(InlineStore {
            name: name.to_string(),
            refresh,
            spec,
        })
    }
}

#[async_trait]
impl ConfigStore for InlineStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn load(&self) -> Result<ConfigSpec> {
        Ok(self.spec.clone())
    }

    async fn has_changed(&self) -> Result<bool> {
        Ok(false)
    }
}
