//! Hierarchical key-value configuration store.
//!
//! Everything lives under a fixed root path in a firebase-style store
//! that serves JSON at `{base_url}/{path}.json`. A `version` key under
//! the root is the change token: bump it after editing and the
//! supervisor reloads on its next check.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::store::ConfigStore;
use crate::config::{cfg_str, ConfigMap, ConfigSpec};
use crate::error::{FermenatorError, Result};

const DEFAULT_ROOT: &str = "config/fermenator";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RemoteKvStore {
    name: String,
    refresh: Duration,
    base_url: String,
    root: Vec<String>,
    auth_token: Option<String>,
    inherited: ConfigMap,
    client: Mutex<Option<Client>>,
    last_version: Mutex<Option<String>>,
}

impl RemoteKvStore {
    pub fn from_config(name: &str, cfg: &ConfigMap, refresh: Duration) -> Result<Self> {
        let item = format!("remote_kv store '{}'", name);
        let base_url = cfg_str(&item, cfg, "database_url")?
            .ok_or_else(|| FermenatorError::config(&item, "database_url is required"))?
            .trim_end_matches('/')
            .to_string();
        let root = cfg_str(&item, cfg, "root_path")?
            .unwrap_or_else(|| DEFAULT_ROOT.to_string())
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok(RemoteKvStore {
            name: name.to_string(),
            refresh,
            base_url,
            root,
            auth_token: cfg_str(&item, cfg, "auth_token")?,
            inherited: cfg.clone(),
            client: Mutex::new(None),
            last_version: Mutex::new(None),
        })
    }

    async fn client(&self) -> Result<Client> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        *slot = Some(client.clone());
        Ok(client)
    }

    fn node_url(&self, leaf: &str) -> String {
        let mut segments = self.root.clone();
        segments.push(leaf.to_string());
        let mut url = format!("{}/{}.json", self.base_url, segments.join("/"));
        if let Some(token) = &self.auth_token {
            url.push_str("?auth=");
            url.push_str(token);
        }
        url
    }

    /// Fetch one node under the root; absent nodes come back as None.
    async fn fetch(&self, leaf: &str) -> Result<Option<Value>> {
        let client = self.client().await?;
        let response = client
            .get(self.node_url(leaf))
            .send()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FermenatorError::DataSourceAuth(format!(
                "store returned {} for {}",
                status, leaf
            )));
        }
        if !status.is_success() {
            return Err(FermenatorError::DataSourceRead(format!(
                "store returned {} for {}",
                status, leaf
            )));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn upstream_version(&self) -> Result<String> {
        Ok(match self.fetch("version").await? {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        })
    }
}

#[async_trait]
impl ConfigStore for RemoteKvStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn load(&self) -> Result<ConfigSpec> {
        let version = self.upstream_version().await?;
        let mut doc = serde_json::Map::new();
        for section in ["relays", "datasources", "beers", "managers"] {
            if let Some(value) = self.fetch(section).await? {
                doc.insert(section.to_string(), value);
            }
        }
        let mut spec = ConfigSpec::from_value(Value::Object(doc), &self.inherited)?;
        if !version.is_empty() {
            spec.version = version;
        }
        *self.last_version.lock().await = Some(spec.version.clone());
        Ok(spec)
    }

    async fn has_changed(&self) -> Result<bool> {
        let upstream = self.upstream_version().await?;
        let last = self.last_version.lock().await;
        match last.as_deref() {
            None => Ok(true),
            Some(previous) => Ok(previous != upstream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(cfg: Value) -> RemoteKvStore {
        RemoteKvStore::from_config(
            "fb",
            cfg.as_object().unwrap(),
            Duration::from_secs(300),
        )
        .unwrap()
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(RemoteKvStore::from_config("fb", &ConfigMap::new(), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_node_urls_live_under_the_root() {
        let s = store(json!({ "database_url": "https://db.example/", "auth_token": "tok" }));
        assert_eq!(
            s.node_url("version"),
            "https://db.example/config/fermenator/version.json?auth=tok"
        );
        let custom = store(json!({ "database_url": "https://db.example", "root_path": "apps/brewery" }));
        assert_eq!(
            custom.node_url("beers"),
            "https://db.example/apps/brewery/beers.json"
        );
    }
}
