//! Bootstrap descriptor handling.
//!
//! The descriptor is a small YAML document under a mandatory top-level
//! `bootstrap` key naming the supervisor, choosing a config-store
//! variant and carrying that variant's connection block. Cloud stores
//! may additionally pull secrets from a shared credentials file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{
    cfg_f64, ConfigMap, ConfigStore, InlineStore, RemoteKvStore, SheetsApiRows, TabularSheetStore,
    DEFAULT_REFRESH_INTERVAL,
};
use crate::error::{FermenatorError, Result};

/// Descriptor search order, first hit wins.
pub const BOOTSTRAP_LOCATIONS: [&str; 3] = [
    ".fermenator",
    "~/.fermenator/config",
    "/etc/fermenator/config",
];

/// Credentials search order for cloud backends, first hit wins.
pub const CREDENTIAL_LOCATIONS: [&str; 3] = [
    ".credentials.json",
    "~/.fermenator/credentials.json",
    "/etc/fermenator/credentials.json",
];

#[derive(Debug, Deserialize)]
pub struct BootstrapFile {
    pub bootstrap: Bootstrap,
}

#[derive(Debug, Deserialize)]
pub struct Bootstrap {
    /// Name used in logs.
    pub name: String,
    /// Config-store variant.
    #[serde(rename = "type")]
    pub kind: String,
    /// Variant-specific block.
    #[serde(default)]
    pub config: Value,
}

/// Expand a leading `~/` against `$HOME`.
fn expand_home(location: &str) -> Option<PathBuf> {
    if let Some(rest) = location.strip_prefix("~/") {
        let home = std::env::var_os("HOME")?;
        Some(Path::new(&home).join(rest))
    } else {
        Some(PathBuf::from(location))
    }
}

/// First existing regular file among the candidate locations.
pub fn locate_first(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .filter_map(|loc| expand_home(loc))
        .find(|path| path.is_file())
}

pub fn parse_bootstrap(text: &str) -> Result<Bootstrap> {
    let file: BootstrapFile = serde_yaml::from_str(text)
        .map_err(|e| FermenatorError::config("bootstrap descriptor", e.to_string()))?;
    Ok(file.bootstrap)
}

/// Locate, read and parse the bootstrap descriptor.
pub fn load_bootstrap() -> Result<Bootstrap> {
    let path = locate_first(&BOOTSTRAP_LOCATIONS).ok_or(FermenatorError::BootstrapNotFound)?;
    debug!(path = %path.display(), "reading bootstrap descriptor");
    let text = std::fs::read_to_string(&path)
        .map_err(|e| FermenatorError::config(path.display().to_string(), e.to_string()))?;
    parse_bootstrap(&text)
}

/// Credentials for cloud backends, when a credentials file exists.
pub fn load_credentials() -> Option<ConfigMap> {
    let path = locate_first(&CREDENTIAL_LOCATIONS)?;
    let text = std::fs::read_to_string(&path).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    value.as_object().cloned()
}

/// Instantiate the configured store variant. Original class names are
/// accepted as aliases so existing descriptors keep working.
pub fn store_from_bootstrap(bootstrap: &Bootstrap) -> Result<Box<dyn ConfigStore>> {
    let cfg: ConfigMap = bootstrap.config.as_object().cloned().unwrap_or_default();
    let item = format!("bootstrap '{}'", bootstrap.name);
    let refresh = match cfg_f64(&item, &cfg, "refresh_interval")? {
        Some(secs) if secs > 0.0 => Duration::from_secs_f64(secs),
        Some(secs) => {
            return Err(FermenatorError::config(
                &item,
                format!("refresh_interval must be positive, got {}", secs),
            ))
        }
        None => DEFAULT_REFRESH_INTERVAL,
    };
    match bootstrap.kind.to_ascii_lowercase().as_str() {
        "inline" | "dictionary" | "dictionaryconfig" => Ok(Box::new(InlineStore::from_bootstrap(
            &bootstrap.name,
            &bootstrap.config,
            refresh,
        )?)),
        "tabular_sheet" | "google_sheet" | "googlesheetconfig" => {
            let rows = SheetsApiRows::from_config(&cfg, load_credentials().as_ref())?;
            Ok(Box::new(TabularSheetStore::new(
                &bootstrap.name,
                Arc::new(rows),
                cfg,
                refresh,
            )))
        }
        "remote_kv" | "firebaseconfig" => Ok(Box::new(RemoteKvStore::from_config(
            &bootstrap.name,
            &cfg,
            refresh,
        )?)),
        other => Err(FermenatorError::config(
            &item,
            format!("unknown config store type '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_inline_descriptor() {
        let text = r#"
bootstrap:
  name: garage
  type: inline
  config:
    refresh_interval: 60
    relays:
      heater:
        type: software
"#;
        let bootstrap = parse_bootstrap(text).unwrap();
        assert_eq!(bootstrap.name, "garage");
        assert_eq!(bootstrap.kind, "inline");
        let store = store_from_bootstrap(&bootstrap).unwrap();
        assert_eq!(store.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_bootstrap_key_is_rejected() {
        assert!(parse_bootstrap("name: garage\n").is_err());
    }

    #[test]
    fn test_unknown_store_type_is_rejected() {
        let bootstrap = parse_bootstrap("bootstrap: { name: x, type: csv }\n").unwrap();
        assert!(store_from_bootstrap(&bootstrap).is_err());
    }

    #[test]
    fn test_original_class_names_still_resolve() {
        let bootstrap = parse_bootstrap(
            "bootstrap: { name: x, type: FirebaseConfig, config: { database_url: 'https://db.example' } }\n",
        )
        .unwrap();
        assert!(store_from_bootstrap(&bootstrap).is_ok());
    }

    #[test]
    fn test_locate_first_takes_the_first_hit() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("config");
        writeln!(std::fs::File::create(&present).unwrap(), "x").unwrap();
        let missing = dir.path().join("missing");
        let candidates = [missing.to_str().unwrap(), present.to_str().unwrap()];
        assert_eq!(locate_first(&candidates).unwrap(), present);
    }
}
