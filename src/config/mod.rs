//! Declarative configuration model.
//!
//! A [`ConfigSpec`] is a pure description of the object graph: four
//! name-to-component maps plus a monotone version token. Stores produce
//! it (see [`store`]), the supervisor validates and materializes it.
//! Nothing in here touches hardware or the network.

mod inline;
mod remote_kv;
mod store;
mod tabular;

pub use inline::InlineStore;
pub use remote_kv::RemoteKvStore;
pub use store::{ConfigStore, DEFAULT_REFRESH_INTERVAL};
pub use tabular::{RowSource, SheetsApiRows, TabularSheetStore};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{FermenatorError, Result};

/// Attribute map of a single component, as decoded from any store.
pub type ConfigMap = serde_json::Map<String, Value>;

/// One named component: a type tag plus its attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub config: ConfigMap,
}

/// The full declarative object graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Opaque monotone token; equal tokens mean equal configuration.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub relays: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub datasources: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub beers: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub managers: BTreeMap<String, ComponentSpec>,
}

impl ConfigSpec {
    /// Parse a spec out of a JSON-shaped document, resolving the
    /// `inherit` marker on datasource config blocks against the
    /// bootstrap-level datastore configuration.
    pub fn from_value(doc: Value, inherited: &ConfigMap) -> Result<ConfigSpec> {
        let mut spec: ConfigSpec = serde_json::from_value(normalize_inherit(doc, inherited)?)
            .map_err(|e| FermenatorError::config("configuration document", e.to_string()))?;
        if spec.version.is_empty() {
            spec.version = spec.fingerprint();
        }
        Ok(spec)
    }

    /// Content-derived version token for sources that have none of
    /// their own: the SHA-256 of the canonical section payload.
    pub fn fingerprint(&self) -> String {
        let payload = serde_json::json!({
            "relays": self.relays,
            "datasources": self.datasources,
            "beers": self.beers,
            "managers": self.managers,
        });
        let digest = Sha256::digest(payload.to_string().as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Referential-integrity check. Every cross-reference must resolve
    /// within this spec, and no relay may serve two roles.
    pub fn validate(&self) -> Result<()> {
        for (name, beer) in &self.beers {
            let item = format!("beer '{}'", name);
            let ds = cfg_str(&item, &beer.config, "datasource")?
                .ok_or_else(|| FermenatorError::config(&item, "datasource is required"))?;
            if !self.datasources.contains_key(&ds) {
                return Err(FermenatorError::MissingReference {
                    kind: "beer",
                    name: name.clone(),
                    referent: "datasource",
                    target: ds,
                });
            }
            if cfg_str(&item, &beer.config, "identifier")?.is_none() {
                return Err(FermenatorError::config(&item, "identifier is required"));
            }
        }
        let mut relay_users: BTreeMap<String, String> = BTreeMap::new();
        for (name, mgr) in &self.managers {
            let item = format!("manager '{}'", name);
            let beer = cfg_str(&item, &mgr.config, "beer")?
                .ok_or_else(|| FermenatorError::config(&item, "beer is required"))?;
            if !self.beers.contains_key(&beer) {
                return Err(FermenatorError::MissingReference {
                    kind: "manager",
                    name: name.clone(),
                    referent: "beer",
                    target: beer,
                });
            }
            for key in ["active_heating_relay", "active_cooling_relay"] {
                if let Some(relay) = cfg_str(&item, &mgr.config, key)? {
                    if !self.relays.contains_key(&relay) {
                        return Err(FermenatorError::MissingReference {
                            kind: "manager",
                            name: name.clone(),
                            referent: "relay",
                            target: relay,
                        });
                    }
                    if let Some(prev) = relay_users.insert(relay.clone(), name.clone()) {
                        return Err(FermenatorError::config(
                            format!("relay '{}'", relay),
                            format!("assigned to both '{}' and '{}'", prev, name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Replace `config: inherit` on datasource entries with the
/// bootstrap-level datastore configuration block.
fn normalize_inherit(mut doc: Value, inherited: &ConfigMap) -> Result<Value> {
    let Some(sources) = doc
        .get_mut("datasources")
        .and_then(Value::as_object_mut)
    else {
        return Ok(doc);
    };
    for (name, entry) in sources.iter_mut() {
        let inherits = matches!(entry.get("config"), Some(Value::String(s)) if s == "inherit");
        if inherits {
            if inherited.is_empty() {
                return Err(FermenatorError::config(
                    format!("datasource '{}'", name),
                    "config is 'inherit' but the bootstrap has no datastore config",
                ));
            }
            entry["config"] = Value::Object(inherited.clone());
        }
    }
    Ok(doc)
}

// ───────────────────────────────────────────────────────────────
// Attribute decoding helpers
// ───────────────────────────────────────────────────────────────
//
// Attributes arrive as JSON values but tabular sources hand us
// strings; these helpers accept both and fail as ConfigInvalid.

pub fn cfg_str(item: &str, cfg: &ConfigMap, key: &str) -> Result<Option<String>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(FermenatorError::config(
            item,
            format!("{} must be a string, got {}", key, other),
        )),
    }
}

pub fn cfg_f64(item: &str, cfg: &ConfigMap, key: &str) -> Result<Option<f64>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
            FermenatorError::config(item, format!("{} must be a number, got '{}'", key, s))
        }),
        Some(other) => Err(FermenatorError::config(
            item,
            format!("{} must be a number, got {}", key, other),
        )),
    }
}

pub fn cfg_u64(item: &str, cfg: &ConfigMap, key: &str) -> Result<Option<u64>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(None),
        // Tabular sources decode every number as f64, so an integral
        // float is as good as an integer here.
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            })
            .map(Some)
            .ok_or_else(|| {
                FermenatorError::config(item, format!("{} must be a non-negative integer", key))
            }),
        Some(Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|_| {
            FermenatorError::config(item, format!("{} must be an integer, got '{}'", key, s))
        }),
        Some(other) => Err(FermenatorError::config(
            item,
            format!("{} must be an integer, got {}", key, other),
        )),
    }
}

pub fn cfg_bool(item: &str, cfg: &ConfigMap, key: &str) -> Result<Option<bool>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f == 0.0 => Ok(Some(false)),
            Some(f) if f == 1.0 => Ok(Some(true)),
            _ => Err(FermenatorError::config(
                item,
                format!("{} must be a boolean", key),
            )),
        },
        Some(Value::String(s)) => parse_bool_token(s).map(Some).ok_or_else(|| {
            FermenatorError::config(item, format!("{} must be a boolean, got '{}'", key, s))
        }),
        Some(other) => Err(FermenatorError::config(
            item,
            format!("{} must be a boolean, got {}", key, other),
        )),
    }
}

/// Case-insensitive boolean vocabulary shared with tabular decoding.
pub(crate) fn parse_bool_token(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(doc: Value) -> ConfigSpec {
        ConfigSpec::from_value(doc, &ConfigMap::new()).unwrap()
    }

    fn minimal_doc() -> Value {
        json!({
            "relays": {
                "heater": { "type": "software" },
                "chiller": { "type": "software" }
            },
            "datasources": {
                "tilt": { "type": "memory" }
            },
            "beers": {
                "PB0044": {
                    "type": "set_point",
                    "config": { "datasource": "tilt", "identifier": "PB0044", "set_point": 18.0 }
                }
            },
            "managers": {
                "ferm1": {
                    "config": {
                        "beer": "PB0044",
                        "active_heating_relay": "heater",
                        "active_cooling_relay": "chiller"
                    }
                }
            }
        })
    }

    #[test]
    fn test_valid_spec_passes() {
        spec(minimal_doc()).validate().unwrap();
    }

    #[test]
    fn test_missing_datasource_reference() {
        let mut doc = minimal_doc();
        doc["beers"]["PB0044"]["config"]["datasource"] = json!("nope");
        let err = spec(doc).validate().unwrap_err();
        assert!(matches!(err, FermenatorError::MissingReference { referent: "datasource", .. }));
    }

    #[test]
    fn test_missing_beer_reference() {
        let mut doc = minimal_doc();
        doc["managers"]["ferm1"]["config"]["beer"] = json!("ghost");
        let err = spec(doc).validate().unwrap_err();
        assert!(matches!(err, FermenatorError::MissingReference { referent: "beer", .. }));
    }

    #[test]
    fn test_relay_shared_between_managers_rejected() {
        let mut doc = minimal_doc();
        doc["managers"]["ferm2"] = json!({
            "config": { "beer": "PB0044", "active_heating_relay": "heater" }
        });
        let err = spec(doc).validate().unwrap_err();
        assert!(err.to_string().contains("assigned to both"));
    }

    #[test]
    fn test_relay_in_both_roles_rejected() {
        let mut doc = minimal_doc();
        doc["managers"]["ferm1"]["config"]["active_cooling_relay"] = json!("heater");
        assert!(spec(doc).validate().is_err());
    }

    #[test]
    fn test_identifier_required() {
        let mut doc = minimal_doc();
        doc["beers"]["PB0044"]["config"]
            .as_object_mut()
            .unwrap()
            .remove("identifier");
        assert!(spec(doc).validate().is_err());
    }

    #[test]
    fn test_inherit_resolves_against_bootstrap_block() {
        let mut inherited = ConfigMap::new();
        inherited.insert("database_url".into(), json!("https://db.example"));
        let doc = json!({
            "datasources": { "shared": { "type": "brewconsole", "config": "inherit" } }
        });
        let spec = ConfigSpec::from_value(doc, &inherited).unwrap();
        assert_eq!(
            spec.datasources["shared"].config["database_url"],
            json!("https://db.example")
        );
    }

    #[test]
    fn test_inherit_without_bootstrap_block_fails() {
        let doc = json!({
            "datasources": { "shared": { "type": "brewconsole", "config": "inherit" } }
        });
        assert!(ConfigSpec::from_value(doc, &ConfigMap::new()).is_err());
    }

    #[test]
    fn test_fingerprint_is_stable_and_version_free() {
        let a = spec(minimal_doc());
        let mut b = spec(minimal_doc());
        b.version = "something-else".into();
        assert_eq!(a.fingerprint(), b.fingerprint());
        let mut c = spec(minimal_doc());
        c.relays.remove("chiller");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
