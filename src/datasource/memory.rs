//! In-process datasource, used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use crate::config::{cfg_f64, ConfigMap};
use crate::datasource::DataSource;
use crate::error::{FermenatorError, Result};
use crate::sample::{Point, Quantity, Sample};
use crate::units::{GravityUnit, TemperatureUnit};

/// Holds samples per batch identifier, newest first. A spec can seed
/// it with literal readings; tests push more at runtime.
pub struct MemoryDataSource {
    name: String,
    batches: RwLock<HashMap<String, Vec<Sample>>>,
}

impl MemoryDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryDataSource {
            name: name.into(),
            batches: RwLock::new(HashMap::new()),
        }
    }

    /// Seed from a `batches` block of literal readings, e.g.
    ///
    /// ```yaml
    /// batches:
    ///   PB0044:
    ///     - { seconds_ago: 30, temperature: 17.5 }
    ///     - { seconds_ago: 30, gravity: 15.5 }
    /// ```
    ///
    /// Units default to Celsius and Plato and can be overridden per
    /// entry with `temperature_unit` / `gravity_unit`.
    pub fn from_config(name: &str, cfg: &ConfigMap) -> Result<Self> {
        let item = format!("datasource '{}'", name);
        let mut store = HashMap::new();
        if let Some(batches) = cfg.get("batches") {
            let batches = batches.as_object().ok_or_else(|| {
                FermenatorError::config(&item, "batches must be a map of identifier to readings")
            })?;
            for (identifier, entries) in batches {
                let entries = entries.as_array().ok_or_else(|| {
                    FermenatorError::config(&item, format!("readings for '{}' must be a list", identifier))
                })?;
                let mut samples = Vec::new();
                for entry in entries {
                    let entry = entry.as_object().ok_or_else(|| {
                        FermenatorError::config(&item, "each reading must be a map")
                    })?;
                    samples.push(decode_reading(&item, entry)?);
                }
                samples.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
                store.insert(identifier.clone(), samples);
            }
        }
        Ok(MemoryDataSource {
            name: name.to_string(),
            batches: RwLock::new(store),
        })
    }

    /// Record a new reading for a batch, keeping newest-first order.
    pub async fn push(&self, identifier: &str, sample: Sample) {
        let mut store = self.batches.write().await;
        let samples = store.entry(identifier.to_string()).or_default();
        samples.insert(0, sample);
    }

    /// Drop all readings for a batch.
    pub async fn clear(&self, identifier: &str) {
        self.batches.write().await.remove(identifier);
    }

    async fn latest(&self, identifier: &str, want_gravity: bool) -> Result<Sample> {
        let store = self.batches.read().await;
        let samples = store.get(identifier).ok_or_else(|| {
            FermenatorError::DataSourceRead(format!("no data for batch '{}'", identifier))
        })?;
        samples
            .iter()
            .find(|s| {
                matches!(
                    (&s.quantity, want_gravity),
                    (Quantity::Gravity { .. }, true) | (Quantity::Temperature { .. }, false)
                )
            })
            .copied()
            .ok_or_else(|| {
                FermenatorError::DataSourceRead(format!(
                    "no {} data for batch '{}'",
                    if want_gravity { "gravity" } else { "temperature" },
                    identifier
                ))
            })
    }
}

fn decode_reading(item: &str, entry: &ConfigMap) -> Result<Sample> {
    let seconds_ago = cfg_f64(item, entry, "seconds_ago")?
        .or(cfg_f64(item, entry, "minutes_ago")?.map(|m| m * 60.0))
        .unwrap_or(0.0);
    let taken_at = Utc::now() - Duration::milliseconds((seconds_ago * 1000.0) as i64);
    if let Some(degrees) = cfg_f64(item, entry, "temperature")? {
        let unit = match entry.get("temperature_unit").and_then(|v| v.as_str()) {
            Some(s) => s.parse()?,
            None => TemperatureUnit::Celsius,
        };
        return Ok(Sample::temperature(taken_at, degrees, unit));
    }
    if let Some(points) = cfg_f64(item, entry, "gravity")? {
        let unit = match entry.get("gravity_unit").and_then(|v| v.as_str()) {
            Some(s) => s.parse()?,
            None => GravityUnit::Plato,
        };
        return Ok(Sample::gravity(taken_at, points, unit));
    }
    if let Some(value) = cfg_f64(item, entry, "ph")? {
        return Ok(Sample::ph(taken_at, value));
    }
    Err(FermenatorError::config(
        item,
        "a reading needs one of temperature, gravity, ph",
    ))
}

fn raw_value(quantity: &Quantity) -> f64 {
    match quantity {
        Quantity::Temperature { degrees, .. } => *degrees,
        Quantity::Gravity { points, .. } => *points,
        Quantity::Ph { value } => *value,
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_gravity(&self) -> bool {
        true
    }

    fn supports_temperature(&self) -> bool {
        true
    }

    async fn get(&self, path: &[&str]) -> Result<Vec<Point>> {
        let Some(identifier) = path.first() else {
            return Err(FermenatorError::DataSourceRead("empty key".into()));
        };
        let store = self.batches.read().await;
        let samples = store.get(*identifier).ok_or_else(|| {
            FermenatorError::DataSourceRead(format!("no data for batch '{}'", identifier))
        })?;
        let wanted = path.get(1).copied();
        Ok(samples
            .iter()
            .filter(|s| match (wanted, &s.quantity) {
                (None, _) => true,
                (Some("temperature"), Quantity::Temperature { .. }) => true,
                (Some("gravity"), Quantity::Gravity { .. }) => true,
                (Some("ph"), Quantity::Ph { .. }) => true,
                _ => false,
            })
            .map(|s| Point {
                taken_at: s.taken_at,
                value: raw_value(&s.quantity),
            })
            .collect())
    }

    async fn get_gravity(&self, identifier: &str) -> Result<Sample> {
        self.latest(identifier, true).await
    }

    async fn get_temperature(&self, identifier: &str) -> Result<Sample> {
        self.latest(identifier, false).await
    }
}
