//! Brew-console reads from a firebase-style hierarchical KV store.
//!
//! The store exposes every node as JSON at `{database_url}/{path}.json`.
//! Batch readings live under `brewery/{id}/readings/`: gravity as
//! thousandths of specific gravity, temperature in Celsius, both with
//! unix-second timestamps. Readings are converted into this source's
//! configured units on the way out.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{cfg_str, ConfigMap};
use crate::datasource::DataSource;
use crate::error::{FermenatorError, Result};
use crate::sample::{Point, Sample};
use crate::units::{convert_gravity, convert_temperature, GravityUnit, TemperatureUnit};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BrewConsoleDataSource {
    name: String,
    database_url: String,
    auth_token: Option<String>,
    gravity_unit: GravityUnit,
    temperature_unit: TemperatureUnit,
    client: Mutex<Option<Client>>,
}

impl BrewConsoleDataSource {
    pub fn from_config(name: &str, cfg: &ConfigMap) -> Result<Self> {
        let item = format!("datasource '{}'", name);
        let database_url = cfg_str(&item, cfg, "database_url")?
            .ok_or_else(|| FermenatorError::config(&item, "database_url is required"))?
            .trim_end_matches('/')
            .to_string();
        let gravity_unit = match cfg_str(&item, cfg, "gravity_unit")? {
            Some(s) => s.parse()?,
            None => GravityUnit::Plato,
        };
        let temperature_unit = match cfg_str(&item, cfg, "temperature_unit")? {
            Some(s) => s.parse()?,
            None => TemperatureUnit::Celsius,
        };
        Ok(BrewConsoleDataSource {
            name: name.to_string(),
            database_url,
            auth_token: cfg_str(&item, cfg, "auth_token")?,
            gravity_unit,
            temperature_unit,
            client: Mutex::new(None),
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

    fn node_url(&self, path: &[&str]) -> String {
        let mut url = format!("{}/{}.json", self.database_url, path.join("/"));
        if let Some(token) = &self.auth_token {
            url.push_str("?auth=");
            url.push_str(token);
        }
        url
    }

    async fn fetch(&self, path: &[&str]) -> Result<Value> {
        let client = self.client().await?;
        let response = client
            .get(self.node_url(path))
            .send()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FermenatorError::DataSourceAuth(format!(
                "store returned {} for {}",
                status,
                path.join("/")
            )));
        }
        if !status.is_success() {
            return Err(FermenatorError::DataSourceRead(format!(
                "store returned {} for {}",
                status,
                path.join("/")
            )));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        if value.is_null() {
            return Err(FermenatorError::DataSourceRead(format!(
                "no data at {}",
                path.join("/")
            )));
        }
        Ok(value)
    }

    async fn latest_reading(&self, identifier: &str, leaf: &str) -> Result<(DateTime<Utc>, f64)> {
        let value = self
            .fetch(&["brewery", identifier, "readings", leaf])
            .await?;
        decode_reading(&value)
            .ok_or_else(|| FermenatorError::DataSourceRead(format!("malformed reading at {}", leaf)))
    }
}

/// A reading node is `{ "timestamp": <unix seconds>, "value": <n> }`.
fn decode_reading(value: &Value) -> Option<(DateTime<Utc>, f64)> {
    let timestamp = value.get("timestamp")?.as_f64()?;
    let reading = value.get("value")?.as_f64()?;
    let taken_at = DateTime::from_timestamp(
        timestamp as i64,
        ((timestamp.fract()) * 1e9) as u32,
    )?;
    Some((taken_at, reading))
}

#[async_trait]
impl DataSource for BrewConsoleDataSource {
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
        let value = self.fetch(path).await?;
        let mut points: Vec<Point> = match &value {
            Value::Array(entries) => entries.iter().filter_map(decode_point).collect(),
            Value::Object(map) if map.contains_key("timestamp") => {
                decode_point(&value).into_iter().collect()
            }
            Value::Object(map) => map.values().filter_map(decode_point).collect(),
            _ => Vec::new(),
        };
        points.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        Ok(points)
    }

    async fn get_gravity(&self, identifier: &str) -> Result<Sample> {
        let (taken_at, raw) = self.latest_reading(identifier, "gravity").await?;
        // The store keeps thousandths of specific gravity.
        let sg = raw / 1000.0;
        let points = convert_gravity(sg, GravityUnit::SpecificGravity, self.gravity_unit);
        Ok(Sample::gravity(taken_at, points, self.gravity_unit))
    }

    async fn get_temperature(&self, identifier: &str) -> Result<Sample> {
        let (taken_at, celsius) = self.latest_reading(identifier, "tilt_temperature").await?;
        let degrees = convert_temperature(celsius, TemperatureUnit::Celsius, self.temperature_unit);
        Ok(Sample::temperature(taken_at, degrees, self.temperature_unit))
    }

    async fn close(&self) {
        self.client.lock().await.take();
    }
}

fn decode_point(value: &Value) -> Option<Point> {
    let (taken_at, value) = decode_reading(value)?;
    Some(Point { taken_at, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(doc: Value) -> ConfigMap {
        doc.as_object().unwrap().clone()
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(BrewConsoleDataSource::from_config("bc", &ConfigMap::new()).is_err());
    }

    #[test]
    fn test_node_url_with_auth() {
        let ds = BrewConsoleDataSource::from_config(
            "bc",
            &cfg(json!({ "database_url": "https://db.example/", "auth_token": "s3cret" })),
        )
        .unwrap();
        assert_eq!(
            ds.node_url(&["brewery", "PB0044", "readings", "gravity"]),
            "https://db.example/brewery/PB0044/readings/gravity.json?auth=s3cret"
        );
    }

    #[test]
    fn test_reading_decodes_unix_seconds() {
        let value = json!({ "timestamp": 1_700_000_000.5, "value": 1042.0 });
        let (taken_at, reading) = decode_reading(&value).unwrap();
        assert_eq!(reading, 1042.0);
        assert_eq!(taken_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_bad_unit_config_is_rejected() {
        let err = BrewConsoleDataSource::from_config(
            "bc",
            &cfg(json!({ "database_url": "https://db.example", "gravity_unit": "brix" })),
        );
        assert!(err.is_err());
    }
}
