//! Graphite render-API reads.
//!
//! Serves raw time series only. It knows nothing about batches, so it
//! cannot back a beer directly; it exists for specs that point generic
//! reads at a metrics store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::{cfg_f64, cfg_str, ConfigMap};
use crate::datasource::DataSource;
use crate::error::{FermenatorError, Result};
use crate::sample::Point;

const DEFAULT_WINDOW_SECS: u64 = 900;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GraphiteDataSource {
    name: String,
    base_url: String,
    auth: Option<(String, String)>,
    window_secs: u64,
    client: Mutex<Option<Client>>,
}

#[derive(Deserialize)]
struct RenderTarget {
    datapoints: Vec<(Option<f64>, i64)>,
}

impl GraphiteDataSource {
    pub fn from_config(name: &str, cfg: &ConfigMap) -> Result<Self> {
        let item = format!("datasource '{}'", name);
        let base_url = cfg_str(&item, cfg, "url")?
            .ok_or_else(|| FermenatorError::config(&item, "url is required"))?
            .trim_end_matches('/')
            .to_string();
        let user = cfg_str(&item, cfg, "user")?;
        let password = cfg_str(&item, cfg, "password")?;
        let auth = match (user, password) {
            (Some(u), Some(p)) => Some((u.trim().to_string(), p.trim().to_string())),
            (None, None) => None,
            _ => {
                return Err(FermenatorError::config(
                    &item,
                    "user and password must be provided together",
                ))
            }
        };
        let window_secs = cfg_f64(&item, cfg, "window_seconds")?
            .map(|w| w as u64)
            .unwrap_or(DEFAULT_WINDOW_SECS);
        Ok(GraphiteDataSource {
            name: name.to_string(),
            base_url,
            auth,
            window_secs,
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

    fn render_url(&self, path: &[&str]) -> String {
        format!(
            "{}/render?target={}&from=-{}s&format=json",
            self.base_url,
            path.join("."),
            self.window_secs
        )
    }
}

#[async_trait]
impl DataSource for GraphiteDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, path: &[&str]) -> Result<Vec<Point>> {
        let client = self.client().await?;
        let mut request = client.get(self.render_url(path));
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let response = request
            .send()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FermenatorError::DataSourceAuth(format!(
                "graphite returned {} for {}",
                status,
                path.join(".")
            )));
        }
        if !status.is_success() {
            return Err(FermenatorError::DataSourceRead(format!(
                "graphite returned {} for {}",
                status,
                path.join(".")
            )));
        }
        let targets: Vec<RenderTarget> = response
            .json()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        let target = targets.into_iter().next().ok_or_else(|| {
            FermenatorError::DataSourceRead(format!("no series at {}", path.join(".")))
        })?;
        // Graphite serves oldest-first with null gaps.
        let mut points: Vec<Point> = target
            .datapoints
            .into_iter()
            .filter_map(|(value, ts)| {
                let value = value?;
                let taken_at = DateTime::from_timestamp(ts, 0)?;
                Some(Point { taken_at, value })
            })
            .collect();
        points.reverse();
        Ok(points)
    }

    async fn close(&self) {
        self.client.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(doc: serde_json::Value) -> ConfigMap {
        doc.as_object().unwrap().clone()
    }

    #[test]
    fn test_url_is_required() {
        assert!(GraphiteDataSource::from_config("gr", &ConfigMap::new()).is_err());
    }

    #[test]
    fn test_render_url_shape() {
        let ds = GraphiteDataSource::from_config(
            "gr",
            &cfg(json!({ "url": "https://graphite.example/", "window_seconds": 300 })),
        )
        .unwrap();
        assert_eq!(
            ds.render_url(&["brewery", "pb0044", "temp"]),
            "https://graphite.example/render?target=brewery.pb0044.temp&from=-300s&format=json"
        );
    }

    #[test]
    fn test_lone_credential_is_rejected() {
        let err = GraphiteDataSource::from_config(
            "gr",
            &cfg(json!({ "url": "https://graphite.example", "user": "brewer" })),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_cannot_back_a_beer() {
        let ds = GraphiteDataSource::from_config(
            "gr",
            &cfg(json!({ "url": "https://graphite.example" })),
        )
        .unwrap();
        assert!(!ds.supports_gravity());
        assert!(!ds.supports_temperature());
    }
}
