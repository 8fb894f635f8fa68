//! Fermentation-control strategies.
//!
//! A beer models one batch under temperature control. The whole public
//! contract is three questions: does it need heating, does it need
//! cooling, and how fresh is the data behind the answer. Strategies
//! never actuate anything; the manager owns the relays.

mod linear_ramp;
mod set_point;

pub use linear_ramp::LinearRampBeer;
pub use set_point::SetPointBeer;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, warn};

use crate::config::{cfg_f64, cfg_str, ConfigMap};
use crate::datasource::DataSource;
use crate::error::{FermenatorError, Result};
use crate::sample::Sample;
use crate::units::{GravityUnit, TemperatureUnit};

/// Age classification of the newest reading behind a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

#[async_trait]
pub trait Beer: Send + Sync {
    fn name(&self) -> &str;

    async fn requires_heating(&self) -> bool;

    async fn requires_cooling(&self) -> bool;

    async fn check_freshness(&self) -> Freshness;
}

const DEFAULT_TOLERANCE: f64 = 0.5;
const DEFAULT_DATA_AGE_WARNING_SECS: f64 = 1800.0;
const STALE_WARNING_THROTTLE: Duration = Duration::from_secs(1);

/// State and plumbing shared by every strategy: the datasource binding,
/// unit declarations, tolerance band and data-age bookkeeping.
pub(crate) struct BeerCore {
    pub name: String,
    pub datasource: Arc<dyn DataSource>,
    pub identifier: String,
    pub gravity_unit: GravityUnit,
    pub temperature_unit: TemperatureUnit,
    pub data_age_warning: Duration,
    pub tolerance: f64,
    last_stale_warning: Mutex<Option<Instant>>,
}

impl BeerCore {
    pub fn from_config(
        name: &str,
        cfg: &ConfigMap,
        datasource: Arc<dyn DataSource>,
    ) -> Result<Self> {
        let item = format!("beer '{}'", name);
        let identifier = cfg_str(&item, cfg, "identifier")?
            .ok_or_else(|| FermenatorError::config(&item, "identifier is required"))?;
        let gravity_unit = match cfg_str(&item, cfg, "gravity_unit")? {
            Some(s) => s.parse()?,
            None => GravityUnit::Plato,
        };
        let temperature_unit = match cfg_str(&item, cfg, "temperature_unit")? {
            Some(s) => s.parse()?,
            None => TemperatureUnit::Celsius,
        };
        let tolerance = cfg_f64(&item, cfg, "tolerance")?.unwrap_or(DEFAULT_TOLERANCE);
        if tolerance <= 0.0 {
            return Err(FermenatorError::config(
                &item,
                format!("tolerance must be positive, got {}", tolerance),
            ));
        }
        let warning_secs =
            cfg_f64(&item, cfg, "data_age_warning_time")?.unwrap_or(DEFAULT_DATA_AGE_WARNING_SECS);
        if warning_secs <= 0.0 {
            return Err(FermenatorError::config(
                &item,
                "data_age_warning_time must be positive",
            ));
        }
        Ok(BeerCore {
            name: name.to_string(),
            datasource,
            identifier,
            gravity_unit,
            temperature_unit,
            data_age_warning: Duration::from_secs_f64(warning_secs),
            tolerance,
            last_stale_warning: Mutex::new(None),
        })
    }

    /// Latest temperature in this beer's declared unit, or None when
    /// the read failed or carried the wrong quantity. Failures are
    /// logged here so strategies can simply answer "no actuation".
    pub async fn read_temperature(&self) -> Option<f64> {
        match self.datasource.get_temperature(&self.identifier).await {
            Ok(sample) => {
                self.note_age(&sample);
                sample.temperature_in(self.temperature_unit)
            }
            Err(err) => {
                self.log_read_failure("temperature", &err);
                None
            }
        }
    }

    /// Latest gravity in this beer's declared unit, or None.
    pub async fn read_gravity(&self) -> Option<f64> {
        match self.datasource.get_gravity(&self.identifier).await {
            Ok(sample) => {
                self.note_age(&sample);
                sample.gravity_in(self.gravity_unit)
            }
            Err(err) => {
                self.log_read_failure("gravity", &err);
                None
            }
        }
    }

    fn log_read_failure(&self, what: &str, err: &FermenatorError) {
        match err {
            FermenatorError::DataSourceAuth(_) => {
                error!(beer = %self.name, %err, "{} read rejected by datasource auth", what);
            }
            _ => {
                warn!(beer = %self.name, %err, "no {} data this poll", what);
            }
        }
    }

    /// Warn when a reading is older than the configured threshold.
    /// Warnings are throttled so the heating and cooling queries of a
    /// single poll produce at most one.
    fn note_age(&self, sample: &Sample) {
        let age = sample.age();
        if age.num_seconds() < self.data_age_warning.as_secs() as i64 {
            return;
        }
        let mut last = self.last_stale_warning.lock().expect("stale warning lock");
        let due = last
            .map(|at| at.elapsed() >= STALE_WARNING_THROTTLE)
            .unwrap_or(true);
        if due {
            warn!(
                beer = %self.name,
                age_seconds = age.num_seconds(),
                threshold_seconds = self.data_age_warning.as_secs(),
                "data is stale, still acting on the newest sample"
            );
            *last = Some(Instant::now());
        }
    }

    /// Classify one reading stream for [`Beer::check_freshness`].
    pub fn classify(&self, sample: &Result<Sample>) -> Freshness {
        match sample {
            Err(_) => Freshness::Missing,
            Ok(sample) => {
                if sample.age().num_seconds() >= self.data_age_warning.as_secs() as i64 {
                    Freshness::Stale
                } else {
                    Freshness::Fresh
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MemoryDataSource;
    use chrono::Utc;
    use serde_json::json;

    fn cfg(doc: serde_json::Value) -> ConfigMap {
        doc.as_object().unwrap().clone()
    }

    fn core(cfg_doc: serde_json::Value) -> Result<BeerCore> {
        let ds = Arc::new(MemoryDataSource::new("tilt"));
        BeerCore::from_config("PB0044", &cfg(cfg_doc), ds)
    }

    #[test]
    fn test_defaults() {
        let core = core(json!({ "identifier": "PB0044" })).unwrap();
        assert_eq!(core.tolerance, 0.5);
        assert_eq!(core.data_age_warning, Duration::from_secs(1800));
        assert_eq!(core.gravity_unit, GravityUnit::Plato);
        assert_eq!(core.temperature_unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn test_tolerance_must_be_positive() {
        assert!(core(json!({ "identifier": "PB0044", "tolerance": 0.0 })).is_err());
        assert!(core(json!({ "identifier": "PB0044", "tolerance": -0.5 })).is_err());
    }

    #[test]
    fn test_identifier_is_required() {
        assert!(core(json!({})).is_err());
    }

    #[tokio::test]
    async fn test_reads_normalize_units() {
        let ds = Arc::new(MemoryDataSource::new("tilt"));
        ds.push(
            "PB0044",
            Sample::temperature(Utc::now(), 68.0, TemperatureUnit::Fahrenheit),
        )
        .await;
        let core = BeerCore::from_config(
            "PB0044",
            &cfg(json!({ "identifier": "PB0044", "temperature_unit": "C" })),
            ds,
        )
        .unwrap();
        let celsius = core.read_temperature().await.unwrap();
        assert!((celsius - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_read_failure_becomes_none() {
        let core = core(json!({ "identifier": "PB0044" })).unwrap();
        assert_eq!(core.read_temperature().await, None);
        assert_eq!(core.read_gravity().await, None);
    }

    #[test]
    fn test_freshness_classification() {
        let core = core(json!({ "identifier": "PB0044", "data_age_warning_time": 1800 })).unwrap();
        let fresh = Ok(Sample::temperature(
            Utc::now(),
            20.0,
            TemperatureUnit::Celsius,
        ));
        let stale = Ok(Sample::temperature(
            Utc::now() - chrono::Duration::seconds(3600),
            20.0,
            TemperatureUnit::Celsius,
        ));
        let missing: Result<Sample> = Err(FermenatorError::DataSourceRead("gone".into()));
        assert_eq!(core.classify(&fresh), Freshness::Fresh);
        assert_eq!(core.classify(&stale), Freshness::Stale);
        assert_eq!(core.classify(&missing), Freshness::Missing);
    }
}
