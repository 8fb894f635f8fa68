//! Gravity-linear temperature ramp.
//!
//! The target temperature slides from a start to an end set point as
//! fermentation progresses, with progress measured by how far gravity
//! has dropped between the original and final values. Outside that
//! span the ramp pins to its endpoints, so an over- or under-attenuated
//! batch is handled like a plain set-point beer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::beer::{Beer, BeerCore, Freshness};
use crate::config::{cfg_f64, ConfigMap};
use crate::datasource::DataSource;
use crate::error::{FermenatorError, Result};

pub struct LinearRampBeer {
    core: BeerCore,
    original_gravity: f64,
    final_gravity: f64,
    start_set_point: f64,
    end_set_point: f64,
}

impl LinearRampBeer {
    pub fn from_config(
        name: &str,
        cfg: &ConfigMap,
        datasource: Arc<dyn DataSource>,
    ) -> Result<Self> {
        let item = format!("beer '{}'", name);
        if !datasource.supports_temperature() || !datasource.supports_gravity() {
            return Err(FermenatorError::config(
                &item,
                format!(
                    "datasource '{}' cannot serve both temperature and gravity readings",
                    datasource.name()
                ),
            ));
        }
        let require = |key: &str| -> Result<f64> {
            cfg_f64(&item, cfg, key)?
                .ok_or_else(|| FermenatorError::config(&item, format!("{} is required", key)))
        };
        let original_gravity = require("original_gravity")?;
        let final_gravity = require("final_gravity")?;
        let start_set_point = require("start_set_point")?;
        let end_set_point = require("end_set_point")?;
        if original_gravity == final_gravity {
            return Err(FermenatorError::config(
                &item,
                "original_gravity and final_gravity must differ",
            ));
        }
        Ok(LinearRampBeer {
            core: BeerCore::from_config(name, cfg, datasource)?,
            original_gravity,
            final_gravity,
            start_set_point,
            end_set_point,
        })
    }

    /// Fraction of planned attenuation completed, clamped to [0, 1].
    fn progress(&self, gravity: f64) -> f64 {
        let span = self.original_gravity - self.final_gravity;
        ((self.original_gravity - gravity) / span).clamp(0.0, 1.0)
    }

    fn target_for(&self, progress: f64) -> f64 {
        self.start_set_point + progress * (self.end_set_point - self.start_set_point)
    }

    /// Current target temperature. With no usable gravity reading the
    /// ramp holds its conservative starting point.
    async fn effective_set_point(&self) -> f64 {
        match self.core.read_gravity().await {
            Some(gravity) => {
                let progress = self.progress(gravity);
                let target = self.target_for(progress);
                info!(
                    beer = %self.core.name,
                    gravity,
                    progress_pct = progress * 100.0,
                    target,
                    "ramp position"
                );
                target
            }
            None => {
                warn!(
                    beer = %self.core.name,
                    start_set_point = self.start_set_point,
                    "gravity unavailable, holding the start set point"
                );
                self.start_set_point
            }
        }
    }
}

#[async_trait]
impl Beer for LinearRampBeer {
    fn name(&self) -> &str {
        &self.core.name
    }

    async fn requires_heating(&self) -> bool {
        let Some(temp) = self.core.read_temperature().await else {
            return false;
        };
        let target = self.effective_set_point().await;
        let wanted = temp < target - self.core.tolerance;
        if wanted {
            info!(
                beer = %self.core.name,
                temp,
                target,
                tolerance = self.core.tolerance,
                "heating required"
            );
        }
        wanted
    }

    async fn requires_cooling(&self) -> bool {
        let Some(temp) = self.core.read_temperature().await else {
            return false;
        };
        let target = self.effective_set_point().await;
        let wanted = temp > target + self.core.tolerance;
        if wanted {
            info!(
                beer = %self.core.name,
                temp,
                target,
                tolerance = self.core.tolerance,
                "cooling required"
            );
        }
        wanted
    }

    async fn check_freshness(&self) -> Freshness {
        let temperature = self
            .core
            .datasource
            .get_temperature(&self.core.identifier)
            .await;
        let gravity = self.core.datasource.get_gravity(&self.core.identifier).await;
        self.core
            .classify(&temperature)
            .max(self.core.classify(&gravity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MemoryDataSource;
    use crate::sample::Sample;
    use crate::units::{GravityUnit, TemperatureUnit};
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;

    fn cfg(doc: serde_json::Value) -> ConfigMap {
        doc.as_object().unwrap().clone()
    }

    fn ramp_config() -> ConfigMap {
        cfg(json!({
            "identifier": "PB0044",
            "original_gravity": 27.0,
            "final_gravity": 4.0,
            "start_set_point": 18.0,
            "end_set_point": 25.0,
            "tolerance": 0.3,
        }))
    }

    async fn ramp_beer(temp: Option<f64>, gravity: Option<f64>) -> LinearRampBeer {
        let ds = Arc::new(MemoryDataSource::new("tilt"));
        if let Some(degrees) = temp {
            ds.push(
                "PB0044",
                Sample::temperature(Utc::now(), degrees, TemperatureUnit::Celsius),
            )
            .await;
        }
        if let Some(points) = gravity {
            ds.push(
                "PB0044",
                Sample::gravity(Utc::now(), points, GravityUnit::Plato),
            )
            .await;
        }
        LinearRampBeer::from_config("PB0044", &ramp_config(), ds).unwrap()
    }

    #[tokio::test]
    async fn test_midway_ramp_asks_for_heat() {
        // progress = (27 - 15.5) / 23 = 0.5, target = 21.5;
        // 21.0 < 21.5 - 0.3 so heating is on
        let beer = ramp_beer(Some(21.0), Some(15.5)).await;
        assert!(beer.requires_heating().await);
        assert!(!beer.requires_cooling().await);
    }

    #[tokio::test]
    async fn test_over_attenuated_pins_to_end_point() {
        // gravity 2.0 clamps progress to 1, target = 25.0; 26.0 > 25.3
        let beer = ramp_beer(Some(26.0), Some(2.0)).await;
        assert!(!beer.requires_heating().await);
        assert!(beer.requires_cooling().await);
    }

    #[tokio::test]
    async fn test_pre_fermentation_pins_to_start_point() {
        // gravity above original clamps progress to 0, target = 18.0
        let beer = ramp_beer(Some(17.0), Some(30.0)).await;
        assert!(beer.requires_heating().await);
    }

    #[tokio::test]
    async fn test_missing_gravity_holds_start_set_point() {
        let beer = ramp_beer(Some(17.0), None).await;
        // target falls back to 18.0; 17.0 < 18.0 - 0.3
        assert!(beer.requires_heating().await);
        // and a warm batch against the start point wants cooling
        let beer = ramp_beer(Some(19.0), None).await;
        assert!(beer.requires_cooling().await);
    }

    #[tokio::test]
    async fn test_missing_temperature_answers_false() {
        let beer = ramp_beer(None, Some(15.5)).await;
        assert!(!beer.requires_heating().await);
        assert!(!beer.requires_cooling().await);
        assert_eq!(beer.check_freshness().await, Freshness::Missing);
    }

    #[tokio::test]
    async fn test_cooling_ramp_is_legal() {
        let ds = Arc::new(MemoryDataSource::new("tilt"));
        ds.push("PB0044", Sample::temperature(Utc::now(), 20.0, TemperatureUnit::Celsius)).await;
        ds.push("PB0044", Sample::gravity(Utc::now(), 8.0, GravityUnit::Plato)).await;
        let mut cfg = ramp_config();
        cfg.insert("start_set_point".into(), json!(22.0));
        cfg.insert("end_set_point".into(), json!(12.0));
        let beer = LinearRampBeer::from_config("PB0044", &cfg, ds).unwrap();
        // progress = 19/23, target ~ 13.7; 20.0 is far above
        assert!(beer.requires_cooling().await);
    }

    #[test]
    fn test_flat_gravity_span_is_rejected() {
        let ds = Arc::new(MemoryDataSource::new("tilt"));
        let mut cfg = ramp_config();
        cfg.insert("final_gravity".into(), json!(27.0));
        assert!(LinearRampBeer::from_config("PB0044", &cfg, ds).is_err());
    }

    proptest! {
        // Outside the gravity span the target sticks to an endpoint.
        #[test]
        fn prop_ramp_clamps_to_endpoints(gravity in -5.0f64..40.0) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let beer = rt.block_on(ramp_beer(Some(20.0), None));
            let target = beer.target_for(beer.progress(gravity));
            if gravity >= 27.0 {
                prop_assert_eq!(target, 18.0);
            } else if gravity <= 4.0 {
                prop_assert_eq!(target, 25.0);
            } else {
                prop_assert!((18.0..=25.0).contains(&target));
            }
        }
    }
}
