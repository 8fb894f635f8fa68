//! Fixed set-point strategy, the classic STC-1000 behavior.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::beer::{Beer, BeerCore, Freshness};
use crate::config::{cfg_f64, ConfigMap};
use crate::datasource::DataSource;
use crate::error::{FermenatorError, Result};

/// Holds the batch inside a dead band around one target temperature:
/// heat below `set_point - tolerance`, cool above `set_point +
/// tolerance`, do nothing in between.
pub struct SetPointBeer {
    core: BeerCore,
    set_point: f64,
}

impl SetPointBeer {
    pub fn from_config(
        name: &str,
        cfg: &ConfigMap,
        datasource: Arc<dyn DataSource>,
    ) -> Result<Self> {
        let item = format!("beer '{}'", name);
        if !datasource.supports_temperature() {
            return Err(FermenatorError::config(
                &item,
                format!(
                    "datasource '{}' cannot serve temperature readings",
                    datasource.name()
                ),
            ));
        }
        let set_point = cfg_f64(&item, cfg, "set_point")?
            .ok_or_else(|| FermenatorError::config(&item, "set_point is required"))?;
        Ok(SetPointBeer {
            core: BeerCore::from_config(name, cfg, datasource)?,
            set_point,
        })
    }
}

#[async_trait]
impl Beer for SetPointBeer {
    fn name(&self) -> &str {
        &self.core.name
    }

    async fn requires_heating(&self) -> bool {
        let Some(temp) = self.core.read_temperature().await else {
            return false;
        };
        let wanted = temp < self.set_point - self.core.tolerance;
        if wanted {
            info!(
                beer = %self.core.name,
                temp,
                set_point = self.set_point,
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
        let wanted = temp > self.set_point + self.core.tolerance;
        if wanted {
            info!(
                beer = %self.core.name,
                temp,
                set_point = self.set_point,
                tolerance = self.core.tolerance,
                "cooling required"
            );
        }
        wanted
    }

    async fn check_freshness(&self) -> Freshness {
        let sample = self.core.datasource.get_temperature(&self.core.identifier).await;
        self.core.classify(&sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MemoryDataSource;
    use crate::sample::Sample;
    use crate::units::TemperatureUnit;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    fn cfg(doc: serde_json::Value) -> ConfigMap {
        doc.as_object().unwrap().clone()
    }

    async fn beer_with_temp(
        set_point: f64,
        tolerance: f64,
        temp: Option<f64>,
        age_secs: i64,
    ) -> SetPointBeer {
        let ds = Arc::new(MemoryDataSource::new("tilt"));
        if let Some(degrees) = temp {
            ds.push(
                "PB0044",
                Sample::temperature(
                    Utc::now() - Duration::seconds(age_secs),
                    degrees,
                    TemperatureUnit::Celsius,
                ),
            )
            .await;
        }
        SetPointBeer::from_config(
            "PB0044",
            &cfg(json!({
                "identifier": "PB0044",
                "set_point": set_point,
                "tolerance": tolerance,
            })),
            ds,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dead_band_holds_still() {
        // set_point 20.0, tolerance 0.5, reading 20.3: inside the band
        let beer = beer_with_temp(20.0, 0.5, Some(20.3), 0).await;
        assert!(!beer.requires_heating().await);
        assert!(!beer.requires_cooling().await);
    }

    #[tokio::test]
    async fn test_cold_beer_needs_heat() {
        // set_point 18.0, tolerance 0.3, reading 17.5
        let beer = beer_with_temp(18.0, 0.3, Some(17.5), 0).await;
        assert!(beer.requires_heating().await);
        assert!(!beer.requires_cooling().await);
    }

    #[tokio::test]
    async fn test_warm_beer_needs_cooling() {
        let beer = beer_with_temp(18.0, 0.3, Some(19.0), 0).await;
        assert!(!beer.requires_heating().await);
        assert!(beer.requires_cooling().await);
    }

    #[tokio::test]
    async fn test_stale_data_still_drives_the_decision() {
        let beer = beer_with_temp(18.0, 0.3, Some(17.5), 3600).await;
        assert_eq!(beer.check_freshness().await, Freshness::Stale);
        assert!(beer.requires_heating().await);
    }

    #[tokio::test]
    async fn test_missing_data_answers_false_twice() {
        let beer = beer_with_temp(18.0, 0.3, None, 0).await;
        assert_eq!(beer.check_freshness().await, Freshness::Missing);
        assert!(!beer.requires_heating().await);
        assert!(!beer.requires_cooling().await);
    }

    #[tokio::test]
    async fn test_rejects_source_without_temperature() {
        let ds = Arc::new(crate::datasource::GraphiteDataSource::from_config(
            "gr",
            &cfg(json!({ "url": "https://graphite.example" })),
        )
        .unwrap());
        let err = SetPointBeer::from_config(
            "PB0044",
            &cfg(json!({ "identifier": "PB0044", "set_point": 18.0 })),
            ds,
        );
        assert!(err.is_err());
    }

    proptest! {
        // Inside the closed dead band neither answer may be yes, and
        // the two answers can never both be yes anywhere.
        #[test]
        fn prop_dead_band_and_contradiction(
            set_point in -5.0f64..35.0,
            tolerance in 0.01f64..5.0,
            offset in -10.0f64..10.0,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let temp = set_point + offset;
                let beer = beer_with_temp(set_point, tolerance, Some(temp), 0).await;
                let heat = beer.requires_heating().await;
                let cool = beer.requires_cooling().await;
                assert!(!(heat && cool));
                if offset.abs() <= tolerance {
                    assert!(!heat && !cool);
                }
            });
        }
    }
}
