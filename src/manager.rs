//! Per-beer control loop.
//!
//! A manager owns nothing: it polls its beer on a fixed period and
//! relays the two answers to its heating and cooling actuators. Relay
//! commands are idempotent, so a tick never needs to know what the
//! previous tick decided; duty-cycling stays inside the relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::beer::Beer;
use crate::config::{cfg_bool, cfg_f64, ConfigMap};
use crate::error::{FermenatorError, Result};
use crate::relay::Relay;

pub struct Manager {
    name: String,
    beer: Arc<dyn Beer>,
    heating_relay: Option<Arc<dyn Relay>>,
    cooling_relay: Option<Arc<dyn Relay>>,
    active_heating: bool,
    active_cooling: bool,
    polling_frequency: Duration,
}

impl Manager {
    pub fn from_config(
        name: &str,
        cfg: &ConfigMap,
        beer: Arc<dyn Beer>,
        heating_relay: Option<Arc<dyn Relay>>,
        cooling_relay: Option<Arc<dyn Relay>>,
    ) -> Result<Self> {
        let item = format!("manager '{}'", name);
        let polling_secs = cfg_f64(&item, cfg, "polling_frequency")?
            .ok_or_else(|| FermenatorError::config(&item, "polling_frequency is required"))?;
        if polling_secs <= 0.0 {
            return Err(FermenatorError::config(
                &item,
                format!("polling_frequency must be positive, got {}", polling_secs),
            ));
        }
        Ok(Manager {
            name: name.to_string(),
            beer,
            heating_relay,
            cooling_relay,
            active_heating: cfg_bool(&item, cfg, "active_heating")?.unwrap_or(false),
            active_cooling: cfg_bool(&item, cfg, "active_cooling")?.unwrap_or(false),
            polling_frequency: Duration::from_secs_f64(polling_secs),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One control cycle: ask the beer, then command both relays.
    /// Never fails; every fault is tick-local.
    pub async fn tick(&self) {
        let heating = self.beer.requires_heating().await;
        let cooling = self.beer.requires_cooling().await;
        let (heating, cooling) = if heating && cooling {
            let err = FermenatorError::BeerLogic(self.beer.name().to_string());
            error!(manager = %self.name, %err, "forcing both relays off this poll");
            (false, false)
        } else {
            (heating, cooling)
        };
        if !heating && !cooling {
            debug!(manager = %self.name, beer = %self.beer.name(), "at set point");
        }
        self.drive(self.heating_relay.as_ref(), self.active_heating, heating, "heating")
            .await;
        self.drive(self.cooling_relay.as_ref(), self.active_cooling, cooling, "cooling")
            .await;
    }

    async fn drive(
        &self,
        relay: Option<&Arc<dyn Relay>>,
        enabled: bool,
        wanted: bool,
        role: &'static str,
    ) {
        let Some(relay) = relay else {
            if wanted && enabled {
                warn!(manager = %self.name, "{} required but no {} relay is set", role, role);
            }
            return;
        };
        let target_on = enabled && wanted;
        let result = if target_on {
            relay.on().await
        } else {
            relay.off().await
        };
        if let Err(err) = result {
            warn!(
                manager = %self.name,
                relay = relay.name(),
                %err,
                "relay command failed, retrying next poll"
            );
        }
    }

    /// Command both relays off, tolerating failures.
    pub async fn relays_off(&self) {
        for relay in [self.heating_relay.as_ref(), self.cooling_relay.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = relay.off().await {
                error!(manager = %self.name, relay = relay.name(), %err, "could not release relay");
            }
        }
    }

    /// Start the control loop. The loop observes `stop` at every
    /// suspension point and always releases its relays on the way out.
    pub fn spawn(self: Arc<Self>, stop: watch::Receiver<bool>) -> ManagerHandle {
        let name = self.name.clone();
        let task = tokio::spawn(self.run(stop));
        ManagerHandle { name, task }
    }

    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        debug!(manager = %self.name, beer = %self.beer.name(), "started");
        loop {
            if *stop.borrow() {
                break;
            }
            let started = Instant::now();
            self.tick().await;
            let wait = self.polling_frequency.saturating_sub(started.elapsed());
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.relays_off().await;
        debug!(manager = %self.name, "stopped, relays released");
    }
}

/// Running manager task. Dropping it does not stop the loop; flip the
/// stop channel first, then await the acknowledgement.
pub struct ManagerHandle {
    name: String,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the loop to acknowledge a stop, bounded. Returns false
    /// on timeout, in which case the task is aborted and the caller
    /// must force the relays off itself.
    pub async fn await_stopped(mut self, limit: Duration) -> bool {
        match tokio::time::timeout(limit, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                self.task.abort();
                false
            }
        }
    }
}
