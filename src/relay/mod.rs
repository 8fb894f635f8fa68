//! Relay actuators.
//!
//! A relay is a named binary actuator with an observable logical state.
//! Commands are idempotent; callers never track what they last sent.
//! The software variant is a pure in-memory double so the same spec can
//! target hardware or a test rig without change.

mod gpio;

pub use gpio::{DutyCycle, GpioRelay, PinDriver};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::ConfigMap;
use crate::error::Result;

#[async_trait]
pub trait Relay: Send + Sync {
    fn name(&self) -> &str;

    /// Set the logical target state to on. Idempotent.
    async fn on(&self) -> Result<()>;

    /// Set the logical target state to off. Idempotent.
    async fn off(&self) -> Result<()>;

    async fn is_on(&self) -> bool;

    async fn is_off(&self) -> bool {
        !self.is_on().await
    }

    /// Force off and release any hardware resource.
    async fn shutdown(&self);
}

/// In-memory relay used for tests and dry runs. Accepts and ignores
/// any configuration keys so hardware specs load unchanged.
pub struct SoftwareRelay {
    name: String,
    state: Mutex<bool>,
}

impl SoftwareRelay {
    pub fn new(name: impl Into<String>) -> Self {
        SoftwareRelay {
            name: name.into(),
            state: Mutex::new(false),
        }
    }

    pub fn from_config(name: &str, _cfg: &ConfigMap) -> Result<Self> {
        Ok(SoftwareRelay::new(name))
    }
}

#[async_trait]
impl Relay for SoftwareRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !*state {
            info!(relay = %self.name, "turning on");
            *state = true;
        }
        Ok(())
    }

    async fn off(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state {
            info!(relay = %self.name, "turning off");
            *state = false;
        }
        Ok(())
    }

    async fn is_on(&self) -> bool {
        *self.state.lock().await
    }

    async fn shutdown(&self) {
        let _ = self.off().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_software_relay_transitions() {
        let relay = SoftwareRelay::new("heater");
        assert!(relay.is_off().await);
        relay.on().await.unwrap();
        assert!(relay.is_on().await);
        // Idempotent
        relay.on().await.unwrap();
        assert!(relay.is_on().await);
        relay.off().await.unwrap();
        assert!(relay.is_off().await);
    }

    #[tokio::test]
    async fn test_shutdown_forces_off() {
        let relay = SoftwareRelay::new("chiller");
        relay.on().await.unwrap();
        relay.shutdown().await;
        assert!(relay.is_off().await);
    }

    #[tokio::test]
    async fn test_hardware_keys_are_ignored() {
        let mut cfg = ConfigMap::new();
        cfg.insert("pin".into(), json!(17));
        cfg.insert("duty_cycle".into(), json!(0.5));
        cfg.insert("cycle_time".into(), json!(600));
        cfg.insert("something_else".into(), json!("whatever"));
        let relay = SoftwareRelay::from_config("heater", &cfg).unwrap();
        relay.on().await.unwrap();
        assert!(relay.is_on().await);
    }
}
