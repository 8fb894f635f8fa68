//! Hardware relay with optional duty-cycling.
//!
//! The actuation engine drives a [`PinDriver`] seam rather than a
//! concrete chip, so every timing behavior here is testable without a
//! board. The rppal binding behind the `hardware` feature is the only
//! code that touches real GPIO.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{cfg_bool, cfg_f64, cfg_u64, ConfigMap};
use crate::error::{FermenatorError, Result};
use crate::relay::Relay;

/// Output-pin seam. Level is logical: "energized" means the relay coil
/// is driven, whatever the electrical polarity of the board.
pub trait PinDriver: Send + Sync {
    fn energize(&self) -> Result<()>;
    fn deenergize(&self) -> Result<()>;
}

/// Soft-PWM parameters: `fraction` of each `period` spent energized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycle {
    pub fraction: f64,
    pub period: Duration,
}

impl DutyCycle {
    pub fn on_time(&self) -> Duration {
        self.period.mul_f64(self.fraction)
    }

    pub fn off_time(&self) -> Duration {
        self.period.mul_f64(1.0 - self.fraction)
    }
}

struct Cycler {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    failed: Arc<AtomicBool>,
}

impl Cycler {
    /// A cycler only exits on a stop command or a pin-write failure;
    /// a finished task outside of `halt` means the hardware faulted.
    fn is_dead(&self) -> bool {
        self.failed.load(Ordering::SeqCst) || self.task.is_finished()
    }
}

struct GpioState {
    logically_on: bool,
    cycler: Option<Cycler>,
}

/// Relay bound to a single output pin, optionally duty-cycled.
///
/// While logically on with a fractional duty cycle, a background task
/// alternates the pin between energized and de-energized phases until
/// the relay is commanded off. A unit or unset duty cycle holds the pin
/// energized; a zero duty cycle never energizes it.
pub struct GpioRelay {
    name: String,
    duty: Option<DutyCycle>,
    pin: Arc<dyn PinDriver>,
    state: Mutex<GpioState>,
}

impl GpioRelay {
    pub fn new(name: impl Into<String>, pin: Arc<dyn PinDriver>, duty: Option<DutyCycle>) -> Self {
        GpioRelay {
            name: name.into(),
            duty,
            pin,
            state: Mutex::new(GpioState {
                logically_on: false,
                cycler: None,
            }),
        }
    }

    /// Decode duty-cycle attributes shared by all hardware bindings.
    /// A `duty_cycle` without a `cycle_time` is ignored with a warning.
    pub fn duty_from_config(name: &str, cfg: &ConfigMap) -> Result<Option<DutyCycle>> {
        let item = format!("relay '{}'", name);
        let fraction = cfg_f64(&item, cfg, "duty_cycle")?;
        let cycle_time = cfg_f64(&item, cfg, "cycle_time")?;
        match (fraction, cycle_time) {
            (Some(fraction), Some(secs)) => {
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(FermenatorError::config(
                        &item,
                        format!("duty_cycle must be within [0, 1], got {}", fraction),
                    ));
                }
                if secs <= 0.0 {
                    return Err(FermenatorError::config(
                        &item,
                        format!("cycle_time must be positive, got {}", secs),
                    ));
                }
                Ok(Some(DutyCycle {
                    fraction,
                    period: Duration::from_secs_f64(secs),
                }))
            }
            (Some(_), None) => {
                warn!(relay = %name, "duty_cycle specified without cycle_time, ignoring duty_cycle");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    #[cfg(feature = "hardware")]
    pub fn from_config(name: &str, cfg: &ConfigMap) -> Result<Self> {
        let item = format!("relay '{}'", name);
        let pin_number = cfg_u64(&item, cfg, "pin")?
            .or(cfg_u64(&item, cfg, "gpio_pin")?)
            .ok_or_else(|| FermenatorError::config(&item, "pin is required"))?;
        // Relay boards typically switch on a low level.
        let active_high = cfg_bool(&item, cfg, "active_high")?.unwrap_or(false);
        let duty = Self::duty_from_config(name, cfg)?;
        let pin = rpi::RppalPin::open(pin_number as u8, active_high)?;
        Ok(GpioRelay::new(name, Arc::new(pin), duty))
    }

    #[cfg(not(feature = "hardware"))]
    pub fn from_config(name: &str, cfg: &ConfigMap) -> Result<Self> {
        let item = format!("relay '{}'", name);
        // Validate everything so a misconfigured spec fails the same
        // way it would on the target device.
        cfg_u64(&item, cfg, "pin")?
            .or(cfg_u64(&item, cfg, "gpio_pin")?)
            .ok_or_else(|| FermenatorError::config(&item, "pin is required"))?;
        cfg_bool(&item, cfg, "active_high")?;
        Self::duty_from_config(name, cfg)?;
        Err(FermenatorError::config(
            &item,
            "gpio relays require a build with the 'hardware' feature",
        ))
    }

    fn spawn_cycler(&self, duty: DutyCycle) -> Cycler {
        let (stop, mut stopped) = watch::channel(false);
        let pin = Arc::clone(&self.pin);
        let name = self.name.clone();
        let failed = Arc::new(AtomicBool::new(false));
        let failure = Arc::clone(&failed);
        let task = tokio::spawn(async move {
            debug!(relay = %name, fraction = duty.fraction, "duty cycling started");
            loop {
                if let Err(err) = pin.energize() {
                    error!(relay = %name, %err, "pin write failed, stopping duty cycle");
                    failure.store(true, Ordering::SeqCst);
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(duty.on_time()) => {}
                    _ = stopped.changed() => break,
                }
                if let Err(err) = pin.deenergize() {
                    error!(relay = %name, %err, "pin write failed, stopping duty cycle");
                    failure.store(true, Ordering::SeqCst);
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(duty.off_time()) => {}
                    _ = stopped.changed() => break,
                }
            }
            let _ = pin.deenergize();
            debug!(relay = %name, "duty cycling stopped");
        });
        Cycler { stop, task, failed }
    }

    /// Stop the cycling task (if any) and leave the pin de-energized.
    async fn halt(&self, state: &mut GpioState) -> Result<()> {
        if let Some(cycler) = state.cycler.take() {
            let _ = cycler.stop.send(true);
            let _ = cycler.task.await;
        }
        state.logically_on = false;
        self.pin.deenergize().map_err(|err| {
            error!(relay = %self.name, %err, "could not de-energize pin");
            FermenatorError::RelayActuation {
                relay: self.name.clone(),
                reason: err.to_string(),
            }
        })
    }
}

#[async_trait]
impl Relay for GpioRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        // A cycler that died on a pin fault left the relay off in all
        // but name; reap it so this command becomes a retry.
        if state.cycler.as_ref().is_some_and(Cycler::is_dead) {
            warn!(relay = %self.name, "duty cycle task died on a pin fault, retrying");
            self.halt(&mut state).await?;
        }
        if state.logically_on {
            return Ok(());
        }
        match self.duty {
            Some(duty) if duty.fraction <= 0.0 => {
                // Degenerate cycle: logically on, never energized.
                info!(relay = %self.name, "turning on (zero duty cycle)");
            }
            Some(duty) if duty.fraction < 1.0 => {
                info!(relay = %self.name, fraction = duty.fraction, "turning on (duty cycled)");
                state.cycler = Some(self.spawn_cycler(duty));
            }
            _ => {
                info!(relay = %self.name, "turning on");
                self.pin.energize().map_err(|err| {
                    error!(relay = %self.name, %err, "could not energize pin");
                    FermenatorError::RelayActuation {
                        relay: self.name.clone(),
                        reason: err.to_string(),
                    }
                })?;
            }
        }
        state.logically_on = true;
        Ok(())
    }

    async fn off(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.logically_on {
            info!(relay = %self.name, "turning off");
        }
        self.halt(&mut state).await
    }

    async fn is_on(&self) -> bool {
        let state = self.state.lock().await;
        if state.cycler.as_ref().is_some_and(Cycler::is_dead) {
            return false;
        }
        state.logically_on
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let _ = self.halt(&mut state).await;
    }
}

impl Drop for GpioRelay {
    fn drop(&mut self) {
        // Last line of defence on abnormal exit paths.
        let _ = self.pin.deenergize();
    }
}

#[cfg(feature = "hardware")]
mod rpi {
    use std::sync::Mutex;

    use rppal::gpio::{Gpio, OutputPin};

    use crate::error::{FermenatorError, Result};
    use crate::relay::PinDriver;

    /// Raspberry Pi output pin. Serializes writes and applies the
    /// board's electrical polarity.
    pub struct RppalPin {
        pin: Mutex<OutputPin>,
        active_high: bool,
    }

    impl RppalPin {
        pub fn open(bcm_pin: u8, active_high: bool) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| {
                FermenatorError::config(format!("gpio pin {}", bcm_pin), e.to_string())
            })?;
            let mut pin = gpio
                .get(bcm_pin)
                .map_err(|e| {
                    FermenatorError::config(format!("gpio pin {}", bcm_pin), e.to_string())
                })?
                .into_output();
            // Keep the relay released from the very first instant.
            if active_high {
                pin.set_low();
            } else {
                pin.set_high();
            }
            Ok(RppalPin {
                pin: Mutex::new(pin),
                active_high,
            })
        }
    }

    impl RppalPin {
        fn write(&self, energized: bool) -> Result<()> {
            let mut pin = self.pin.lock().map_err(|_| FermenatorError::RelayActuation {
                relay: "gpio".into(),
                reason: "pin lock poisoned".into(),
            })?;
            if energized == self.active_high {
                pin.set_high();
            } else {
                pin.set_low();
            }
            Ok(())
        }
    }

    impl PinDriver for RppalPin {
        fn energize(&self) -> Result<()> {
            self.write(true)
        }

        fn deenergize(&self) -> Result<()> {
            self.write(false)
        }
    }
}
