//! Timestamped readings as surfaced by datasources.
//!
//! A [`Point`] is the raw shape served by hierarchical-key reads: a
//! wall-clock instant and a bare number whose meaning depends on the
//! key it was read from. A [`Sample`] is the unit-tagged shape served
//! by the specialized gravity/temperature getters.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::units::{convert_gravity, convert_temperature, GravityUnit, TemperatureUnit};

/// Raw record at a hierarchical key, newest-first in sequences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub taken_at: DateTime<Utc>,
    pub value: f64,
}

/// A measured quantity with its unit carried alongside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quantity {
    Temperature { degrees: f64, unit: TemperatureUnit },
    Gravity { points: f64, unit: GravityUnit },
    Ph { value: f64 },
}

/// An immutable, unit-tagged reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub taken_at: DateTime<Utc>,
    pub quantity: Quantity,
}

impl Sample {
    pub fn temperature(taken_at: DateTime<Utc>, degrees: f64, unit: TemperatureUnit) -> Self {
        Sample {
            taken_at,
            quantity: Quantity::Temperature { degrees, unit },
        }
    }

    pub fn gravity(taken_at: DateTime<Utc>, points: f64, unit: GravityUnit) -> Self {
        Sample {
            taken_at,
            quantity: Quantity::Gravity { points, unit },
        }
    }

    pub fn ph(taken_at: DateTime<Utc>, value: f64) -> Self {
        Sample {
            taken_at,
            quantity: Quantity::Ph { value },
        }
    }

    /// Wall-clock age of the reading.
    pub fn age(&self) -> Duration {
        Utc::now() - self.taken_at
    }

    /// Temperature normalized into `unit`, if this is a temperature.
    pub fn temperature_in(&self, unit: TemperatureUnit) -> Option<f64> {
        match self.quantity {
            Quantity::Temperature { degrees, unit: from } => {
                Some(convert_temperature(degrees, from, unit))
            }
            _ => None,
        }
    }

    /// Gravity normalized into `unit`, if this is a gravity.
    pub fn gravity_in(&self, unit: GravityUnit) -> Option<f64> {
        match self.quantity {
            Quantity::Gravity { points, unit: from } => {
                Some(convert_gravity(points, from, unit))
            }
            _ => None,
        }
    }
}
