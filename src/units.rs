//! Temperature and gravity units, and the conversions between them.
//!
//! Beers declare the units they think in; datasources tag the samples
//! they return. Everything is normalized at the point of reading, so
//! the decision logic never sees a mixed-unit comparison.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FermenatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl FromStr for TemperatureUnit {
    type Err = FermenatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" | "CELSIUS" | "CELCIUS" => Ok(TemperatureUnit::Celsius),
            "F" | "FAHRENHEIT" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(FermenatorError::config(
                "temperature_unit",
                format!("'{}' is not one of C, F", other),
            )),
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::Celsius => write!(f, "C"),
            TemperatureUnit::Fahrenheit => write!(f, "F"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GravityUnit {
    Plato,
    SpecificGravity,
}

impl FromStr for GravityUnit {
    type Err = FermenatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" | "PLATO" => Ok(GravityUnit::Plato),
            "SG" | "SPECIFIC_GRAVITY" => Ok(GravityUnit::SpecificGravity),
            other => Err(FermenatorError::config(
                "gravity_unit",
                format!("'{}' is not one of P, SG", other),
            )),
        }
    }
}

impl fmt::Display for GravityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GravityUnit::Plato => write!(f, "P"),
            GravityUnit::SpecificGravity => write!(f, "SG"),
        }
    }
}

pub fn fahrenheit_to_celsius(degrees: f64) -> f64 {
    (degrees - 32.0) * 5.0 / 9.0
}

pub fn celsius_to_fahrenheit(degrees: f64) -> f64 {
    degrees * 9.0 / 5.0 + 32.0
}

/// Standard cubic fit used across the brewing industry.
pub fn sg_to_plato(sg: f64) -> f64 {
    135.997 * sg.powi(3) - 630.272 * sg.powi(2) + 1111.14 * sg - 616.868
}

/// Inverse relation from the 259-family of approximations. Round-trips
/// with [`sg_to_plato`] to well within 0.05 degrees Plato on [0, 30].
pub fn plato_to_sg(plato: f64) -> f64 {
    1.0 + plato / (258.6 - 227.1 * (plato / 258.2))
}

pub fn convert_temperature(value: f64, from: TemperatureUnit, to: TemperatureUnit) -> f64 {
    match (from, to) {
        (TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit) => celsius_to_fahrenheit(value),
        (TemperatureUnit::Fahrenheit, TemperatureUnit::Celsius) => fahrenheit_to_celsius(value),
        _ => value,
    }
}

pub fn convert_gravity(value: f64, from: GravityUnit, to: GravityUnit) -> f64 {
    match (from, to) {
        (GravityUnit::SpecificGravity, GravityUnit::Plato) => sg_to_plato(value),
        (GravityUnit::Plato, GravityUnit::SpecificGravity) => plato_to_sg(value),
        _ => value,
    }
}
