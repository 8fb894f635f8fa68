//! Fermenator
//!
//! A fermentation-control supervisor for small embedded devices. Each
//! configured beer carries a temperature strategy and a datasource
//! binding; a manager task polls it and drives heating and cooling
//! relays to keep the batch on its fermentation curve. Configuration
//! is declarative and hot-reloadable: the supervisor tears the whole
//! object graph down and rebuilds it whenever the config store reports
//! a change.

pub mod beer;
pub mod bootstrap;
pub mod config;
pub mod datasource;
pub mod error;
pub mod manager;
pub mod relay;
pub mod sample;
pub mod supervisor;
pub mod units;

// Re-exports for convenience
pub use beer::{Beer, Freshness, LinearRampBeer, SetPointBeer};
pub use config::{ConfigSpec, ConfigStore, InlineStore, RemoteKvStore, TabularSheetStore};
pub use datasource::{DataSource, MemoryDataSource};
pub use error::{FermenatorError, Result};
pub use manager::Manager;
pub use relay::{Relay, SoftwareRelay};
pub use sample::{Point, Quantity, Sample};
pub use supervisor::Supervisor;
