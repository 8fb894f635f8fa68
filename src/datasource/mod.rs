//! Read-only sample providers.
//!
//! A datasource is a named view over some remote store. Beers reference
//! one by name and only ever ask three things of it: raw newest-first
//! records at a hierarchical key, the latest gravity for a batch, and
//! the latest temperature for a batch. Authentication, caching and rate
//! limiting stay behind this boundary.

mod brewconsole;
mod graphite;
mod memory;

pub use brewconsole::BrewConsoleDataSource;
pub use graphite::GraphiteDataSource;
pub use memory::MemoryDataSource;

use async_trait::async_trait;

use crate::error::{FermenatorError, Result};
use crate::sample::{Point, Sample};

#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`DataSource::get_gravity`] is implemented. Checked at
    /// assemble time: a beer that needs gravity cannot be bound to a
    /// source that cannot serve it.
    fn supports_gravity(&self) -> bool {
        false
    }

    /// Whether [`DataSource::get_temperature`] is implemented.
    fn supports_temperature(&self) -> bool {
        false
    }

    /// Newest-first records at a hierarchical key.
    async fn get(&self, path: &[&str]) -> Result<Vec<Point>>;

    /// Most recent gravity reading for a batch identifier.
    async fn get_gravity(&self, _identifier: &str) -> Result<Sample> {
        Err(FermenatorError::NotImplemented("gravity readings"))
    }

    /// Most recent temperature reading for a batch identifier.
    async fn get_temperature(&self, _identifier: &str) -> Result<Sample> {
        Err(FermenatorError::NotImplemented("temperature readings"))
    }

    /// Reserved write operation. The control runtime never calls it.
    async fn set(&self, _path: &[&str], _value: f64) -> Result<()> {
        Err(FermenatorError::NotImplemented("datasource writes"))
    }

    /// Release any lazily-opened network resource.
    async fn close(&self) {}
}
