//! Configuration store contract.
//!
//! A store produces [`ConfigSpec`]s and answers a cheap "did anything
//! change" question so the supervisor knows when a reload is warranted.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConfigSpec;
use crate::error::Result;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[async_trait]
pub trait ConfigStore: Send + Sync {
    fn name(&self) -> &str;

    /// Seconds between change checks.
    fn refresh_interval(&self) -> Duration;

    /// Produce the current spec and remember its version token.
    async fn load(&self) -> Result<ConfigSpec>;

    /// Compare the upstream version token against the one recorded at
    /// the last load. Never tears anything down by itself.
    async fn has_changed(&self) -> Result<bool>;
}
