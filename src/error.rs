//! Error types for the control runtime.
//!
//! Only the configuration kinds abort assembly; everything else is
//! recovered at tick scope by the component that observed it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FermenatorError>;

#[derive(Error, Debug)]
pub enum FermenatorError {
    /// Structurally or semantically invalid configuration for one item.
    #[error("invalid configuration for {item}: {reason}")]
    ConfigInvalid { item: String, reason: String },

    /// A named reference in the spec does not resolve.
    #[error("{kind} '{name}' references unknown {referent} '{target}'")]
    MissingReference {
        kind: &'static str,
        name: String,
        referent: &'static str,
        target: String,
    },

    /// No bootstrap descriptor could be located.
    #[error("no bootstrap configuration could be found")]
    BootstrapNotFound,

    /// A datasource read failed (network, decode, missing data).
    #[error("datasource read failed: {0}")]
    DataSourceRead(String),

    /// A datasource rejected our credentials. Handled like a read
    /// failure by callers, but logged prominently.
    #[error("datasource authentication failed: {0}")]
    DataSourceAuth(String),

    /// A relay command could not reach the hardware.
    #[error("relay '{relay}' actuation failed: {reason}")]
    RelayActuation { relay: String, reason: String },

    /// A beer answered yes to both heating and cooling in one poll.
    #[error("beer '{0}' requested heating and cooling simultaneously")]
    BeerLogic(String),

    /// Reserved operations, e.g. datasource writes.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl FermenatorError {
    /// Shorthand for [`FermenatorError::ConfigInvalid`].
    pub fn config(item: impl Into<String>, reason: impl Into<String>) -> Self {
        FermenatorError::ConfigInvalid {
            item: item.into(),
            reason: reason.into(),
        }
    }

    /// True for the kinds that reject an assemble (and map to exit code 1).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            FermenatorError::ConfigInvalid { .. }
                | FermenatorError::MissingReference { .. }
                | FermenatorError::BootstrapNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_flagged() {
        assert!(FermenatorError::config("beer 'x'", "bad tolerance").is_config_error());
        assert!(FermenatorError::BootstrapNotFound.is_config_error());
        assert!(!FermenatorError::DataSourceRead("timeout".into()).is_config_error());
        assert!(!FermenatorError::BeerLogic("x".into()).is_config_error());
    }
}
