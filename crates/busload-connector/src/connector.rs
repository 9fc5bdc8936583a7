//! [`Connector`] – endpoint lookup, and [`ConnectorFactory`] – construction.
//!
//! A connector is created once per process from a configuration file path
//! and a profile name.  Both are opaque to the bridge and passed through
//! verbatim to the factory.

use std::path::Path;
use std::sync::Arc;

use busload_types::{BridgeError, EndpointRef};

use crate::endpoint::{InputHandle, OutputHandle};

/// A live connection to the bus that can resolve named endpoints.
pub trait Connector: Send + Sync {
    /// Look up an input by name.  `None` when the profile has no such input.
    fn input(&self, name: &EndpointRef) -> Option<Arc<dyn InputHandle>>;

    /// Look up an output by name.  `None` when the profile has no such output.
    fn output(&self, name: &EndpointRef) -> Option<Arc<dyn OutputHandle>>;
}

/// Builds a [`Connector`] from `(config_path, config_name)`.
pub trait ConnectorFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BridgeError::Connector`] or [`BridgeError::Config`] when the
    /// connector cannot be created.  Callers treat both as fatal.
    fn create(&self, config_path: &Path, config_name: &str)
    -> Result<Arc<dyn Connector>, BridgeError>;
}

impl<F> ConnectorFactory for F
where
    F: Fn(&Path, &str) -> Result<Arc<dyn Connector>, BridgeError> + Send + Sync,
{
    fn create(
        &self,
        config_path: &Path,
        config_name: &str,
    ) -> Result<Arc<dyn Connector>, BridgeError> {
        self(config_path, config_name)
    }
}
