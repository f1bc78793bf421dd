use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Status a broker publishes for the service its container offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    /// The process is not running.
    NotRunning,

    /// The process runs but failed to initialize.
    NotInitialized,

    /// The process is ready.
    Initialized,

    /// The process was restarted with new configuration and is ready again.
    Updated,
}

/// The data of a service node. Written only by the broker owning the
/// service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Path of the container node offering the service.
    pub container_path: String,

    /// Current status.
    pub status: ServiceStatus,
}

impl ServiceRecord {
    /// Creates a record.
    pub fn new(container_path: impl Into<String>, status: ServiceStatus) -> Self {
        Self {
            container_path: container_path.into(),
            status,
        }
    }
}

impl TryFrom<Bytes> for ServiceRecord {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl TryInto<Bytes> for ServiceRecord {
    type Error = Error;

    fn try_into(self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self)?))
    }
}
