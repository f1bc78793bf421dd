//! Naming of services and paths in the coordination store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod layout;
mod record;

pub use error::{Error, Result};
pub use layout::Layout;
pub use record::{ServiceRecord, ServiceStatus};

use bytes::Bytes;
use convoy_coordination::{basename, join};

/// Maps service names to their registration nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamingService {
    root: String,
}

impl NamingService {
    /// Creates a naming service rooted at `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// The naming root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The node a service registers at.
    #[must_use]
    pub fn resolve_service_path(&self, name: &str) -> String {
        join(&self.root, name)
    }

    /// The service registered at `path`.
    #[must_use]
    pub fn service_name<'a>(&self, path: &'a str) -> &'a str {
        basename(path)
    }

    /// Encodes a record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize_record(&self, record: &ServiceRecord) -> Result<Bytes> {
        record.clone().try_into()
    }

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a service record.
    pub fn deserialize_record(&self, bytes: Bytes) -> Result<ServiceRecord> {
        ServiceRecord::try_from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_service_path() {
        let naming = NamingService::new("/shop/services");

        assert_eq!(naming.resolve_service_path("db"), "/shop/services/db");
        assert_eq!(naming.service_name("/shop/services/db"), "db");
    }

    #[test]
    fn test_record_codec() {
        let naming = NamingService::new("/shop/services");
        let record = ServiceRecord::new("/shop/data/db", ServiceStatus::NotInitialized);

        let bytes = naming.serialize_record(&record).unwrap();
        assert_eq!(
            bytes,
            Bytes::from_static(br#"{"container_path":"/shop/data/db","status":"NOT_INITIALIZED"}"#)
        );
        assert_eq!(naming.deserialize_record(bytes).unwrap(), record);
    }

    #[test]
    fn test_garbage_record() {
        let naming = NamingService::new("/shop/services");

        assert!(naming.deserialize_record(Bytes::from_static(b"nope")).is_err());
    }
}
