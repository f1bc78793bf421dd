use std::collections::BTreeMap;

use convoy_descriptor::{ContainerDescriptor, Environment};
use convoy_naming::{NamingService, ServiceStatus};
use parking_lot::Mutex;

use crate::lifecycle::DependencyView;

/// Whether a dependency's descriptor has been downloaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntryState {
    /// Not yet downloaded.
    #[default]
    Unprocessed,

    /// Downloaded.
    Processed,
}

/// What a broker knows about one dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyEntry {
    /// Name of the service.
    pub service_name: String,

    /// Registration node of the service.
    pub service_path: String,

    /// Descriptor node of the container offering the service.
    pub container_path: Option<String>,

    /// Download progress.
    pub state: EntryState,

    /// Last status the service published. `Updated` is kept as `Initialized`.
    pub remote_status: ServiceStatus,

    /// The downloaded descriptor.
    pub container_descriptor: Option<ContainerDescriptor>,
}

/// Per-broker table of the declared dependencies.
///
/// Every method takes the same lock, so watches on different dependencies can
/// update the table concurrently.
#[derive(Debug)]
pub struct ServiceDependencyTracker {
    naming: NamingService,
    entries: Mutex<BTreeMap<String, DependencyEntry>>,
}

impl ServiceDependencyTracker {
    /// Creates a tracker for the services named in `dependencies`.
    pub fn new<I, S>(naming: NamingService, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = dependencies
            .into_iter()
            .map(|name| {
                let service_name = name.into();
                let entry = DependencyEntry {
                    service_path: naming.resolve_service_path(&service_name),
                    service_name: service_name.clone(),
                    container_path: None,
                    state: EntryState::Unprocessed,
                    remote_status: ServiceStatus::NotRunning,
                    container_descriptor: None,
                };
                (service_name, entry)
            })
            .collect();

        Self {
            naming,
            entries: Mutex::new(entries),
        }
    }

    /// Whether any dependency was declared.
    #[must_use]
    pub fn has_dependencies(&self) -> bool {
        !self.entries.lock().is_empty()
    }

    /// Names of the declared dependencies.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Whether every descriptor has been downloaded.
    #[must_use]
    pub fn all_processed(&self) -> bool {
        self.entries
            .lock()
            .values()
            .all(|entry| entry.state == EntryState::Processed)
    }

    /// Whether every dependency reports itself initialized.
    #[must_use]
    pub fn all_initialized(&self) -> bool {
        self.entries
            .lock()
            .values()
            .all(|entry| entry.remote_status == ServiceStatus::Initialized)
    }

    /// Both aggregates, read under one lock.
    #[must_use]
    pub fn view(&self) -> DependencyView {
        let entries = self.entries.lock();
        DependencyView {
            all_processed: entries
                .values()
                .all(|entry| entry.state == EntryState::Processed),
            all_initialized: entries
                .values()
                .all(|entry| entry.remote_status == ServiceStatus::Initialized),
        }
    }

    /// Records the status published at `service_path`.
    ///
    /// Returns the previous status, or `None` for an undeclared service.
    pub fn set_remote_status(
        &self,
        service_path: &str,
        status: ServiceStatus,
    ) -> Option<ServiceStatus> {
        let status = match status {
            ServiceStatus::Updated => ServiceStatus::Initialized,
            other => other,
        };
        self.with_entry(service_path, |entry| {
            std::mem::replace(&mut entry.remote_status, status)
        })
    }

    /// The last status recorded for `service_path`.
    #[must_use]
    pub fn remote_status_of(&self, service_path: &str) -> Option<ServiceStatus> {
        self.with_entry(service_path, |entry| entry.remote_status)
    }

    /// Records where the container offering `service_path` is described.
    pub fn set_container_path(&self, service_path: &str, path: impl Into<String>) {
        let path = path.into();
        self.with_entry(service_path, |entry| entry.container_path = Some(path));
    }

    /// Stores the downloaded descriptor for `service_path`.
    pub fn set_container_descriptor(&self, service_path: &str, descriptor: ContainerDescriptor) {
        self.with_entry(service_path, |entry| {
            entry.container_descriptor = Some(descriptor);
        });
    }

    /// Marks the descriptor of `service_name` as downloaded.
    pub fn set_processed(&self, service_name: &str) {
        if let Some(entry) = self.entries.lock().get_mut(service_name) {
            entry.state = EntryState::Processed;
        }
    }

    /// The descriptor downloaded for `service_path`.
    #[must_use]
    pub fn container_descriptor_of(&self, service_path: &str) -> Option<ContainerDescriptor> {
        self.with_entry(service_path, |entry| entry.container_descriptor.clone())
            .flatten()
    }

    /// Copy of the entry for `service_name`.
    #[must_use]
    pub fn entry(&self, service_name: &str) -> Option<DependencyEntry> {
        self.entries.lock().get(service_name).cloned()
    }

    /// Environment of every downloaded dependency, keyed by service name.
    #[must_use]
    pub fn environments(&self) -> BTreeMap<String, Environment> {
        self.entries
            .lock()
            .iter()
            .filter_map(|(name, entry)| {
                entry
                    .container_descriptor
                    .as_ref()
                    .map(|descriptor| (name.clone(), descriptor.environment()))
            })
            .collect()
    }

    fn with_entry<T>(
        &self,
        service_path: &str,
        f: impl FnOnce(&mut DependencyEntry) -> T,
    ) -> Option<T> {
        let name = self.naming.service_name(service_path);
        self.entries.lock().get_mut(name).map(f)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn tracker(dependencies: &[&str]) -> ServiceDependencyTracker {
        ServiceDependencyTracker::new(
            NamingService::new("/shop/services"),
            dependencies.iter().copied(),
        )
    }

    #[test]
    fn test_no_dependencies_is_trivially_ready() {
        let tracker = tracker(&[]);

        assert!(!tracker.has_dependencies());
        assert!(tracker.all_processed());
        assert!(tracker.all_initialized());
    }

    #[test]
    fn test_updated_counts_as_initialized() {
        let tracker = tracker(&["db"]);

        let previous = tracker.set_remote_status("/shop/services/db", ServiceStatus::Updated);

        assert_eq!(previous, Some(ServiceStatus::NotRunning));
        assert!(tracker.all_initialized());
        assert!(!tracker.all_processed());
        assert_eq!(
            tracker.remote_status_of("/shop/services/db"),
            Some(ServiceStatus::Initialized)
        );
    }

    #[test]
    fn test_unknown_service_is_ignored() {
        let tracker = tracker(&["db"]);

        assert_eq!(
            tracker.set_remote_status("/shop/services/cache", ServiceStatus::Initialized),
            None
        );
        tracker.set_processed("cache");

        assert!(!tracker.all_initialized());
        assert!(!tracker.all_processed());
    }

    #[test]
    fn test_container_path_and_processed() {
        let tracker = tracker(&["db"]);

        tracker.set_container_path("/shop/services/db", "/shop/data/db");
        tracker.set_processed("db");

        let entry = tracker.entry("db").unwrap();
        assert_eq!(entry.container_path.as_deref(), Some("/shop/data/db"));
        assert_eq!(entry.state, EntryState::Processed);
        assert!(tracker.container_descriptor_of("/shop/services/db").is_none());
    }

    proptest! {
        #[test]
        fn test_readiness_requires_every_dependency(
            order in Just((0..5usize).collect::<Vec<_>>()).prop_shuffle(),
            invalidated in 0..5usize,
        ) {
            let names = ["a", "b", "c", "d", "e"];
            let tracker = tracker(&names);

            for (seen, index) in order.iter().enumerate() {
                prop_assert!(!tracker.all_initialized());
                let path = format!("/shop/services/{}", names[*index]);
                tracker.set_remote_status(&path, ServiceStatus::Initialized);
                prop_assert_eq!(tracker.all_initialized(), seen == names.len() - 1);
            }

            let path = format!("/shop/services/{}", names[invalidated]);
            tracker.set_remote_status(&path, ServiceStatus::NotRunning);
            prop_assert!(!tracker.all_initialized());
        }
    }
}
