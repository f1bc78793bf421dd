use convoy_coordination::join;
use convoy_descriptor::ContainerKind;

use crate::NamingService;

/// Paths of an application namespace:
///
/// ```text
/// <root>/<kind>/<name>     container descriptors (ephemeral)
/// <root>/conf/<name>       post-boot descriptor copies
/// <root>/services/<name>   service records (ephemeral)
/// <root>/shutdown          shutdown signal
/// <root>/master            master bookkeeping
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    root: String,
}

impl Layout {
    /// Creates the layout of the application rooted at `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// The application root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Parent of all containers of `kind`.
    #[must_use]
    pub fn kind_root(&self, kind: ContainerKind) -> String {
        join(&self.root, kind.as_str())
    }

    /// The descriptor node of a container.
    #[must_use]
    pub fn container_path(&self, kind: ContainerKind, name: &str) -> String {
        join(&self.kind_root(kind), name)
    }

    /// Parent of the descriptor copies.
    #[must_use]
    pub fn conf_root(&self) -> String {
        join(&self.root, "conf")
    }

    /// The post-boot copy of a container's descriptor.
    #[must_use]
    pub fn conf_path(&self, name: &str) -> String {
        join(&self.conf_root(), name)
    }

    /// The naming root.
    #[must_use]
    pub fn services_root(&self) -> String {
        join(&self.root, "services")
    }

    /// The node whose creation shuts every broker down.
    #[must_use]
    pub fn shutdown_path(&self) -> String {
        join(&self.root, "shutdown")
    }

    /// Parent of master-only nodes.
    #[must_use]
    pub fn master_root(&self) -> String {
        join(&self.root, "master")
    }

    /// The naming service of this application.
    #[must_use]
    pub fn naming(&self) -> NamingService {
        NamingService::new(self.services_root())
    }

    /// Every persistent node of the namespace, parents first.
    #[must_use]
    pub fn namespace_paths(&self) -> Vec<String> {
        let mut paths = vec![
            self.root.clone(),
            self.services_root(),
            self.conf_root(),
            self.master_root(),
        ];
        paths.extend(ContainerKind::ALL.into_iter().map(|kind| self.kind_root(kind)));
        paths
    }
}
