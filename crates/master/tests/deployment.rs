use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use convoy_coordination::{CoordinationClient, RetryPolicy};
use convoy_coordination_memory::{MemoryCoordinationClient, MemoryCoordinationStore};
use convoy_descriptor::{Application, ContainerDescriptor};
use convoy_master::{
    ContainerBackend, Deployment, DeploymentOptions, Error, Inspection, LaunchSpec,
    MasterCoordinator, MasterOptions,
};
use parking_lot::Mutex;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
#[error("mock backend failure")]
struct MockError;

#[derive(Clone, Default)]
struct MockBackend {
    calls: Arc<Mutex<Vec<String>>>,
    specs: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl MockBackend {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &str, handle: &str) {
        self.calls.lock().push(format!("{call} {handle}"));
    }
}

#[async_trait]
impl ContainerBackend for MockBackend {
    type Error = MockError;
    type Handle = String;

    async fn create(&self, spec: LaunchSpec) -> Result<String, MockError> {
        let name = spec.name.clone();
        self.record("create", &name);
        self.specs.lock().push(spec);
        Ok(name)
    }

    async fn start(&self, handle: &String) -> Result<(), MockError> {
        self.record("start", handle);
        Ok(())
    }

    async fn stop(&self, handle: &String) -> Result<(), MockError> {
        self.record("stop", handle);
        Ok(())
    }

    async fn restart(&self, handle: &String) -> Result<(), MockError> {
        self.record("restart", handle);
        Ok(())
    }

    async fn delete(&self, handle: &String) -> Result<(), MockError> {
        self.record("delete", handle);
        Ok(())
    }

    async fn inspect(&self, _handle: &String) -> Result<Inspection, MockError> {
        Ok(Inspection {
            running: true,
            ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
        })
    }
}

fn container(name: &str, kind: &str, dependencies: &[&str]) -> ContainerDescriptor {
    let settings = match kind {
        "data" => json!({"kind": "data", "database": name}),
        kind => json!({"kind": kind}),
    };
    serde_json::from_value(json!({
        "name": name,
        "image": format!("{name}:latest"),
        "start": {"command": ["run", name], "readiness": {"type": "immediate"}},
        "dependencies": dependencies,
        "settings": settings
    }))
    .unwrap()
}

fn shop() -> Application {
    Application {
        name: "shop".to_string(),
        containers: vec![
            container("web", "web", &["orders"]),
            container("orders", "business", &["db"]),
            container("db", "data", &[]),
        ],
    }
}

fn deployment(
    store: &MemoryCoordinationStore,
    application: Application,
) -> (Deployment<MemoryCoordinationClient, MockBackend>, MockBackend) {
    let master = MasterCoordinator::new(
        store.connect(),
        MasterOptions {
            root: "/shop".to_string(),
            retry: RetryPolicy::immediate(),
        },
    );
    let backend = MockBackend::default();
    let deployment = Deployment::new(
        master,
        backend.clone(),
        application,
        DeploymentOptions {
            hosts: vec!["10.0.0.1:2181".to_string(), "10.0.0.2:2181".to_string()],
            ..DeploymentOptions::default()
        },
    );
    (deployment, backend)
}

#[tokio::test]
async fn test_containers_launch_in_boot_order() {
    let store = MemoryCoordinationStore::new();
    let (mut deployment, backend) = deployment(&store, shop());

    deployment.deploy().await.unwrap();

    assert_eq!(
        backend.calls(),
        vec![
            "create db",
            "start db",
            "create orders",
            "start orders",
            "create web",
            "start web"
        ]
    );

    let specs = backend.specs.lock().clone();
    assert_eq!(
        specs[0].command,
        vec![
            "broker",
            "10.0.0.1:2181,10.0.0.2:2181",
            "10000",
            "/shop/data/db",
            "/shop/services",
            "/shop/shutdown",
            "/shop/conf"
        ]
    );
    assert_eq!(specs[0].environment["DB_NAME"], "db");

    let observer = store.connect();
    let (data, stat) = observer.get("/shop/web/web").await.unwrap();
    let web = ContainerDescriptor::try_from(data).unwrap();
    assert_eq!(web.ip, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
    assert_eq!(stat.version, 1);
    assert!(deployment.master().is_ready());
}

#[tokio::test]
async fn test_invalid_application_touches_nothing() {
    let store = MemoryCoordinationStore::new();
    let mut application = shop();
    application.containers[2].dependencies = vec!["web".to_string()];
    let (mut deployment, backend) = deployment(&store, application);

    assert_matches!(
        deployment.deploy().await,
        Err(Error::Descriptor(convoy_descriptor::Error::CircularDependency(_)))
    );
    assert!(backend.calls().is_empty());
    assert_eq!(store.paths(), vec!["/"]);
}

#[tokio::test]
async fn test_teardown_removes_containers_and_namespace() {
    let store = MemoryCoordinationStore::new();
    let (mut deployment, backend) = deployment(&store, shop());
    deployment.deploy().await.unwrap();

    deployment.teardown().await.unwrap();

    let calls = backend.calls();
    assert_eq!(
        calls[6..],
        [
            "stop web",
            "delete web",
            "stop orders",
            "delete orders",
            "stop db",
            "delete db"
        ]
    );
    assert_eq!(store.paths(), vec!["/"]);
}

#[tokio::test]
async fn test_restart_launched_container() {
    let store = MemoryCoordinationStore::new();
    let (mut deployment, backend) = deployment(&store, shop());
    deployment.deploy().await.unwrap();

    deployment.restart("orders").await.unwrap();

    assert_eq!(backend.calls().last().map(String::as_str), Some("restart orders"));
    assert_matches!(
        deployment.restart("cache").await,
        Err(Error::UnknownContainer(name)) if name == "cache"
    );
}
