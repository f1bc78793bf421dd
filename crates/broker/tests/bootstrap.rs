use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use convoy_broker::{Broker, BrokerOptions, Error};
use convoy_coordination::{CoordinationClient, CreateMode};
use convoy_coordination_memory::{MemoryCoordinationClient, MemoryCoordinationStore};
use convoy_descriptor::{ContainerDescriptor, ContainerKind};
use convoy_naming::{Layout, ServiceRecord, ServiceStatus};
use convoy_supervisor::ProbeOptions;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

async fn namespace(store: &MemoryCoordinationStore) -> (Layout, MemoryCoordinationClient) {
    let layout = Layout::new("/shop");
    let master = store.connect();
    for path in layout.namespace_paths() {
        master
            .create(&path, Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
    }
    (layout, master)
}

fn descriptor(value: serde_json::Value) -> ContainerDescriptor {
    serde_json::from_value(value).unwrap()
}

fn db() -> ContainerDescriptor {
    descriptor(json!({
        "name": "db",
        "image": "postgres",
        "environment": {"host": "h"},
        "start": {"command": ["sh", "-c", "exec sleep 30"], "readiness": {"type": "immediate"}},
        "settings": {"kind": "data", "database": "orders"}
    }))
}

fn web(out: &Path) -> ContainerDescriptor {
    let script = format!(
        "echo \"$DB_HOST $DB_DB_NAME\" > {}; exec sleep 30",
        out.display()
    );
    descriptor(json!({
        "name": "web",
        "image": "nginx",
        "start": {"command": ["sh", "-c", script], "readiness": {"type": "immediate"}},
        "dependencies": ["db"],
        "settings": {"kind": "web"}
    }))
}

async fn publish(
    master: &MemoryCoordinationClient,
    layout: &Layout,
    descriptor: &ContainerDescriptor,
) -> String {
    let path = layout.container_path(descriptor.kind(), &descriptor.name);
    master
        .create(&path, descriptor.to_bytes().unwrap(), CreateMode::Ephemeral)
        .await
        .unwrap();
    path
}

fn options(layout: &Layout, kind: ContainerKind, name: &str, conf_dir: &Path) -> BrokerOptions {
    BrokerOptions {
        node_path: layout.container_path(kind, name),
        naming_root: layout.services_root(),
        shutdown_path: layout.shutdown_path(),
        conf_root: layout.conf_root(),
        conf_dir: Some(conf_dir.to_path_buf()),
        stop_grace: Duration::from_secs(2),
        ..BrokerOptions::default()
    }
}

fn spawn_broker(
    client: MemoryCoordinationClient,
    options: BrokerOptions,
    token: &CancellationToken,
) -> JoinHandle<convoy_broker::Result<()>> {
    let broker = Broker::new(client, options, token);
    tokio::spawn(broker.run())
}

async fn status(client: &MemoryCoordinationClient, path: &str) -> Option<ServiceStatus> {
    let (data, _) = client.get(path).await.ok()?;
    ServiceRecord::try_from(data).ok().map(|record| record.status)
}

async fn wait_for_status(client: &MemoryCoordinationClient, path: &str, expected: ServiceStatus) {
    tokio::time::timeout(WAIT, async {
        while status(client, path).await != Some(expected) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{path} never reported {expected:?}"));
}

async fn wait_for_file(path: &Path) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(contents) = tokio::fs::read_to_string(path).await {
                if contents.ends_with('\n') {
                    return contents;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap()
}

async fn wait_until_exists(path: &Path) {
    tokio::time::timeout(WAIT, async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never appeared", path.display()));
}

#[tokio::test]
async fn test_dependent_starts_only_after_dependency() {
    let store = MemoryCoordinationStore::new();
    let (layout, master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("web.env");
    let token = CancellationToken::new();

    publish(&master, &layout, &db()).await;
    publish(&master, &layout, &web(&out)).await;

    let web_broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Web, "web", dir.path()),
        &token,
    );
    wait_for_status(&master, "/shop/services/web", ServiceStatus::NotInitialized).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        status(&master, "/shop/services/web").await,
        Some(ServiceStatus::NotInitialized)
    );
    assert!(!out.exists());

    let db_broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Data, "db", dir.path()),
        &token,
    );

    wait_for_status(&master, "/shop/services/db", ServiceStatus::Initialized).await;
    wait_for_status(&master, "/shop/services/web", ServiceStatus::Initialized).await;
    assert_eq!(wait_for_file(&out).await, "h orders\n");

    // The store copy is written before the local one.
    wait_until_exists(&dir.path().join("db.data.json")).await;
    wait_until_exists(&dir.path().join("web.web.json")).await;
    let paths = store.paths();
    assert!(paths.contains(&"/shop/conf/db".to_string()));
    assert!(paths.contains(&"/shop/conf/web".to_string()));

    master
        .create(&layout.shutdown_path(), Bytes::new(), CreateMode::Persistent)
        .await
        .unwrap();

    tokio::time::timeout(WAIT, web_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, db_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let paths = store.paths();
    assert!(!paths.contains(&"/shop/services/web".to_string()));
    assert!(!paths.contains(&"/shop/services/db".to_string()));
}

#[tokio::test]
async fn test_lost_dependency_fails_dependent() {
    let store = MemoryCoordinationStore::new();
    let (layout, master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("web.env");
    let token = CancellationToken::new();

    publish(&master, &layout, &db()).await;
    publish(&master, &layout, &web(&out)).await;

    let db_client = store.connect();
    let db_session = db_client.session_id();
    let db_broker = spawn_broker(
        db_client,
        options(&layout, ContainerKind::Data, "db", dir.path()),
        &token,
    );
    let web_broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Web, "web", dir.path()),
        &token,
    );
    wait_for_status(&master, "/shop/services/web", ServiceStatus::Initialized).await;

    store.expire_session(db_session);

    wait_for_status(&master, "/shop/services/web", ServiceStatus::NotRunning).await;

    token.cancel();
    tokio::time::timeout(WAIT, web_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, db_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_readiness_timeout_reports_not_running() {
    let store = MemoryCoordinationStore::new();
    let (layout, master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    publish(
        &master,
        &layout,
        &descriptor(json!({
            "name": "api",
            "image": "api",
            "start": {"command": ["sh", "-c", "exec sleep 30"], "port": port},
            "settings": {"kind": "business"}
        })),
    )
    .await;

    let mut api_options = options(&layout, ContainerKind::Business, "api", dir.path());
    api_options.probe = ProbeOptions {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(200),
    };
    let broker = spawn_broker(store.connect(), api_options, &token);

    wait_for_status(&master, "/shop/services/api", ServiceStatus::NotRunning).await;

    token.cancel();
    tokio::time::timeout(WAIT, broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_descriptor_change_restarts_process() {
    let store = MemoryCoordinationStore::new();
    let (layout, master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("solo.env");
    let token = CancellationToken::new();

    let script = format!("echo \"$GREETING\" > {}; exec sleep 30", out.display());
    let mut solo = descriptor(json!({
        "name": "solo",
        "image": "solo",
        "environment": {"greeting": "hello"},
        "start": {"command": ["sh", "-c", script], "readiness": {"type": "immediate"}},
        "settings": {"kind": "business"}
    }));
    let path = publish(&master, &layout, &solo).await;

    let broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Business, "solo", dir.path()),
        &token,
    );
    wait_for_status(&master, "/shop/services/solo", ServiceStatus::Initialized).await;
    assert_eq!(wait_for_file(&out).await, "hello\n");

    // An address alone does not restart the process.
    (solo.capabilities().update_ip)(&mut solo, "10.0.0.9".parse().unwrap());
    master
        .set(&path, solo.to_bytes().unwrap(), Some(0))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        status(&master, "/shop/services/solo").await,
        Some(ServiceStatus::Initialized)
    );

    tokio::fs::remove_file(&out).await.unwrap();
    solo.environment
        .insert("greeting".to_string(), "bonjour".to_string());
    master
        .set(&path, solo.to_bytes().unwrap(), Some(1))
        .await
        .unwrap();

    wait_for_status(&master, "/shop/services/solo", ServiceStatus::Updated).await;
    assert_eq!(wait_for_file(&out).await, "bonjour\n");

    token.cancel();
    tokio::time::timeout(WAIT, broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_missing_descriptor_fails_boot() {
    let store = MemoryCoordinationStore::new();
    let (layout, _master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();

    let broker = Broker::new(
        store.connect(),
        options(&layout, ContainerKind::Web, "ghost", dir.path()),
        &token,
    );

    assert_matches!(broker.run().await, Err(Error::MissingDescriptor(path)) if path == "/shop/web/ghost");
}

#[tokio::test]
async fn test_dependency_lost_while_starting_never_reports_initialized() {
    let store = MemoryCoordinationStore::new();
    let (layout, master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let started = dir.path().join("web.started");
    let token = CancellationToken::new();

    let script = format!(
        "echo started > {}; sleep 1; echo CONVOY_INIT_PID=$$; exec sleep 30",
        started.display()
    );
    publish(&master, &layout, &db()).await;
    publish(
        &master,
        &layout,
        &descriptor(json!({
            "name": "web",
            "image": "nginx",
            "start": {"command": ["sh", "-c", script], "readiness": {"type": "output_token"}},
            "dependencies": ["db"],
            "settings": {"kind": "web"}
        })),
    )
    .await;

    let db_client = store.connect();
    let db_session = db_client.session_id();
    let db_broker = spawn_broker(
        db_client,
        options(&layout, ContainerKind::Data, "db", dir.path()),
        &token,
    );
    let web_broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Web, "web", dir.path()),
        &token,
    );

    assert_eq!(wait_for_file(&started).await, "started\n");
    store.expire_session(db_session);
    wait_for_status(&master, "/shop/services/web", ServiceStatus::NotRunning).await;

    // Long enough for the process to have printed its control token.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let (data, stat) = master.get("/shop/services/web").await.unwrap();
    assert_eq!(
        ServiceRecord::try_from(data).unwrap().status,
        ServiceStatus::NotRunning
    );
    assert_eq!(stat.version, 1);

    token.cancel();
    tokio::time::timeout(WAIT, web_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, db_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_updated_dependency_restarts_dependent() {
    let store = MemoryCoordinationStore::new();
    let (layout, master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("web.env");
    let token = CancellationToken::new();

    let mut database = db();
    let db_path = publish(&master, &layout, &database).await;
    publish(&master, &layout, &web(&out)).await;

    let db_broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Data, "db", dir.path()),
        &token,
    );
    let web_broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Web, "web", dir.path()),
        &token,
    );
    wait_for_status(&master, "/shop/services/web", ServiceStatus::Initialized).await;
    assert_eq!(wait_for_file(&out).await, "h orders\n");

    tokio::fs::remove_file(&out).await.unwrap();
    database
        .environment
        .insert("host".to_string(), "h2".to_string());
    master
        .set(&db_path, database.to_bytes().unwrap(), Some(0))
        .await
        .unwrap();

    wait_for_status(&master, "/shop/services/db", ServiceStatus::Updated).await;
    wait_for_status(&master, "/shop/services/web", ServiceStatus::Updated).await;
    assert_eq!(wait_for_file(&out).await, "h2 orders\n");

    token.cancel();
    tokio::time::timeout(WAIT, web_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, db_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_dependency_reporting_not_running_fails_dependent() {
    let store = MemoryCoordinationStore::new();
    let (layout, master) = namespace(&store).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("web.env");
    let token = CancellationToken::new();

    let db_path = publish(&master, &layout, &db()).await;
    publish(&master, &layout, &web(&out)).await;

    // Stand in for the broker of db.
    let naming = layout.naming();
    let db_service = naming.resolve_service_path("db");
    let db_client = store.connect();
    let record = |status| {
        naming
            .serialize_record(&ServiceRecord::new(db_path.clone(), status))
            .unwrap()
    };
    db_client
        .create(
            &db_service,
            record(ServiceStatus::Initialized),
            CreateMode::Ephemeral,
        )
        .await
        .unwrap();

    let web_broker = spawn_broker(
        store.connect(),
        options(&layout, ContainerKind::Web, "web", dir.path()),
        &token,
    );
    wait_for_status(&master, "/shop/services/web", ServiceStatus::Initialized).await;

    db_client
        .set(&db_service, record(ServiceStatus::NotRunning), None)
        .await
        .unwrap();

    wait_for_status(&master, "/shop/services/web", ServiceStatus::NotRunning).await;
    assert!(master.exists(&db_service).await.unwrap().is_some());

    token.cancel();
    tokio::time::timeout(WAIT, web_broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
