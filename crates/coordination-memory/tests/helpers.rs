use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use convoy_coordination::{
    CoordinationClient, CreateMode, CreateOutcome, OperationError, RetryPolicy, create_or_verify,
    delete_recursive, list_recursive, upsert,
};
use convoy_coordination_memory::{Error, Fault, MemoryCoordinationStore};

#[tokio::test]
async fn test_lost_create_reply_is_verified_not_duplicated() {
    let store = MemoryCoordinationStore::new();
    let client = store.connect();
    let data = Bytes::from_static(b"descriptor");

    store.inject_fault(Fault::LoseResponse);
    let outcome = create_or_verify(
        &client,
        &RetryPolicy::immediate(),
        "/web",
        &data,
        CreateMode::Ephemeral,
    )
    .await
    .unwrap();

    assert_eq!(outcome, CreateOutcome::AlreadyPresent);
    let (stored, stat) = client.get("/web").await.unwrap();
    assert_eq!(stored, data);
    assert_eq!(stat.ephemeral_owner, Some(client.session_id()));
}

#[tokio::test]
async fn test_concurrent_creates_by_one_owner_settle_once() {
    let store = MemoryCoordinationStore::new();
    let client = store.connect();
    let data = Bytes::from_static(b"record");
    let retry = RetryPolicy::immediate();

    let (first, second) = tokio::join!(
        create_or_verify(&client, &retry, "/svc", &data, CreateMode::Persistent),
        create_or_verify(&client, &retry, "/svc", &data, CreateMode::Persistent),
    );

    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|outcome| *outcome == CreateOutcome::AlreadyPresent);
    assert_eq!(
        outcomes,
        vec![CreateOutcome::Created, CreateOutcome::AlreadyPresent]
    );
}

#[tokio::test]
async fn test_node_of_previous_session_is_waited_out() {
    let store = MemoryCoordinationStore::new();
    let previous = store.connect();
    let client = store.connect();
    let data = Bytes::from_static(b"record");

    previous
        .create("/svc", data.clone(), CreateMode::Ephemeral)
        .await
        .unwrap();

    let registering = tokio::spawn({
        let client = client.clone();
        let data = data.clone();
        async move {
            let retry = RetryPolicy::immediate();
            create_or_verify(&client, &retry, "/svc", &data, CreateMode::Ephemeral).await
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!registering.is_finished());

    store.expire_session(previous.session_id());
    let outcome = registering.await.unwrap().unwrap();

    assert_eq!(outcome, CreateOutcome::Created);
    let stat = client.exists("/svc").await.unwrap().unwrap();
    assert_eq!(stat.ephemeral_owner, Some(client.session_id()));
}

#[tokio::test]
async fn test_foreign_data_is_a_mismatch() {
    let store = MemoryCoordinationStore::new();
    let other = store.connect();
    let client = store.connect();

    other
        .create("/svc", Bytes::from_static(b"theirs"), CreateMode::Persistent)
        .await
        .unwrap();

    let result = create_or_verify(
        &client,
        &RetryPolicy::immediate(),
        "/svc",
        &Bytes::from_static(b"ours"),
        CreateMode::Persistent,
    )
    .await;

    assert_matches!(result, Err(OperationError::DataMismatch(path)) if path == "/svc");
}

#[tokio::test]
async fn test_create_under_missing_parent() {
    let client = MemoryCoordinationStore::new().connect();

    let result = create_or_verify(
        &client,
        &RetryPolicy::immediate(),
        "/app/services/db",
        &Bytes::new(),
        CreateMode::Ephemeral,
    )
    .await;

    assert_matches!(result, Err(OperationError::MissingParent(_)));
}

#[tokio::test]
async fn test_retries_through_lost_requests() {
    let store = MemoryCoordinationStore::new();
    let client = store.connect();

    store.inject_fault(Fault::LoseRequest);
    store.inject_fault(Fault::LoseRequest);
    upsert(
        &client,
        &RetryPolicy::immediate(),
        "/conf",
        &Bytes::from_static(b"v1"),
    )
    .await
    .unwrap();
    upsert(
        &client,
        &RetryPolicy::immediate(),
        "/conf",
        &Bytes::from_static(b"v2"),
    )
    .await
    .unwrap();

    let (data, stat) = client.get("/conf").await.unwrap();
    assert_eq!(data, Bytes::from_static(b"v2"));
    assert_eq!(stat.version, 1);
}

#[tokio::test]
async fn test_bounded_retries_surface_connection_loss() {
    let store = MemoryCoordinationStore::new();
    let client = store.connect();

    for _ in 0..3 {
        store.inject_fault(Fault::LoseRequest);
    }

    let result = list_recursive(
        &client,
        &RetryPolicy::immediate().with_max_attempts(3),
        "/",
    )
    .await;

    assert_matches!(result, Err(OperationError::Coordination(Error::ConnectionLoss)));
}

#[tokio::test]
async fn test_recursive_delete_removes_whole_tree() {
    let store = MemoryCoordinationStore::new();
    let client = store.connect();
    let retry = RetryPolicy::immediate();

    for path in [
        "/app",
        "/app/web",
        "/app/web/front",
        "/app/web/front/deep",
        "/app/data",
        "/app/data/db",
        "/other",
    ] {
        client
            .create(path, Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
    }

    let listed = list_recursive(&client, &retry, "/app")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        listed,
        vec![
            "/app",
            "/app/data",
            "/app/data/db",
            "/app/web",
            "/app/web/front",
            "/app/web/front/deep",
        ]
    );

    let deleted = delete_recursive(&client, &retry, "/app").await.unwrap();
    assert_eq!(deleted, 6);

    assert_eq!(list_recursive(&client, &retry, "/app").await.unwrap(), None);
    assert_eq!(store.paths(), vec!["/", "/other"]);
}

#[tokio::test]
async fn test_recursive_delete_of_missing_root() {
    let client = MemoryCoordinationStore::new().connect();

    let deleted = delete_recursive(&client, &RetryPolicy::immediate(), "/missing")
        .await
        .unwrap();

    assert_eq!(deleted, 0);
}
