//! Composite operations used by brokers and the master.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::OperationError;
use crate::{CoordinationClient, CreateMode, Outcome, RetryPolicy, Stat, WatchEvent, join};

/// How [`create_or_verify`] settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// This call created the node.
    Created,

    /// The node was already there holding identical data, typically because an
    /// earlier attempt succeeded but its reply was lost. Ephemeral nodes must
    /// also be owned by the calling session.
    AlreadyPresent,
}

/// Creates `path` at most once.
///
/// A `NodeExists` answer is verified by reading the node back: identical data
/// means a previous attempt of ours went through, anything else is a protocol
/// violation.
///
/// An ephemeral node held by another session, such as one left behind by an
/// earlier incarnation whose session has not expired yet, is waited out and
/// then created again by this session.
///
/// # Errors
///
/// Returns [`OperationError::DataMismatch`] if the node holds other data,
/// [`OperationError::MissingParent`] if the parent is missing, or the client
/// error of a fatal attempt.
pub async fn create_or_verify<C: CoordinationClient>(
    client: &C,
    retry: &RetryPolicy,
    path: &str,
    data: &Bytes,
    mode: CreateMode,
) -> Result<CreateOutcome, OperationError<C::Error>> {
    loop {
        let created = retry
            .run("create", move || client.create(path, data.clone(), mode))
            .await?;

        match created {
            Outcome::Done(()) => {
                debug!("created {path}");
                return Ok(CreateOutcome::Created);
            }
            Outcome::NoNode => return Err(OperationError::MissingParent(path.to_string())),
            Outcome::NodeExists => {}
        }

        match retry.run("get", move || client.get(path)).await? {
            Outcome::Done((_, stat)) if is_foreign(mode, &stat, client) => {
                warn!(
                    "{path} is held by session {:?}, waiting for it to go away",
                    stat.ephemeral_owner
                );
                wait_for_removal(client, retry, path).await?;
            }
            Outcome::Done((existing, _)) if existing == *data => {
                debug!("{path} already present with expected data");
                return Ok(CreateOutcome::AlreadyPresent);
            }
            Outcome::Done(_) => {
                warn!("{path} exists with unexpected data");
                return Err(OperationError::DataMismatch(path.to_string()));
            }
            // Removed between our create and get; try again.
            Outcome::NoNode | Outcome::NodeExists => {}
        }
    }
}

fn is_foreign<C: CoordinationClient>(mode: CreateMode, stat: &Stat, client: &C) -> bool {
    mode == CreateMode::Ephemeral
        && stat
            .ephemeral_owner
            .is_some_and(|owner| owner != client.session_id())
}

async fn wait_for_removal<C: CoordinationClient>(
    client: &C,
    retry: &RetryPolicy,
    path: &str,
) -> Result<(), OperationError<C::Error>> {
    loop {
        match retry
            .run("exists", move || client.exists_watched(path))
            .await?
        {
            Outcome::Done((None, _)) | Outcome::NoNode | Outcome::NodeExists => return Ok(()),
            Outcome::Done((Some(_), watch)) => match watch.fired().await {
                WatchEvent::NodeDeleted => return Ok(()),
                WatchEvent::SessionClosed => {
                    return Err(OperationError::SessionClosed(path.to_string()));
                }
                WatchEvent::NodeCreated
                | WatchEvent::NodeDataChanged
                | WatchEvent::NodeChildrenChanged => {}
            },
        }
    }
}

/// Writes `data` to a persistent node, creating it if needed.
///
/// # Errors
///
/// Returns [`OperationError::MissingParent`] if the parent is missing, or the
/// client error of a fatal attempt.
pub async fn upsert<C: CoordinationClient>(
    client: &C,
    retry: &RetryPolicy,
    path: &str,
    data: &Bytes,
) -> Result<(), OperationError<C::Error>> {
    loop {
        match retry
            .run("set", move || client.set(path, data.clone(), None))
            .await?
        {
            Outcome::Done(_) => return Ok(()),
            Outcome::NoNode | Outcome::NodeExists => {}
        }

        match retry
            .run("create", move || {
                client.create(path, data.clone(), CreateMode::Persistent)
            })
            .await?
        {
            Outcome::Done(()) => return Ok(()),
            Outcome::NoNode => return Err(OperationError::MissingParent(path.to_string())),
            Outcome::NodeExists => {}
        }
    }
}

/// Lists `root` and all its descendants, parents before children.
///
/// Returns `None` if `root` does not exist.
///
/// # Errors
///
/// Returns the client error of a fatal attempt.
pub async fn list_recursive<C: CoordinationClient>(
    client: &C,
    retry: &RetryPolicy,
    root: &str,
) -> Result<Option<Vec<String>>, OperationError<C::Error>> {
    let Outcome::Done(top) = retry.run("children", move || client.children(root)).await? else {
        return Ok(None);
    };

    let mut listed = vec![root.to_string()];
    let mut pending: Vec<String> = top.iter().rev().map(|child| join(root, child)).collect();

    while let Some(path) = pending.pop() {
        let current = path.as_str();
        let outcome = retry
            .run("children", move || client.children(current))
            .await?;

        // Children that vanished while listing are skipped.
        if let Outcome::Done(children) = outcome {
            pending.extend(children.iter().rev().map(|child| join(&path, child)));
            listed.push(path);
        }
    }

    Ok(Some(listed))
}

/// Deletes `root` and everything below it, children first.
///
/// Returns the number of nodes this call removed.
///
/// # Errors
///
/// Returns the client error of a fatal attempt, for instance when a node
/// gains a child while the tree is being removed.
pub async fn delete_recursive<C: CoordinationClient>(
    client: &C,
    retry: &RetryPolicy,
    root: &str,
) -> Result<usize, OperationError<C::Error>> {
    let Some(listed) = list_recursive(client, retry, root).await? else {
        return Ok(0);
    };

    let mut deleted = 0;
    for path in listed.iter().rev() {
        let current = path.as_str();
        if let Outcome::Done(()) = retry
            .run("delete", move || client.delete(current, None))
            .await?
        {
            deleted += 1;
        }
    }

    debug!("deleted {deleted} nodes under {root}");
    Ok(deleted)
}
