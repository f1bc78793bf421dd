use crate::error::{Error, Result};
use crate::protocol::{
    ClientMessage, Operation, RemoteError, Reply, ServerMessage, WatchId, decode, encode,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use convoy_coordination::{
    CoordinationClient, CreateMode, SessionId, Stat, Watch, WatchTrigger, watch_pair,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// Options for [`TcpCoordinationClient`].
#[derive(Clone, Debug)]
pub struct TcpClientOptions {
    /// `host:port` addresses of the coordination servers, tried in order.
    pub hosts: Vec<String>,

    /// How long the session survives without a connection.
    pub session_timeout: Duration,
}

impl Default for TcpClientOptions {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:2181".to_string()],
            session_timeout: Duration::from_secs(30),
        }
    }
}

struct Pending {
    path: String,
    sender: oneshot::Sender<Result<(Reply, Option<Watch>)>>,
}

struct Outgoing {
    frame: Bytes,
    closing: bool,
}

enum ConnectionEnd {
    Dropped,
    Closed,
    Cancelled,
}

struct Inner {
    session: SessionId,
    hosts: Vec<String>,
    session_timeout: Duration,
    expired: AtomicBool,
    next_request: AtomicU64,
    pending: DashMap<u64, Pending>,
    watches: DashMap<WatchId, WatchTrigger>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

/// A session with a coordination server, resumed transparently across
/// connection drops until the session timeout elapses.
#[derive(Clone)]
pub struct TcpCoordinationClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TcpCoordinationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpCoordinationClient")
            .field("session", &self.inner.session)
            .field("hosts", &self.inner.hosts)
            .finish_non_exhaustive()
    }
}

async fn handshake(
    host: &str,
    session: Option<SessionId>,
    session_timeout: Duration,
) -> Result<(Connection, SessionId)> {
    let stream = TcpStream::connect(host)
        .await
        .map_err(|e| Error::Io("failed to connect to coordination host", e))?;
    let mut connection = Framed::new(stream, LengthDelimitedCodec::new());

    let timeout_ms = u64::try_from(session_timeout.as_millis()).unwrap_or(u64::MAX);
    connection
        .send(encode(&ClientMessage::Connect {
            session,
            timeout_ms,
        })?)
        .await
        .map_err(|e| Error::Io("failed to send handshake", e))?;

    let frame = connection
        .next()
        .await
        .ok_or(Error::ConnectionLoss)?
        .map_err(|e| Error::Io("failed to read handshake reply", e))?;

    match decode(&frame)? {
        ServerMessage::Connected { session } => Ok((connection, session)),
        ServerMessage::SessionExpired => Err(Error::SessionExpired(session.unwrap_or_default())),
        other => Err(Error::Protocol(format!(
            "unexpected handshake reply {other:?}"
        ))),
    }
}

impl TcpCoordinationClient {
    /// Opens a session on the first reachable host. Returns once the server
    /// has confirmed the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreachable`] if no host accepts the session.
    pub async fn connect(options: TcpClientOptions) -> Result<Self> {
        let TcpClientOptions {
            hosts,
            session_timeout,
        } = options;

        let mut established = None;
        for host in &hosts {
            match timeout(session_timeout, handshake(host, None, session_timeout)).await {
                Ok(Ok(connected)) => {
                    established = Some(connected);
                    break;
                }
                Ok(Err(e)) => warn!("failed to open session on {host}: {e}"),
                Err(_) => warn!("timed out opening session on {host}"),
            }
        }

        let Some((connection, session)) = established else {
            return Err(Error::Unreachable(hosts));
        };

        info!("opened coordination session {session}");

        let inner = Arc::new(Inner {
            session,
            hosts,
            session_timeout,
            expired: AtomicBool::new(false),
            next_request: AtomicU64::new(1),
            pending: DashMap::new(),
            watches: DashMap::new(),
            outgoing: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        });

        inner
            .task_tracker
            .spawn(run_session(Arc::clone(&inner), connection));

        Ok(Self { inner })
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.inner.expired.load(Ordering::Acquire)
    }

    async fn request(&self, path: &str, op: Operation) -> Result<(Reply, Option<Watch>)> {
        let inner = &self.inner;
        if self.is_expired() {
            return Err(Error::SessionExpired(inner.session));
        }

        let id = inner.next_request.fetch_add(1, Ordering::Relaxed);
        let frame = encode(&ClientMessage::Request { id, op })?;

        let (sender, receiver) = oneshot::channel();
        inner.pending.insert(
            id,
            Pending {
                path: path.to_string(),
                sender,
            },
        );

        let outgoing = inner.outgoing.lock().clone();
        let sent = outgoing.is_some_and(|outgoing| {
            outgoing
                .send(Outgoing {
                    frame,
                    closing: false,
                })
                .is_ok()
        });
        if !sent {
            inner.pending.remove(&id);
            return Err(Error::ConnectionLoss);
        }

        // A dropped sender means the connection went away first.
        receiver.await.unwrap_or(Err(Error::ConnectionLoss))
    }
}

fn unexpected(reply: &Reply) -> Error {
    Error::Protocol(format!("unexpected reply {reply:?}"))
}

fn missing_watch() -> Error {
    Error::Protocol("reply carries no watch".to_string())
}

#[async_trait]
impl CoordinationClient for TcpCoordinationClient {
    type Error = Error;

    fn session_id(&self) -> SessionId {
        self.inner.session
    }

    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<()> {
        let op = Operation::Create {
            path: path.to_string(),
            data,
            mode,
        };
        match self.request(path, op).await? {
            (Reply::Created, _) => Ok(()),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn get(&self, path: &str) -> Result<(Bytes, Stat)> {
        let op = Operation::Get {
            path: path.to_string(),
            watch: false,
        };
        match self.request(path, op).await? {
            (Reply::Data { data, stat, .. }, _) => Ok((data, stat)),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn get_watched(&self, path: &str) -> Result<(Bytes, Stat, Watch)> {
        let op = Operation::Get {
            path: path.to_string(),
            watch: true,
        };
        match self.request(path, op).await? {
            (Reply::Data { data, stat, .. }, Some(watch)) => Ok((data, stat, watch)),
            (Reply::Data { .. }, None) => Err(missing_watch()),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        let op = Operation::Exists {
            path: path.to_string(),
            watch: false,
        };
        match self.request(path, op).await? {
            (Reply::Exists { stat, .. }, _) => Ok(stat),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn exists_watched(&self, path: &str) -> Result<(Option<Stat>, Watch)> {
        let op = Operation::Exists {
            path: path.to_string(),
            watch: true,
        };
        match self.request(path, op).await? {
            (Reply::Exists { stat, .. }, Some(watch)) => Ok((stat, watch)),
            (Reply::Exists { .. }, None) => Err(missing_watch()),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn set(&self, path: &str, data: Bytes, expected_version: Option<i32>) -> Result<Stat> {
        let op = Operation::Set {
            path: path.to_string(),
            data,
            expected_version,
        };
        match self.request(path, op).await? {
            (Reply::Stat(stat), _) => Ok(stat),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<()> {
        let op = Operation::Delete {
            path: path.to_string(),
            expected_version,
        };
        match self.request(path, op).await? {
            (Reply::Deleted, _) => Ok(()),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let op = Operation::Children {
            path: path.to_string(),
            watch: false,
        };
        match self.request(path, op).await? {
            (Reply::Children { children, .. }, _) => Ok(children),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn children_watched(&self, path: &str) -> Result<(Vec<String>, Watch)> {
        let op = Operation::Children {
            path: path.to_string(),
            watch: true,
        };
        match self.request(path, op).await? {
            (Reply::Children { children, .. }, Some(watch)) => Ok((children, watch)),
            (Reply::Children { .. }, None) => Err(missing_watch()),
            (reply, _) => Err(unexpected(&reply)),
        }
    }

    async fn close(&self) -> Result<()> {
        let inner = &self.inner;

        let frame = encode(&ClientMessage::Close)?;
        let outgoing = inner.outgoing.lock().clone();
        let sent = outgoing
            .is_some_and(|outgoing| outgoing.send(Outgoing { frame, closing: true }).is_ok());
        if !sent {
            inner.shutdown_token.cancel();
        }

        inner.task_tracker.close();
        inner.task_tracker.wait().await;

        Ok(())
    }
}

async fn run_session(inner: Arc<Inner>, mut connection: Connection) {
    loop {
        let end = inner.run_connection(connection).await;
        inner.connection_lost();

        match end {
            ConnectionEnd::Closed => {
                info!("closed coordination session {}", inner.session);
                break;
            }
            ConnectionEnd::Cancelled => break,
            ConnectionEnd::Dropped => {}
        }

        warn!(
            "lost connection to coordination store, resuming session {}",
            inner.session
        );

        match inner.resume().await {
            Some(resumed) => connection = resumed,
            None => break,
        }
    }

    inner.end_session();
}

impl Inner {
    async fn run_connection(&self, connection: Connection) -> ConnectionEnd {
        let (mut sink, mut stream) = connection.split();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Outgoing>();
        *self.outgoing.lock() = Some(sender);

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => return ConnectionEnd::Cancelled,
                outgoing = receiver.recv() => {
                    let Some(Outgoing { frame, closing }) = outgoing else {
                        return ConnectionEnd::Dropped;
                    };
                    if let Err(e) = sink.send(frame).await {
                        debug!("write to coordination store failed: {e}");
                        return ConnectionEnd::Dropped;
                    }
                    if closing {
                        return ConnectionEnd::Closed;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.dispatch(&frame),
                    Some(Err(e)) => {
                        debug!("read from coordination store failed: {e}");
                        return ConnectionEnd::Dropped;
                    }
                    None => return ConnectionEnd::Dropped,
                },
            }
        }
    }

    fn dispatch(&self, frame: &[u8]) {
        match decode::<ServerMessage>(frame) {
            Ok(ServerMessage::Response { id, result }) => {
                let Some((_, pending)) = self.pending.remove(&id) else {
                    debug!("dropping reply to abandoned request {id}");
                    return;
                };

                // Watches are materialized here, before any later frame can
                // report them firing.
                let result = result
                    .map_err(|RemoteError { code, message }| Error::Remote { code, message })
                    .map(|reply| {
                        let watch = reply.watch().map(|watch_id| {
                            let (trigger, watch) = watch_pair(&pending.path);
                            self.watches.insert(watch_id, trigger);
                            watch
                        });
                        (reply, watch)
                    });

                let _ = pending.sender.send(result);
            }
            Ok(ServerMessage::WatchFired { watch, event }) => {
                if let Some((_, trigger)) = self.watches.remove(&watch) {
                    trigger.fire(event);
                }
            }
            Ok(other) => warn!("unexpected message from coordination store: {other:?}"),
            Err(e) => warn!("undecodable frame from coordination store: {e}"),
        }
    }

    fn connection_lost(&self) {
        self.outgoing.lock().take();
        // Dropping the senders fails every in-flight request with
        // connection loss.
        self.pending.clear();
    }

    async fn resume(&self) -> Option<Connection> {
        let deadline = Instant::now() + self.session_timeout;
        let mut backoff = Duration::from_millis(50);

        while Instant::now() < deadline {
            for host in &self.hosts {
                let attempt = tokio::select! {
                    () = self.shutdown_token.cancelled() => return None,
                    attempt = timeout_at(
                        deadline,
                        handshake(host, Some(self.session), self.session_timeout),
                    ) => attempt,
                };

                match attempt {
                    Ok(Ok((connection, _))) => {
                        info!("resumed coordination session {} on {host}", self.session);
                        return Some(connection);
                    }
                    Ok(Err(Error::SessionExpired(_))) => {
                        warn!("coordination session {} expired", self.session);
                        return None;
                    }
                    Ok(Err(e)) => debug!("failed to resume session on {host}: {e}"),
                    Err(_) => break,
                }
            }

            tokio::select! {
                () = self.shutdown_token.cancelled() => return None,
                () = sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(Duration::from_secs(1));
        }

        warn!(
            "coordination session {} expired before the store could be reached",
            self.session
        );
        None
    }

    fn end_session(&self) {
        self.expired.store(true, Ordering::Release);
        // Dropping the triggers resolves pending watches as session closed.
        self.watches.clear();
    }
}
