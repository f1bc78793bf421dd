use crate::error::{Error, Result};
use crate::protocol::{
    ClientMessage, Operation, RemoteError, Reply, ServerMessage, WatchId, decode, encode,
};

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use convoy_coordination::{CoordinationClient, CoordinationError, SessionId, Watch};
use convoy_coordination_memory::{MemoryCoordinationClient, MemoryCoordinationStore};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

type FrameSink = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;

/// Options for [`CoordinationServer`].
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Address to listen on. Port 0 picks a free port.
    pub listen_addr: SocketAddr,

    /// The store to serve.
    pub store: MemoryCoordinationStore,
}

/// One client session and everything queued for it.
struct Session {
    client: MemoryCoordinationClient,
    timeout: Duration,
    outbox: Mutex<VecDeque<ServerMessage>>,
    outbox_notify: Notify,
    generation: AtomicU64,
    connection: Mutex<Option<CancellationToken>>,
    next_watch: AtomicU64,
}

impl Session {
    fn new(client: MemoryCoordinationClient, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            outbox: Mutex::new(VecDeque::new()),
            outbox_notify: Notify::new(),
            generation: AtomicU64::new(0),
            connection: Mutex::new(None),
            next_watch: AtomicU64::new(1),
        }
    }

    fn id(&self) -> SessionId {
        self.client.session_id()
    }

    /// Binds the session to a new connection, detaching any previous one.
    fn attach(&self, parent: &CancellationToken) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = parent.child_token();
        if let Some(previous) = self.connection.lock().replace(token.clone()) {
            previous.cancel();
        }
        (generation, token)
    }

    fn push(&self, message: ServerMessage) {
        self.outbox.lock().push_back(message);
        self.outbox_notify.notify_one();
    }

    async fn apply(
        &self,
        op: Operation,
    ) -> std::result::Result<(Reply, Option<(WatchId, Watch)>), RemoteError> {
        let client = &self.client;
        let applied = match op {
            Operation::Create { path, data, mode } => client
                .create(&path, data, mode)
                .await
                .map(|()| (Reply::Created, None)),
            Operation::Get { path, watch: false } => {
                client.get(&path).await.map(|(data, stat)| {
                    (
                        Reply::Data {
                            data,
                            stat,
                            watch: None,
                        },
                        None,
                    )
                })
            }
            Operation::Get { path, watch: true } => {
                client.get_watched(&path).await.map(|(data, stat, watch)| {
                    let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
                    (
                        Reply::Data {
                            data,
                            stat,
                            watch: Some(id),
                        },
                        Some((id, watch)),
                    )
                })
            }
            Operation::Exists { path, watch: false } => client
                .exists(&path)
                .await
                .map(|stat| (Reply::Exists { stat, watch: None }, None)),
            Operation::Exists { path, watch: true } => {
                client.exists_watched(&path).await.map(|(stat, watch)| {
                    let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
                    (
                        Reply::Exists {
                            stat,
                            watch: Some(id),
                        },
                        Some((id, watch)),
                    )
                })
            }
            Operation::Set {
                path,
                data,
                expected_version,
            } => client
                .set(&path, data, expected_version)
                .await
                .map(|stat| (Reply::Stat(stat), None)),
            Operation::Delete {
                path,
                expected_version,
            } => client
                .delete(&path, expected_version)
                .await
                .map(|()| (Reply::Deleted, None)),
            Operation::Children { path, watch: false } => client
                .children(&path)
                .await
                .map(|children| {
                    (
                        Reply::Children {
                            children,
                            watch: None,
                        },
                        None,
                    )
                }),
            Operation::Children { path, watch: true } => {
                client.children_watched(&path).await.map(|(children, watch)| {
                    let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
                    (
                        Reply::Children {
                            children,
                            watch: Some(id),
                        },
                        Some((id, watch)),
                    )
                })
            }
        };

        applied.map_err(|err| RemoteError {
            code: err.code(),
            message: err.to_string(),
        })
    }
}

struct Shared {
    store: MemoryCoordinationStore,
    sessions: DashMap<SessionId, Arc<Session>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

/// Serves a [`MemoryCoordinationStore`] over TCP for local development.
pub struct CoordinationServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl CoordinationServer {
    /// Binds the listener and starts accepting sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(options: ServerOptions) -> Result<Self> {
        let ServerOptions { listen_addr, store } = options;

        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| Error::Io("failed to bind coordination listener", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Io("failed to read listener address", e))?;

        info!("coordination server listening on {local_addr}");

        let shared = Arc::new(Shared {
            store,
            sessions: DashMap::new(),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        });

        shared
            .task_tracker
            .spawn(accept_loop(Arc::clone(&shared), listener));

        Ok(Self { local_addr, shared })
    }

    /// The address the server is listening on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live sessions, including detached ones.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Stops accepting connections and drops every connection.
    pub async fn shutdown(&self) {
        info!("coordination server shutting down");

        self.shared.shutdown_token.cancel();
        self.shared.task_tracker.close();
        self.shared.task_tracker.wait().await;
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        tokio::select! {
            () = shared.shutdown_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {peer}");
                    let shared_clone = Arc::clone(&shared);
                    shared.task_tracker.spawn(async move {
                        if let Err(e) = handle_connection(shared_clone, stream).await {
                            warn!("connection from {peer} failed: {e}");
                        }
                    });
                }
                Err(e) => error!("failed to accept connection: {e}"),
            },
        }
    }
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream) -> Result<()> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let Some(frame) = framed.next().await else {
        return Ok(());
    };
    let frame = frame.map_err(|e| Error::Io("failed to read handshake", e))?;

    let ClientMessage::Connect {
        session: resume,
        timeout_ms,
    } = decode(&frame)?
    else {
        return Err(Error::Protocol("expected connect".to_string()));
    };

    let session = if let Some(id) = resume {
        let existing = shared
            .sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()));

        if let Some(session) = existing {
            debug!("resuming session {id}");
            session
        } else {
            debug!("refusing to resume unknown session {id}");
            framed
                .send(encode(&ServerMessage::SessionExpired)?)
                .await
                .map_err(|e| Error::Io("failed to send handshake reply", e))?;
            return Ok(());
        }
    } else {
        let session = Arc::new(Session::new(
            shared.store.connect(),
            Duration::from_millis(timeout_ms),
        ));
        info!("opened session {}", session.id());
        shared.sessions.insert(session.id(), Arc::clone(&session));
        session
    };

    let (generation, connection_token) = session.attach(&shared.shutdown_token);

    framed
        .send(encode(&ServerMessage::Connected {
            session: session.id(),
        })?)
        .await
        .map_err(|e| Error::Io("failed to send handshake reply", e))?;

    let (sink, mut stream) = framed.split();
    shared.task_tracker.spawn(write_outbox(
        Arc::clone(&session),
        sink,
        connection_token.clone(),
    ));

    let closed = loop {
        tokio::select! {
            () = connection_token.cancelled() => break false,
            frame = stream.next() => match frame {
                Some(Ok(frame)) => match decode::<ClientMessage>(&frame) {
                    Ok(ClientMessage::Request { id, op }) => execute(&shared, &session, id, op).await,
                    Ok(ClientMessage::Close) => break true,
                    Ok(ClientMessage::Connect { .. }) => {
                        warn!("session {} sent a second connect", session.id());
                    }
                    Err(e) => {
                        warn!("undecodable frame from session {}: {e}", session.id());
                        break false;
                    }
                },
                Some(Err(e)) => {
                    debug!("read from session {} failed: {e}", session.id());
                    break false;
                }
                None => break false,
            },
        }
    };

    connection_token.cancel();

    if closed {
        shared.sessions.remove(&session.id());
        let _ = session.client.close().await;
        info!("session {} closed by client", session.id());
    } else {
        let shared_clone = Arc::clone(&shared);
        shared
            .task_tracker
            .spawn(linger(shared_clone, session, generation));
    }

    Ok(())
}

async fn execute(shared: &Shared, session: &Arc<Session>, id: u64, op: Operation) {
    let (result, watch) = match session.apply(op).await {
        Ok((reply, watch)) => (Ok(reply), watch),
        Err(err) => (Err(err), None),
    };

    // The response goes out before anything the watch could report.
    session.push(ServerMessage::Response { id, result });

    if let Some((watch_id, watch)) = watch {
        let session = Arc::clone(session);
        let shutdown_token = shared.shutdown_token.clone();
        shared.task_tracker.spawn(async move {
            tokio::select! {
                () = shutdown_token.cancelled() => {}
                event = watch.fired() => session.push(ServerMessage::WatchFired {
                    watch: watch_id,
                    event,
                }),
            }
        });
    }
}

async fn write_outbox(session: Arc<Session>, mut sink: FrameSink, token: CancellationToken) {
    loop {
        let next = session.outbox.lock().front().cloned();

        let Some(message) = next else {
            tokio::select! {
                () = token.cancelled() => break,
                () = session.outbox_notify.notified() => {}
            }
            continue;
        };

        let frame = match encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode message for session {}: {e}", session.id());
                session.outbox.lock().pop_front();
                continue;
            }
        };

        tokio::select! {
            () = token.cancelled() => break,
            sent = sink.send(frame) => {
                if let Err(e) = sent {
                    debug!("write to session {} failed: {e}", session.id());
                    token.cancel();
                    break;
                }
            }
        }

        // Only dequeue once written, so a resumed connection sees it otherwise.
        session.outbox.lock().pop_front();
    }
}

/// Keeps a detached session for its timeout, then expires it unless a new
/// connection has attached in the meantime.
async fn linger(shared: Arc<Shared>, session: Arc<Session>, generation: u64) {
    tokio::select! {
        () = shared.shutdown_token.cancelled() => return,
        () = tokio::time::sleep(session.timeout) => {}
    }

    let id = session.id();
    let expired = shared
        .sessions
        .remove_if(&id, |_, current| {
            current.generation.load(Ordering::SeqCst) == generation
        })
        .is_some();

    if expired {
        let _ = session.client.close().await;
        info!("session {id} expired");
    }
}
