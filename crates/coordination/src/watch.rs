//! One-shot watches.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// What happened to a watched node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchEvent {
    /// The node was created.
    NodeCreated,

    /// The node was deleted.
    NodeDeleted,

    /// The node's data was replaced.
    NodeDataChanged,

    /// A child was added to or removed from the node.
    NodeChildrenChanged,

    /// The session that registered the watch ended before it fired.
    SessionClosed,
}

/// The receiving half of a one-shot watch.
#[derive(Debug)]
pub struct Watch {
    path: String,
    receiver: oneshot::Receiver<WatchEvent>,
}

impl Watch {
    /// The watched path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the watch to fire. A watch whose trigger is dropped without
    /// firing reports [`WatchEvent::SessionClosed`].
    pub async fn fired(self) -> WatchEvent {
        self.receiver.await.unwrap_or(WatchEvent::SessionClosed)
    }
}

/// The sending half of a one-shot watch, held by the store.
#[derive(Debug)]
pub struct WatchTrigger {
    sender: oneshot::Sender<WatchEvent>,
}

impl WatchTrigger {
    /// Fires the watch. Firing a watch nobody waits on is not an error.
    pub fn fire(self, event: WatchEvent) {
        let _ = self.sender.send(event);
    }

    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Creates a connected trigger/watch pair for `path`.
#[must_use]
pub fn watch_pair(path: &str) -> (WatchTrigger, Watch) {
    let (sender, receiver) = oneshot::channel();
    (
        WatchTrigger { sender },
        Watch {
            path: path.to_string(),
            receiver,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fired_watch_reports_event() {
        let (trigger, watch) = watch_pair("/a");
        assert_eq!(watch.path(), "/a");

        trigger.fire(WatchEvent::NodeDataChanged);

        assert_eq!(watch.fired().await, WatchEvent::NodeDataChanged);
    }

    #[tokio::test]
    async fn test_dropped_trigger_reports_session_closed() {
        let (trigger, watch) = watch_pair("/a");
        drop(trigger);

        assert_eq!(watch.fired().await, WatchEvent::SessionClosed);
    }
}
