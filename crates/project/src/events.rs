use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};

/// Mutation notifications published by the collection store.
/// 收藏儲存區發出的異動通知。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    CollectionAdded {
        name: String,
    },
    CollectionRemoved {
        name: String,
    },
    CollectionRenamed {
        from: String,
        to: String,
    },
    ModelAdded {
        name: String,
        collection: String,
        path: PathBuf,
    },
    ModelRenamed {
        from: String,
        to: String,
    },
    ModelMoved {
        name: String,
        from: String,
        to: String,
        path: PathBuf,
    },
    ModelRemoved {
        name: String,
    },
    /// The current model (or its backing file) changed.
    CurrentChanged {
        name: Option<String>,
        path: Option<PathBuf>,
    },
    /// A disk mutation failed; the in-memory state went ahead regardless.
    PersistFailed {
        path: PathBuf,
        message: String,
    },
}

/// Fan-out of store events to any number of subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Vec<Sender<StoreEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn publish(&mut self, event: StoreEvent) {
        // disconnected receivers are pruned on the way
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
