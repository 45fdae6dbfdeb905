use indextree::NodeId;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::error::TreeError;
use crate::flat::FlatRef;

/// Notifications published by the tree engine.
#[derive(Debug, Clone)]
pub enum TreeEvent {
    /// The current visible flat list, after a structural change.
    List(Vec<FlatRef>),
    /// An expand or collapse completed.
    Toggled { node: NodeId, expanded: bool },
    /// A row was re-flattened in place (rename or move).
    Replaced { old: FlatRef, new: FlatRef },
    /// A mutation ended an active search and restored the pre-search list.
    SearchInvalidated,
    Error(TreeError),
}

/// Minimal publish/subscribe channel.
///
/// Each subscriber owns the receiving end of an mpsc channel; subscribers
/// that were dropped are pruned on the next publish.
pub struct EventBus<T> {
    subscribers: Vec<Sender<T>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn subscribe(&mut self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        Subscription { rx }
    }

    /// Subscribe and deliver `initial` to the new subscriber only.
    pub fn subscribe_with(&mut self, initial: T) -> Subscription<T> {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(initial);
        self.subscribers.push(tx);
        Subscription { rx }
    }

    pub fn publish(&mut self, event: T) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Receiving end of an [`EventBus`].
pub struct Subscription<T> {
    rx: Receiver<T>,
}

impl<T> Subscription<T> {
    /// Next pending event, if any. Never blocks.
    pub fn try_next(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
