use indextree::NodeId;
use std::collections::HashSet;

use crate::events::{EventBus, Subscription};
use crate::tree::NodeStore;

/// Change notification published by [`ExpansionTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionChange {
    Expanded(NodeId),
    Collapsed(NodeId),
    /// The whole set was replaced (search entered or restored, new roots).
    Reset,
}

/// Tracks which nodes currently have their children in the flat list.
#[derive(Default)]
pub struct ExpansionTracker {
    expanded: HashSet<NodeId>,
    changes: EventBus<ExpansionChange>,
}

impl ExpansionTracker {
    pub fn subscribe(&mut self) -> Subscription<ExpansionChange> {
        self.changes.subscribe()
    }

    /// Mark a node expanded. Returns false if it already was.
    pub fn expand(&mut self, id: NodeId) -> bool {
        let inserted = self.expanded.insert(id);
        if inserted {
            self.changes.publish(ExpansionChange::Expanded(id));
        }
        inserted
    }

    pub fn collapse(&mut self, id: NodeId) -> bool {
        let removed = self.expanded.remove(&id);
        if removed {
            self.changes.publish(ExpansionChange::Collapsed(id));
        }
        removed
    }

    /// Remove this node and all of its stored descendants from the set.
    pub fn collapse_recursive(&mut self, id: NodeId, store: &NodeStore) {
        self.collapse(id);
        if self.expanded.is_empty() {
            return;
        }
        for descendant in store.descendants(id) {
            self.collapse(descendant);
        }
    }

    pub fn is_expanded(&self, id: NodeId) -> bool {
        self.expanded.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }

    pub fn snapshot(&self) -> HashSet<NodeId> {
        self.expanded.clone()
    }

    /// Swap in a whole new set, publishing a single reset.
    pub fn replace_all(&mut self, expanded: HashSet<NodeId>) {
        self.expanded = expanded;
        self.changes.publish(ExpansionChange::Reset);
    }

    pub fn collapse_all(&mut self) {
        self.replace_all(HashSet::new());
    }
}
