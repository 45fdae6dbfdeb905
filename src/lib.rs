//! Lazy, flattened tree data source.
//!
//! A hierarchical model is presented as a single ordered list of rows with a
//! depth level each. Children are fetched on first expand and cached in an
//! arena owned by the engine; expand and collapse splice contiguous blocks in
//! and out of the list. On top of that sit a search mode with exact restore
//! and a multi-selection state machine.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod expand_state;
pub mod fetch;
pub mod flat;
pub mod search;
pub mod selection;
pub mod splice;
pub mod tree;

pub use batch::BatchQueue;
pub use config::EngineConfig;
pub use engine::TreeEngine;
pub use error::{Result, TreeError};
pub use events::{EventBus, Subscription, TreeEvent};
pub use expand_state::{ExpansionChange, ExpansionTracker};
pub use fetch::{ChildFetcher, DirectoryFetcher, FetchReply, NoFetch};
pub use flat::{FlatNode, FlatRef, Flattener, IconResolver};
pub use selection::{Modifiers, Pick, SelectionModel};
pub use tree::{NodeStore, TreeNode};

#[cfg(test)]
pub(crate) mod test_support {
    use indextree::NodeId;
    use proptest::sample::Index;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::fetch::{ChildFetcher, FetchReply};
    use crate::flat::{FlatRef, Flattener};
    use crate::tree::{NodeStore, TreeNode};

    /// A forest where node `i` hangs off the root (pick 0) or off node
    /// `pick - 1`. Every node is a fetched container.
    pub fn forest_from_parents(picks: &[Index]) -> NodeStore {
        let mut store = NodeStore::new();
        let root = store.root();
        let mut ids: Vec<NodeId> = Vec::with_capacity(picks.len());
        for (i, pick) in picks.iter().enumerate() {
            let choice = pick.index(i + 1);
            let parent = if choice == 0 { root } else { ids[choice - 1] };
            let node = TreeNode::container(format!("/n{}", i), format!("n{}", i)).with_children(Vec::new());
            let id = store.insert_child(parent, usize::MAX, node).unwrap();
            ids.push(id);
        }
        store
    }

    /// Every stored node, fully expanded, in pre-order.
    pub fn preorder(store: &NodeStore, flattener: &Flattener) -> Vec<FlatRef> {
        fn walk(store: &NodeStore, flattener: &Flattener, parent: NodeId, level: usize, out: &mut Vec<FlatRef>) {
            for child in store.children(parent).unwrap_or_default() {
                if let Some(row) = flattener.flatten_node(store, child, level) {
                    out.push(row);
                }
                walk(store, flattener, child, level + 1, out);
            }
        }
        let mut out = Vec::new();
        walk(store, flattener, store.root(), 0, &mut out);
        out
    }

    /// The stored forest as domain nodes with embedded children.
    pub fn export_forest(store: &NodeStore) -> Vec<TreeNode> {
        fn export(store: &NodeStore, id: NodeId) -> Option<TreeNode> {
            let mut node = store.get(id)?.clone();
            node.children = store
                .children(id)
                .map(|children| children.into_iter().filter_map(|child| export(store, child)).collect());
            Some(node)
        }
        store
            .children(store.root())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| export(store, id))
            .collect()
    }

    pub fn labels(list: &[FlatRef]) -> Vec<String> {
        list.iter().map(|row| row.label().to_string()).collect()
    }

    /// ```text
    /// a/        (not fetched)
    /// b/
    ///   c
    ///   d/      (not fetched)
    /// f
    /// ```
    pub fn sample_roots() -> Vec<TreeNode> {
        vec![
            TreeNode::container("/a", "a"),
            TreeNode::container("/b", "b").with_children(vec![
                TreeNode::leaf("/b/c", "c"),
                TreeNode::container("/b/d", "d"),
            ]),
            TreeNode::leaf("/f", "f"),
        ]
    }

    /// Fetcher that parks every reply until the test answers it.
    #[derive(Clone, Default)]
    pub struct ManualFetcher {
        calls: Rc<RefCell<Vec<String>>>,
        pending: Rc<RefCell<Vec<FetchReply>>>,
    }

    impl ManualFetcher {
        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        pub fn resolve(&self, path: &str, children: Vec<TreeNode>) {
            self.take(path).ok(children);
        }

        pub fn fail(&self, path: &str, reason: &str) {
            self.take(path).fail(reason);
        }

        fn take(&self, path: &str) -> FetchReply {
            let mut pending = self.pending.borrow_mut();
            let index = pending
                .iter()
                .position(|reply| reply.path() == path)
                .unwrap_or_else(|| panic!("no pending fetch for {}", path));
            pending.remove(index)
        }
    }

    impl ChildFetcher for ManualFetcher {
        fn fetch_children(&self, parent: &TreeNode, reply: FetchReply) {
            self.calls.borrow_mut().push(parent.path.clone());
            self.pending.borrow_mut().push(reply);
        }
    }
}
