use indexmap::IndexMap;
use indextree::{Arena, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, TreeError};

/// Domain node supplied by the external data source.
///
/// `children` of `None` means "not fetched yet"; `Some(vec![])` is a fetched
/// leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub path: String,
    pub label: String,
    /// Whether the node declares itself a container.
    #[serde(default)]
    pub container: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

impl TreeNode {
    pub fn leaf(path: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            container: false,
            children: None,
            attrs: BTreeMap::new(),
        }
    }

    pub fn container(path: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            container: true,
            ..Self::leaf(path, label)
        }
    }

    pub fn with_children(mut self, children: Vec<TreeNode>) -> Self {
        self.container = true;
        self.children = Some(children);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// Parent of a `/`-separated identity path, `None` for top-level paths.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// A cached domain node. Children live in the arena, never in `node.children`.
#[derive(Debug, Clone)]
pub struct StoredNode {
    pub node: TreeNode,
    pub fetched: bool,
}

/// Engine-owned cache of fetched children, keyed by node identity.
///
/// A hidden root holds the top-level forest so every visible node has a
/// parent in the arena.
pub struct NodeStore {
    arena: Arena<StoredNode>,
    root: NodeId,
    path_to_node: HashMap<String, NodeId>,
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(StoredNode {
            node: TreeNode::container("", ""),
            fetched: true,
        });
        Self {
            arena,
            root,
            path_to_node: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        !id.is_removed(&self.arena) && self.arena.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        if id.is_removed(&self.arena) {
            return None;
        }
        self.arena.get(id).map(|n| &n.get().node)
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.path_to_node.get(path).copied()
    }

    pub fn path_of(&self, id: NodeId) -> String {
        self.get(id)
            .map(|node| node.path.clone())
            .unwrap_or_default()
    }

    pub fn is_fetched(&self, id: NodeId) -> bool {
        if id.is_removed(&self.arena) {
            return false;
        }
        self.arena
            .get(id)
            .map(|n| n.get().fetched)
            .unwrap_or(false)
    }

    /// Cached children, or `None` while they have not been fetched.
    pub fn children(&self, id: NodeId) -> Option<Vec<NodeId>> {
        if !self.is_fetched(id) {
            return None;
        }
        Some(id.children(&self.arena).collect())
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        if !self.contains(id) {
            return 0;
        }
        id.children(&self.arena).count()
    }

    /// Arena parent; top-level nodes report the hidden root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        if !self.contains(id) {
            return None;
        }
        id.parent(&self.arena)
    }

    /// Every stored descendant of `id`, pre-order, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        id.descendants(&self.arena).skip(1).collect()
    }

    /// Replace the cached children of `parent` and mark it fetched.
    ///
    /// Duplicate paths in the batch collapse to the last occurrence, kept at
    /// the position of the first one.
    pub fn set_children(&mut self, parent: NodeId, children: Vec<TreeNode>) -> Vec<NodeId> {
        if !self.contains(parent) {
            return Vec::new();
        }
        self.clear_children(parent);
        let ids = self.ingest(parent, children);
        if let Some(node) = self.arena.get_mut(parent) {
            node.get_mut().fetched = true;
        }
        ids
    }

    /// Nodes elsewhere in the tree that [`NodeStore::set_children`] would
    /// replace because `children` (embedded levels included) reuse their
    /// paths. The parent chain and the parent's own subtree are not counted.
    pub fn displaced_by(&self, parent: NodeId, children: &[TreeNode]) -> Vec<NodeId> {
        fn walk(store: &NodeStore, parent: NodeId, nodes: &[TreeNode], out: &mut Vec<NodeId>) {
            for node in nodes {
                if let Some(existing) = store.lookup(&node.path) {
                    let kept = existing.ancestors(&store.arena).any(|a| a == parent)
                        || parent.ancestors(&store.arena).any(|a| a == existing);
                    if !kept && !out.contains(&existing) {
                        out.push(existing);
                    }
                }
                if let Some(embedded) = &node.children {
                    walk(store, parent, embedded, out);
                }
            }
        }

        let mut out = Vec::new();
        if self.contains(parent) {
            walk(self, parent, children, &mut out);
        }
        out
    }

    /// Drop the cached children of `id` and mark it unfetched.
    pub fn clear_children(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        let children: Vec<NodeId> = id.children(&self.arena).collect();
        for child in children {
            self.remove(child);
        }
        if id != self.root {
            if let Some(node) = self.arena.get_mut(id) {
                node.get_mut().fetched = false;
            }
        }
    }

    /// Insert one node under a fetched parent at a sibling index.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, node: TreeNode) -> Result<NodeId> {
        if !self.is_fetched(parent) {
            return Err(TreeError::ParentNotFetched(self.path_of(parent)));
        }
        let mut ids = self.ingest_detached(parent, vec![node]);
        let Some(new_id) = ids.pop() else {
            return Err(TreeError::NodeNotFound(self.path_of(parent)));
        };
        self.attach(parent, index, new_id);
        Ok(new_id)
    }

    /// Detach `id` and re-attach it under `new_parent` at a sibling index.
    pub fn move_to(&mut self, id: NodeId, new_parent: NodeId, index: usize) -> Result<()> {
        if !self.contains(id) {
            return Err(TreeError::NodeNotFound(String::new()));
        }
        if !self.is_fetched(new_parent) {
            return Err(TreeError::ParentNotFetched(self.path_of(new_parent)));
        }
        id.detach(&mut self.arena);
        self.attach(new_parent, index, id);
        Ok(())
    }

    /// Rewrite the identity path and label of a single node.
    pub fn rename(&mut self, id: NodeId, new_path: &str, new_label: &str) {
        if !self.contains(id) {
            return;
        }
        let Some(entry) = self.arena.get_mut(id) else {
            return;
        };
        let record = &mut entry.get_mut().node;
        let old_path = std::mem::replace(&mut record.path, new_path.to_string());
        record.label = new_label.to_string();
        if self.path_to_node.get(&old_path) == Some(&id) {
            self.path_to_node.remove(&old_path);
        }
        self.path_to_node.insert(new_path.to_string(), id);
    }

    /// Remove `id` and its whole cached subtree.
    pub fn remove(&mut self, id: NodeId) {
        if !self.contains(id) || id == self.root {
            return;
        }
        let doomed: Vec<NodeId> = id.descendants(&self.arena).collect();
        for node_id in &doomed {
            if let Some(node) = self.arena.get(*node_id) {
                let path = &node.get().node.path;
                if self.path_to_node.get(path) == Some(node_id) {
                    self.path_to_node.remove(path);
                }
            }
        }
        id.remove_subtree(&mut self.arena);
    }

    fn attach(&mut self, parent: NodeId, index: usize, id: NodeId) {
        let next = parent.children(&self.arena).nth(index);
        match next {
            Some(sibling) => sibling.insert_before(id, &mut self.arena),
            None => parent.append(id, &mut self.arena),
        }
    }

    fn ingest(&mut self, parent: NodeId, children: Vec<TreeNode>) -> Vec<NodeId> {
        let ids = self.ingest_detached(parent, children);
        for id in &ids {
            parent.append(*id, &mut self.arena);
        }
        ids
    }

    /// Create arena nodes for a batch destined for `parent` without attaching
    /// them yet.
    fn ingest_detached(&mut self, parent: NodeId, children: Vec<TreeNode>) -> Vec<NodeId> {
        let mut unique: IndexMap<String, TreeNode> = IndexMap::with_capacity(children.len());
        for child in children {
            if let Some(previous) = unique.insert(child.path.clone(), child) {
                tracing::warn!(
                    event = "store.duplicate_child",
                    path = %previous.path,
                    "duplicate child path, keeping the last one"
                );
            }
        }

        let mut ids = Vec::with_capacity(unique.len());
        for (path, mut node) in unique {
            if let Some(existing) = self.path_to_node.get(&path).copied() {
                // The same identity elsewhere in the tree: the newest copy wins,
                // unless the old one is on the parent chain of this batch.
                let on_chain = parent.ancestors(&self.arena).any(|a| a == existing);
                if !on_chain {
                    self.remove(existing);
                }
            }
            let embedded = node.children.take();
            let fetched = embedded.is_some();
            let id = self.arena.new_node(StoredNode { node, fetched });
            self.path_to_node.insert(path, id);
            if let Some(grandchildren) = embedded {
                self.ingest(id, grandchildren);
            }
            ids.push(id);
        }
        ids
    }
}
