use indextree::NodeId;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{Result, TreeError};
use crate::events::{EventBus, Subscription, TreeEvent};
use crate::expand_state::{ExpansionChange, ExpansionTracker};
use crate::fetch::{ChildFetcher, FetchFailure, FetchOutcome, FetchReply};
use crate::flat::{descendant_end, parent_index, FlatRef, Flattener};
use crate::search::SearchSnapshot;
use crate::splice::splice_bounded;
use crate::tree::{parent_path, NodeStore, TreeNode};

/// An outstanding fetch and the row that asked for it.
pub(crate) struct PendingFetch {
    ticket: u64,
    row: FlatRef,
}

/// Lazy, flattened view over a hierarchical model.
///
/// The engine is the only writer of the flat list and the expansion set.
/// Consumers observe it through [`TreeEngine::connect`]. Public operations
/// never fail: problems are logged and published as [`TreeEvent::Error`],
/// leaving the tree in a usable state.
pub struct TreeEngine {
    pub(crate) config: EngineConfig,
    pub(crate) store: NodeStore,
    pub(crate) flattener: Flattener,
    fetcher: Box<dyn ChildFetcher>,
    pub(crate) list: Vec<FlatRef>,
    pub(crate) expansion: ExpansionTracker,
    bus: EventBus<TreeEvent>,
    expansion_changes: Option<Subscription<ExpansionChange>>,
    /// Node -> the one request whose answer is still wanted.
    pub(crate) in_flight: HashMap<NodeId, PendingFetch>,
    next_ticket: u64,
    fetch_tx: Sender<FetchOutcome>,
    fetch_rx: Receiver<FetchOutcome>,
    pub(crate) search: Option<SearchSnapshot>,
}

impl TreeEngine {
    pub fn new<F>(fetcher: F) -> Self
    where
        F: ChildFetcher + 'static,
    {
        Self::with_config(fetcher, Flattener::new(), EngineConfig::default())
    }

    pub fn with_config<F>(fetcher: F, flattener: Flattener, config: EngineConfig) -> Self
    where
        F: ChildFetcher + 'static,
    {
        let (fetch_tx, fetch_rx) = mpsc::channel();
        Self {
            config,
            store: NodeStore::new(),
            flattener,
            fetcher: Box::new(fetcher),
            list: Vec::new(),
            expansion: ExpansionTracker::default(),
            bus: EventBus::default(),
            expansion_changes: None,
            in_flight: HashMap::new(),
            next_ticket: 0,
            fetch_tx,
            fetch_rx,
            search: None,
        }
    }

    /// Load the top-level forest, discarding all previous state.
    pub fn set_roots(&mut self, roots: Vec<TreeNode>) {
        self.store = NodeStore::new();
        self.in_flight.clear();
        self.search = None;
        let root = self.store.root();
        let ids = self.store.set_children(root, roots);
        self.list = self.flattener.transform(&self.store, &ids, 0);
        self.expansion.collapse_all();
        info!(event = "tree.roots", count = self.list.len(), "roots loaded");
        self.emit();
    }

    /// Subscribe to engine events. The current visible list is delivered
    /// immediately to the new subscriber.
    pub fn connect(&mut self) -> Subscription<TreeEvent> {
        if self.expansion_changes.is_none() {
            self.expansion_changes = Some(self.expansion.subscribe());
        }
        self.bus.subscribe_with(TreeEvent::List(self.visible_list()))
    }

    /// Listen to raw expansion-set changes.
    pub fn subscribe_expansion(&mut self) -> Subscription<ExpansionChange> {
        self.expansion.subscribe()
    }

    pub fn toggle(&mut self, id: NodeId) {
        if let Err(err) = self.try_toggle(id) {
            self.report(err);
        }
    }

    /// Apply every fetch completion that has arrived. Returns how many were
    /// processed.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(outcome) = self.fetch_rx.try_recv() {
            self.complete_fetch(outcome);
            applied += 1;
        }
        applied
    }

    /// Remove a node, its rows and its cached subtree.
    pub fn delete_node(&mut self, id: NodeId) {
        if let Err(err) = self.try_delete(id) {
            self.report(err);
        }
    }

    pub fn delete_path(&mut self, path: &str) {
        match self.store.lookup(path) {
            Some(id) => self.delete_node(id),
            None => self.report(TreeError::NodeNotFound(path.to_string())),
        }
    }

    /// Insert `node` under `parent` (`None` for the top level) at a sibling
    /// index, appending when `index` is `None` or out of range.
    ///
    /// A parent whose children were never fetched is left alone: the node
    /// will arrive with that fetch. Returns the new node id when cached.
    pub fn insert_node(&mut self, parent: Option<&str>, node: TreeNode, index: Option<usize>) -> Option<NodeId> {
        match self.try_insert(parent, node, index) {
            Ok(id) => id,
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    /// Rename a node in place, or move it when the parent path changes.
    ///
    /// An expanded container whose path changes loses its cached subtree and
    /// is fetched again under the new path.
    pub fn rename_or_move(&mut self, old_path: &str, new_path: &str, new_label: &str) {
        if let Err(err) = self.try_rename(old_path, new_path, new_label) {
            self.report(err);
        }
    }

    /// The row of the parent of `id`, or the row itself at level 0.
    pub fn get_parent(&self, id: NodeId) -> Option<FlatRef> {
        let index = self.index_of(id)?;
        parent_index(&self.list, index).map(|i| Rc::clone(&self.list[i]))
    }

    /// Expand the cached ancestor chain so `path` gets a row.
    pub fn expand_to(&mut self, path: &str) {
        let Some(id) = self.store.lookup(path) else {
            self.report(TreeError::NodeNotFound(path.to_string()));
            return;
        };
        let root = self.store.root();
        let mut chain = Vec::new();
        let mut current = self.store.parent(id);
        while let Some(ancestor) = current {
            if ancestor == root {
                break;
            }
            chain.push(ancestor);
            current = self.store.parent(ancestor);
        }

        let mut changed = false;
        for ancestor in chain.into_iter().rev() {
            if self.expansion.is_expanded(ancestor) {
                continue;
            }
            let (Some(index), Some(children)) = (self.index_of(ancestor), self.store.children(ancestor)) else {
                break;
            };
            self.expand_at(index, &children);
            changed = true;
        }
        if changed {
            self.emit();
        }
    }

    pub fn flat_list(&self) -> &[FlatRef] {
        &self.list
    }

    pub fn visible_list(&self) -> Vec<FlatRef> {
        self.list
            .iter()
            .filter(|node| node.is_visible())
            .cloned()
            .collect()
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.list.iter().position(|node| node.data() == id)
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.store.get(id)
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.store.lookup(path)
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn expansion(&self) -> &ExpansionTracker {
        &self.expansion
    }

    pub fn is_expanded(&self, id: NodeId) -> bool {
        self.expansion.is_expanded(id)
    }

    pub fn pending_fetches(&self) -> usize {
        self.in_flight.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn try_toggle(&mut self, id: NodeId) -> Result<()> {
        let index = self.require_index(id)?;
        let flat = Rc::clone(&self.list[index]);
        if flat.is_loading() || self.in_flight.contains_key(&id) {
            debug!(
                event = "tree.toggle_ignored",
                path = %self.store.path_of(id),
                "children are still loading"
            );
            return Ok(());
        }

        if self.expansion.is_expanded(id) {
            self.collapse_at(index);
            self.emit();
            return Ok(());
        }
        if !flat.is_expandable() {
            return Ok(());
        }

        flat.set_loading(true);
        match self.store.children(id) {
            Some(children) => {
                self.expand_at(index, &children);
                self.emit();
                Ok(())
            }
            None => self.issue_fetch(id),
        }
    }

    fn expand_at(&mut self, index: usize, children: &[NodeId]) {
        let flat = Rc::clone(&self.list[index]);
        let id = flat.data();
        let block = self.flattener.transform(&self.store, children, flat.level() + 1);
        self.mark_in_flight(&block);
        if block.is_empty() {
            flat.set_expandable(false);
        }
        let count = block.len();
        splice_bounded(&mut self.list, index + 1, block, self.config.splice_chunk);
        flat.set_loading(false);
        self.expansion.expand(id);
        trace!(event = "tree.expand", path = %self.store.path_of(id), children = count);
    }

    fn collapse_at(&mut self, index: usize) {
        let id = self.list[index].data();
        let end = descendant_end(&self.list, index);
        let removed = self.list.drain(index + 1..end).count();
        self.expansion.collapse_recursive(id, &self.store);
        trace!(event = "tree.collapse", path = %self.store.path_of(id), removed);
    }

    fn issue_fetch(&mut self, id: NodeId) -> Result<()> {
        let node = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| TreeError::NodeNotFound(format!("{:?}", id)))?;
        let row = Rc::clone(&self.list[self.require_index(id)?]);
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight.insert(id, PendingFetch { ticket, row });
        self.set_loading(id, true);
        debug!(event = "fetch.issued", path = %node.path, ticket);

        let reply = FetchReply::new(id, ticket, node.path.clone(), self.fetch_tx.clone());
        self.fetcher.fetch_children(&node, reply);
        // Synchronous fetchers have already answered.
        self.poll();
        Ok(())
    }

    fn complete_fetch(&mut self, outcome: FetchOutcome) {
        let FetchOutcome { node: id, ticket, result } = outcome;
        if self.in_flight.get(&id).map(|pending| pending.ticket) != Some(ticket) {
            debug!(event = "fetch.discarded", ticket, "answer to a superseded request");
            return;
        }
        let Some(PendingFetch { row: issuer, .. }) = self.in_flight.remove(&id) else {
            return;
        };
        self.set_loading(id, false);
        let path = self.store.path_of(id);

        let children = match result {
            Ok(children) => children,
            Err(FetchFailure::Failed(reason)) => {
                self.report(TreeError::FetchFailed { path, reason });
                return;
            }
            Err(FetchFailure::Dropped) => {
                self.report(TreeError::FetchDisconnected(path));
                return;
            }
        };

        // Paths in the batch that live elsewhere lose their old node and rows.
        let displaced = self.store.displaced_by(id, &children);
        if !displaced.is_empty() {
            self.invalidate_search();
        }
        for existing in &displaced {
            self.detach_rows(*existing);
        }

        let ids = self.store.set_children(id, children);
        debug!(event = "fetch.completed", path = %path, children = ids.len(), displaced = displaced.len());
        let current = self
            .index_of(id)
            .filter(|index| Rc::ptr_eq(&self.list[*index], &issuer));
        match current {
            Some(index) if !self.expansion.is_expanded(id) => {
                self.expand_at(index, &ids);
                self.emit();
            }
            _ => {
                debug!(event = "fetch.stale", path = %path, "children cached without splicing");
                if !displaced.is_empty() {
                    self.emit();
                }
            }
        }
    }

    fn try_delete(&mut self, id: NodeId) -> Result<()> {
        if !self.store.contains(id) || id == self.store.root() {
            return Err(TreeError::NodeNotFound(format!("{:?}", id)));
        }
        self.invalidate_search();
        let path = self.store.path_of(id);
        let removed = self.detach_rows(id);
        self.store.remove(id);
        info!(event = "tree.delete", path = %path, removed);
        self.emit();
        Ok(())
    }

    fn try_insert(&mut self, parent: Option<&str>, node: TreeNode, index: Option<usize>) -> Result<Option<NodeId>> {
        let parent_id = match parent {
            Some(path) => self
                .store
                .lookup(path)
                .ok_or_else(|| TreeError::NodeNotFound(path.to_string()))?,
            None => self.store.root(),
        };
        if !self.store.is_fetched(parent_id) {
            debug!(
                event = "tree.insert_deferred",
                parent = %self.store.path_of(parent_id),
                path = %node.path,
                "parent not fetched yet"
            );
            return Ok(None);
        }

        self.invalidate_search();
        if let Some(existing) = self.store.lookup(&node.path) {
            let holds_parent = existing == parent_id || self.store.descendants(existing).contains(&parent_id);
            if !holds_parent {
                self.detach_rows(existing);
                self.store.remove(existing);
            }
        }
        let count = self.store.child_count(parent_id);
        let position = index.unwrap_or(count).min(count);
        let path = node.path.clone();
        let new_id = self.store.insert_child(parent_id, position, node)?;
        let row = self.place_row(parent_id, new_id);
        info!(event = "tree.insert", path = %path, visible = row.is_some());
        self.emit();
        Ok(Some(new_id))
    }

    fn try_rename(&mut self, old_path: &str, new_path: &str, new_label: &str) -> Result<()> {
        let id = self
            .store
            .lookup(old_path)
            .ok_or_else(|| TreeError::NodeNotFound(old_path.to_string()))?;
        let inside_itself = new_path
            .strip_prefix(old_path)
            .is_some_and(|rest| rest.starts_with('/'));
        if inside_itself {
            return Err(TreeError::InvalidMove {
                from: old_path.to_string(),
                to: new_path.to_string(),
            });
        }
        self.invalidate_search();

        let path_changed = old_path != new_path;
        let moved = parent_path(old_path) != parent_path(new_path);
        let refetch = path_changed && self.expansion.is_expanded(id);
        let container = self.store.get(id).is_some_and(|node| node.container);

        if path_changed {
            // Cached child paths hang off the old path.
            if let Some(index) = self.index_of(id) {
                let end = descendant_end(&self.list, index);
                self.list.drain(index + 1..end);
            }
            self.expansion.collapse_recursive(id, &self.store);
            self.in_flight.remove(&id);
            for descendant in self.store.descendants(id) {
                self.in_flight.remove(&descendant);
            }
            if container {
                self.store.clear_children(id);
            }
        }
        self.store.rename(id, new_path, new_label);

        if moved {
            self.relocate(id, new_path)?;
        } else {
            self.reflatten(id);
        }
        info!(event = "tree.rename", from = old_path, to = new_path, refetch);
        self.emit();

        if refetch && self.index_of(id).is_some() {
            self.issue_fetch(id)?;
        }
        Ok(())
    }

    /// Re-attach a renamed node under the parent named by its new path.
    fn relocate(&mut self, id: NodeId, new_path: &str) -> Result<()> {
        let old_row = self.index_of(id).map(|index| self.list.remove(index));
        let target = match parent_path(new_path) {
            Some(path) => self.store.lookup(path),
            None => Some(self.store.root()),
        };

        match target {
            Some(parent) if self.store.is_fetched(parent) => {
                let end = self.store.child_count(parent);
                self.store.move_to(id, parent, end)?;
                let placed = self.place_row(parent, id);
                if let (Some(old), Some(at)) = (old_row, placed) {
                    let new = Rc::clone(&self.list[at]);
                    self.bus.publish(TreeEvent::Replaced { old, new });
                }
            }
            _ => {
                // Destination not loaded: the node arrives with that fetch.
                debug!(event = "tree.move_unloaded", path = new_path, "destination not cached");
                self.expansion.collapse_recursive(id, &self.store);
                self.store.remove(id);
            }
        }
        Ok(())
    }

    /// Replace the row of `id` with a freshly flattened one at the same index.
    fn reflatten(&mut self, id: NodeId) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        let old = Rc::clone(&self.list[index]);
        let Some(new) = self.flattener.flatten_node(&self.store, id, old.level()) else {
            return;
        };
        self.mark_in_flight(std::slice::from_ref(&new));
        if let Some(pending) = self.in_flight.get_mut(&id).filter(|p| Rc::ptr_eq(&p.row, &old)) {
            pending.row = Rc::clone(&new);
        }
        self.list[index] = Rc::clone(&new);
        self.bus.publish(TreeEvent::Replaced { old, new });
    }

    /// Insert the row for a cached child of `parent` at its sibling position,
    /// if the parent's children are on screen.
    fn place_row(&mut self, parent: NodeId, id: NodeId) -> Option<usize> {
        let root = self.store.root();
        let (level, block_end) = if parent == root {
            (0, self.list.len())
        } else {
            let parent_index = self.index_of(parent)?;
            if !self.expansion.is_expanded(parent) {
                return None;
            }
            let parent_row = &self.list[parent_index];
            parent_row.set_expandable(true);
            (parent_row.level() + 1, descendant_end(&self.list, parent_index))
        };

        let siblings = self.store.children(parent)?;
        let position = siblings.iter().position(|sibling| *sibling == id)?;
        let at = siblings[position + 1..]
            .iter()
            .find_map(|sibling| self.index_of(*sibling))
            .unwrap_or(block_end);
        let row = self.flattener.flatten_node(&self.store, id, level)?;
        self.mark_in_flight(std::slice::from_ref(&row));
        self.list.insert(at, row);
        Some(at)
    }

    /// Drop the rows, expansion state and pending fetches of a subtree.
    fn detach_rows(&mut self, id: NodeId) -> usize {
        let removed = match self.index_of(id) {
            Some(index) => {
                let end = descendant_end(&self.list, index);
                self.list.drain(index..end).count()
            }
            None => 0,
        };
        self.expansion.collapse_recursive(id, &self.store);
        self.in_flight.remove(&id);
        for descendant in self.store.descendants(id) {
            self.in_flight.remove(&descendant);
        }
        removed
    }

    fn require_index(&self, id: NodeId) -> Result<usize> {
        self.index_of(id).ok_or_else(|| {
            if self.store.contains(id) {
                TreeError::NotInList(self.store.path_of(id))
            } else {
                TreeError::NodeNotFound(format!("{:?}", id))
            }
        })
    }

    fn set_loading(&self, id: NodeId, loading: bool) {
        let snapshot = self.search.as_ref().map(|s| s.list.as_slice()).unwrap_or(&[]);
        for row in self.list.iter().chain(snapshot.iter()) {
            if row.data() == id {
                row.set_loading(loading);
            }
        }
    }

    /// Fresh rows for nodes with a fetch outstanding show as loading.
    fn mark_in_flight(&self, rows: &[FlatRef]) {
        for row in rows {
            row.set_loading(self.in_flight.contains_key(&row.data()));
        }
    }

    /// End an active search before a structural mutation.
    fn invalidate_search(&mut self) {
        if self.restore_snapshot() {
            warn!(event = "search.invalidated", "structural change ended the active search");
            self.bus.publish(TreeEvent::SearchInvalidated);
        }
    }

    /// Publish the visible list, then the expansion changes that produced it.
    pub(crate) fn emit(&mut self) {
        let visible = self.visible_list();
        self.bus.publish(TreeEvent::List(visible));

        let changes = match &self.expansion_changes {
            Some(subscription) => subscription.drain(),
            None => return,
        };
        for change in changes {
            match change {
                ExpansionChange::Expanded(node) => {
                    self.bus.publish(TreeEvent::Toggled { node, expanded: true })
                }
                ExpansionChange::Collapsed(node) => {
                    self.bus.publish(TreeEvent::Toggled { node, expanded: false })
                }
                ExpansionChange::Reset => {}
            }
        }
    }

    pub(crate) fn report(&mut self, err: TreeError) {
        warn!(event = "tree.error", error = %err);
        self.bus.publish(TreeEvent::Error(err));
    }
}
