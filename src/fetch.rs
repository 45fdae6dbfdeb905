use indextree::NodeId;
use jwalk::{Parallelism, WalkDir};
use rayon::prelude::*;
use std::io;
use std::path::Path;
use std::sync::mpsc::Sender;

use crate::config::EngineConfig;
use crate::tree::TreeNode;

/// Why a fetch produced no children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Failed(String),
    /// The reply handle was dropped without an answer.
    Dropped,
}

pub type FetchResult = Result<Vec<TreeNode>, FetchFailure>;

/// A completed fetch travelling back to the engine.
#[derive(Debug)]
pub struct FetchOutcome {
    pub node: NodeId,
    pub ticket: u64,
    pub result: FetchResult,
}

/// One-shot reply handle handed to a [`ChildFetcher`].
///
/// It is `Send`, so a fetcher may answer inline or from a worker thread. The
/// engine applies the answer on its next `poll`. Dropping the handle without
/// answering reports [`FetchFailure::Dropped`].
pub struct FetchReply {
    node: NodeId,
    ticket: u64,
    path: String,
    tx: Option<Sender<FetchOutcome>>,
}

impl FetchReply {
    pub(crate) fn new(node: NodeId, ticket: u64, path: String, tx: Sender<FetchOutcome>) -> Self {
        Self {
            node,
            ticket,
            path,
            tx: Some(tx),
        }
    }

    /// Identity path of the node whose children are requested.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn send(mut self, result: Result<Vec<TreeNode>, String>) {
        self.deliver(result.map_err(FetchFailure::Failed));
    }

    pub fn ok(self, children: Vec<TreeNode>) {
        self.send(Ok(children));
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.send(Err(reason.into()));
    }

    fn deliver(&mut self, result: FetchResult) {
        if let Some(tx) = self.tx.take() {
            // The engine may be gone; nothing left to notify then.
            let _ = tx.send(FetchOutcome {
                node: self.node,
                ticket: self.ticket,
                result,
            });
        }
    }
}

impl Drop for FetchReply {
    fn drop(&mut self) {
        self.deliver(Err(FetchFailure::Dropped));
    }
}

/// Supplies the children of a node. Must be idempotent.
pub trait ChildFetcher {
    fn fetch_children(&self, parent: &TreeNode, reply: FetchReply);
}

impl<F> ChildFetcher for F
where
    F: Fn(&TreeNode, FetchReply),
{
    fn fetch_children(&self, parent: &TreeNode, reply: FetchReply) {
        self(parent, reply)
    }
}

/// Fetcher for trees whose children are always embedded up front.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFetch;

impl ChildFetcher for NoFetch {
    fn fetch_children(&self, _parent: &TreeNode, reply: FetchReply) {
        reply.ok(Vec::new());
    }
}

/// Lists one directory level per fetch on the rayon pool.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryFetcher {
    dirs_first: bool,
    show_hidden: bool,
}

impl DirectoryFetcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dirs_first: config.dirs_first,
            show_hidden: config.show_hidden,
        }
    }

    /// Read the direct entries of `dir` as tree nodes.
    pub fn list(&self, dir: &Path) -> io::Result<Vec<TreeNode>> {
        let metadata = std::fs::metadata(dir)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", dir.display()),
            ));
        }

        let entries: Vec<_> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .skip_hidden(!self.show_hidden)
            .sort(true)
            .parallelism(Parallelism::Serial)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .collect();

        let mut nodes: Vec<TreeNode> = entries
            .par_iter()
            .map(|entry| {
                let path = entry.path();
                let is_dir = entry.file_type().is_dir();
                let label = entry.file_name().to_string_lossy().to_string();
                let mut node = if is_dir {
                    TreeNode::container(path.to_string_lossy(), label).with_attr("kind", "dir")
                } else {
                    TreeNode::leaf(path.to_string_lossy(), label).with_attr("kind", "file")
                };
                if !is_dir {
                    if let Ok(meta) = entry.metadata() {
                        node = node.with_attr("size", meta.len().to_string());
                    }
                }
                node
            })
            .collect();

        if self.dirs_first {
            // Stable, so the name order from the walk survives within each group.
            nodes.sort_by_key(|node| !node.container);
        }
        Ok(nodes)
    }
}

impl ChildFetcher for DirectoryFetcher {
    fn fetch_children(&self, parent: &TreeNode, reply: FetchReply) {
        let fetcher = *self;
        let dir = parent.path.clone();
        rayon::spawn(move || {
            let result = fetcher.list(Path::new(&dir)).map_err(|err| err.to_string());
            reply.send(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn sample_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), "hello").unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();
        fs::create_dir(dir.path().join("zeta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::write(dir.path().join("alpha").join("inner.rs"), "").unwrap();
        dir
    }

    fn reply_pair() -> (FetchReply, mpsc::Receiver<FetchOutcome>) {
        let mut arena = indextree::Arena::new();
        let node = arena.new_node(());
        let (tx, rx) = mpsc::channel();
        (FetchReply::new(node, 7, "/p".to_string(), tx), rx)
    }

    #[test]
    fn test_list_dirs_first_sorted() {
        let dir = sample_dir();
        let fetcher = DirectoryFetcher::new(&EngineConfig::default());

        let nodes = fetcher.list(dir.path()).unwrap();
        let labels: Vec<&str> = nodes.iter().map(|n| n.label.as_str()).collect();

        assert_eq!(labels, vec!["alpha", "zeta", "b.txt"]);
        assert!(nodes[0].container);
        assert!(nodes[0].children.is_none());
        assert!(!nodes[2].container);
        assert_eq!(nodes[2].attrs.get("size").map(String::as_str), Some("5"));
    }

    #[test]
    fn test_list_with_hidden_files() {
        let dir = sample_dir();
        let config = EngineConfig {
            show_hidden: true,
            dirs_first: false,
            ..EngineConfig::default()
        };

        let nodes = DirectoryFetcher::new(&config).list(dir.path()).unwrap();
        assert!(nodes.iter().any(|n| n.label == ".hidden"));
        assert_eq!(nodes.len(), 4);
    }

    #[test]
    fn test_list_missing_directory_fails() {
        let dir = sample_dir();
        let fetcher = DirectoryFetcher::new(&EngineConfig::default());
        assert!(fetcher.list(&dir.path().join("nope")).is_err());
        assert!(fetcher.list(&dir.path().join("b.txt")).is_err());
    }

    #[test]
    fn test_fetch_replies_from_worker() {
        let dir = sample_dir();
        let fetcher = DirectoryFetcher::new(&EngineConfig::default());
        let (reply, rx) = reply_pair();
        let parent = TreeNode::container(dir.path().to_string_lossy(), "root");

        fetcher.fetch_children(&parent, reply);

        let outcome = rx.recv().unwrap();
        assert_eq!(outcome.ticket, 7);
        assert_eq!(outcome.result.unwrap().len(), 3);
    }

    #[test]
    fn test_dropped_reply_reports_dropped() {
        let (reply, rx) = reply_pair();
        assert_eq!(reply.path(), "/p");
        drop(reply);
        assert_eq!(rx.recv().unwrap().result, Err(FetchFailure::Dropped));
    }

    #[test]
    fn test_failed_reply() {
        let (reply, rx) = reply_pair();
        reply.fail("boom");
        let outcome = rx.recv().unwrap();
        assert_eq!(outcome.result, Err(FetchFailure::Failed("boom".to_string())));
        assert!(rx.try_recv().is_err());
    }
}
