use thiserror::Error;

/// Errors surfaced by the tree engine on its error channel.
///
/// None of these escape the public operations as a `Result`; the engine logs
/// them and publishes them as [`crate::events::TreeEvent::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The child fetcher reported a failure for a node.
    #[error("failed to fetch children of {path}: {reason}")]
    FetchFailed { path: String, reason: String },
    /// The fetcher dropped its reply handle without answering.
    #[error("fetch for {0} was dropped without a reply")]
    FetchDisconnected(String),
    /// No stored node has this path.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// The node exists in the store but has no entry in the flat list.
    #[error("node is not in the flat list: {0}")]
    NotInList(String),
    /// A mutation needed the parent's children but they were never fetched.
    #[error("children of {0} have not been fetched")]
    ParentNotFetched(String),
    /// A node cannot be moved beneath itself.
    #[error("cannot move {from} into {to}")]
    InvalidMove { from: String, to: String },
    /// Invalid or unreadable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;
