use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The node (or the parent of a node being created) does not exist.
    #[error("No node: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Ephemeral node cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The coordination session is gone. Fatal for the worker loop.
    #[error("Coordination session expired")]
    SessionExpired,

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Worker is not active")]
    Terminated,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_no_node(&self) -> bool {
        matches!(self, Self::NoNode(_))
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, Self::NodeExists(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
