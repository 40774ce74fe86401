//! Error types for Stampede

use thiserror::Error;

/// Result type alias for Stampede operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Stampede operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A repo expression was not in `owner/repo[#ref]` form
    #[error("repo '{0}' is not in form owner/repo or owner/repo#ref")]
    MalformedRepoRef(String),

    /// Two distinct resolved refs mapped to the same workspace key
    #[error("more than one repo with name '{0}' defined in the workspace")]
    DuplicateWorkspaceEntry(String),

    /// Owner could not be found under either org or user semantics
    #[error("owner '{0}' not found as an organization or user")]
    OwnerNotFound(String),

    /// Repository has been renamed or moved on the remote
    #[error("repo {requested} has moved permanently to {moved_to}")]
    RepoMoved {
        /// The owner/name pair as requested.
        requested: String,
        /// Where the remote says it lives now.
        moved_to: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Local git operation failed
    #[error("git error: {0}")]
    Git(String),

    /// Test runner process could not be started
    #[error("failed to start test runner: {0}")]
    TestSpawn(String),

    /// Remote lookup error
    #[error("remote error: {0}")]
    Remote(String),
}
