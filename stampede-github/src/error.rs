//! GitHub API error types

use thiserror::Error;

/// Result type alias for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for GitHub operations
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying API error
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    /// Token rejected or missing for an authenticated endpoint
    #[error("GitHub authentication failed: {0}")]
    Auth(String),

    /// Owner matched neither an organization nor a user
    #[error("owner '{0}' not found as an organization or user")]
    OwnerNotFound(String),

    /// Repository does not exist under the requested owner
    #[error("repo '{0}' not found")]
    RepoNotFound(String),

    /// Repository has been renamed or transferred
    #[error("repo {requested} has moved permanently to {moved_to}")]
    RepoMoved {
        /// The owner/name pair as requested.
        requested: String,
        /// Where GitHub says it lives now.
        moved_to: String,
    },
}

impl From<Error> for stampede_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::OwnerNotFound(owner) => stampede_core::Error::OwnerNotFound(owner),
            Error::RepoMoved {
                requested,
                moved_to,
            } => stampede_core::Error::RepoMoved {
                requested,
                moved_to,
            },
            other => stampede_core::Error::Remote(other.to_string()),
        }
    }
}
