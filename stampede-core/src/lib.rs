//! Core engine for stampede, a bulk clone-and-test tool
//!
//! Resolves repo patterns against a remote directory into a local
//! workspace, brings every clone up to date, and runs each target's test
//! suite under rate limits, with flake retries and a failure rerun script.

pub mod config;
pub mod error;
pub mod git;
pub mod limiter;
pub mod report;
pub mod reporef;
pub mod resolver;
pub mod runner;
pub mod test_exec;
pub mod workspace;

pub use config::{resolve_github_token, CliValues, ConfigFile, RunnerOptions};
pub use error::{Error, Result};
pub use git::{GitVcs, Vcs};
pub use limiter::RateLimiter;
pub use report::Summary;
pub use reporef::RepoRef;
pub use resolver::{RepoDirectory, RepoPatterns};
pub use runner::Runner;
pub use test_exec::{TestOutcome, TestRunner, TestStatus, WctRunner};
pub use workspace::{RepoMetadata, Workspace, WorkspaceEntry};
