//! Workspace resolution
//!
//! Expands wildcard patterns against the remote directory, applies the
//! exclude/skip filters, and builds the de-duplicated workspace map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::debug;

use crate::limiter::RateLimiter;
use crate::reporef::{wildcard_pattern, RepoRef};
use crate::workspace::{RepoMetadata, Workspace, WorkspaceEntry};
use crate::{Error, Result};

/// Read access to the remote repository directory
///
/// Implemented by the GitHub client; tests substitute an in-memory map.
#[async_trait]
pub trait RepoDirectory: Send + Sync {
    /// All repo names belonging to `owner`
    async fn repo_names(&self, owner: &str) -> Result<Vec<String>>;

    /// Metadata for a single repo
    async fn repo_info(&self, owner: &str, name: &str) -> Result<RepoMetadata>;
}

/// The four repo-expression lists driving resolution
#[derive(Debug, Clone, Default)]
pub struct RepoPatterns {
    /// Repos to make available in the workspace
    pub require: Vec<String>,
    /// Repos to test; need not also appear in `require`
    pub test: Vec<String>,
    /// Patterns removing repos from the require set
    pub exclude: Vec<String>,
    /// Patterns removing repos from the test set
    pub skip: Vec<String>,
}

/// Resolve the pattern lists into a concrete, conflict-free workspace
///
/// Wildcard owners are listed once each regardless of how many patterns
/// reference them. Metadata for the whole union is fetched in one
/// rate-limited round. Two distinct refs mapping to the same repo name are
/// a fatal configuration error.
pub async fn resolve(
    root: &Path,
    patterns: &RepoPatterns,
    directory: &Arc<dyn RepoDirectory>,
    limiter: &Arc<RateLimiter>,
) -> Result<Workspace> {
    let require = parse_all(&patterns.require)?;
    let test = parse_all(&patterns.test)?;
    let exclude = parse_all(&patterns.exclude)?;
    let skip = parse_all(&patterns.skip)?;

    // Index of owned repo names so each owner is downloaded just once, in
    // the event we have wildcards in more than one pattern.
    let mut names_by_owner: HashMap<String, Vec<String>> = HashMap::new();
    let require = expand(require, directory, &mut names_by_owner).await?;
    let test = expand(test, directory, &mut names_by_owner).await?;

    let require: Vec<RepoRef> = require
        .into_iter()
        .filter(|r| !exclude.iter().any(|pattern| pattern.matches(r)))
        .collect();
    let test: Vec<RepoRef> = test
        .into_iter()
        .filter(|r| !skip.iter().any(|pattern| pattern.matches(r)))
        .collect();

    // Union: test targets first, then require-only refs. Exact-equal refs
    // collapse; same-name conflicts surface as duplicate entries below.
    let mut union: Vec<(RepoRef, bool)> = Vec::new();
    for repo_ref in test {
        if !union.iter().any(|(existing, _)| *existing == repo_ref) {
            union.push((repo_ref, true));
        }
    }
    for repo_ref in require {
        if !union.iter().any(|(existing, _)| *existing == repo_ref) {
            union.push((repo_ref, false));
        }
    }
    debug!(refs = union.len(), "expanded and filtered repo refs");

    // One rate-limited metadata round for the whole union.
    let mut lookups = JoinSet::new();
    for (idx, (repo_ref, _)) in union.iter().enumerate() {
        let directory = Arc::clone(directory);
        let limiter = Arc::clone(limiter);
        let owner = repo_ref.owner.clone();
        let name = repo_ref.name.clone();
        lookups.spawn(async move {
            let info = limiter.run(|| directory.repo_info(&owner, &name)).await;
            (idx, info)
        });
    }

    let mut metadata: Vec<Option<RepoMetadata>> = vec![None; union.len()];
    while let Some(joined) = lookups.join_next().await {
        let (idx, info) =
            joined.map_err(|e| Error::Remote(format!("metadata lookup task failed: {e}")))?;
        metadata[idx] = Some(info?);
    }

    let mut workspace = Workspace::new(root);
    for ((repo_ref, test_target), info) in union.into_iter().zip(metadata) {
        let info = info.ok_or_else(|| {
            Error::Remote(format!("metadata for {repo_ref} was never resolved"))
        })?;
        let name = repo_ref.name.clone();
        workspace.insert(WorkspaceEntry {
            dir: PathBuf::from(&name),
            name,
            repo_ref,
            test_target,
            metadata: Some(info),
        })?;
    }
    Ok(workspace)
}

fn parse_all(exprs: &[String]) -> Result<Vec<RepoRef>> {
    exprs.iter().map(|s| s.parse()).collect()
}

async fn expand(
    refs: Vec<RepoRef>,
    directory: &Arc<dyn RepoDirectory>,
    names_by_owner: &mut HashMap<String, Vec<String>>,
) -> Result<Vec<RepoRef>> {
    let mut out = Vec::new();
    for repo_ref in refs {
        if !repo_ref.is_wildcard() {
            out.push(repo_ref);
            continue;
        }

        let owner_key = repo_ref.owner.to_lowercase();
        if !names_by_owner.contains_key(&owner_key) {
            let names = directory.repo_names(&repo_ref.owner).await?;
            names_by_owner.insert(owner_key.clone(), names);
        }

        let pattern = wildcard_pattern(&repo_ref.name);
        for name in &names_by_owner[&owner_key] {
            if pattern.is_match(name) {
                out.push(repo_ref.with_name(name));
            }
        }
    }
    Ok(out)
}
