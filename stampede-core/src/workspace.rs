//! The resolved set of repositories for one run and its on-disk root

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::reporef::RepoRef;
use crate::{Error, Result};

/// Remote metadata for a repository, fetched from the directory service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMetadata {
    /// Repo name
    pub name: String,
    /// `owner/name` as the remote reports it
    pub full_name: String,
    /// URL to clone from
    pub clone_url: String,
    /// The repository's default branch, when known
    pub default_branch: Option<String>,
}

/// One repository in the workspace
///
/// Created during resolution; `metadata` is populated from the directory
/// service in the same pass. Discarded at process exit, the on-disk clone
/// is the only state that outlives a run.
#[derive(Debug, Clone)]
pub struct WorkspaceEntry {
    /// Unique workspace key, equal to the repo name
    pub name: String,

    /// The ref as requested by the user, after wildcard expansion
    pub repo_ref: RepoRef,

    /// Clone directory, relative to the workspace root
    pub dir: PathBuf,

    /// Whether this entry is selected for test execution
    pub test_target: bool,

    /// Remote metadata resolved for this entry
    pub metadata: Option<RepoMetadata>,
}

/// A local directory and the set of repository clones in it
#[derive(Debug)]
pub struct Workspace {
    /// Directory the clones live under
    pub root: PathBuf,

    /// Entries keyed by repo name; keys are unique by construction
    pub repos: BTreeMap<String, WorkspaceEntry>,
}

impl Workspace {
    /// Create an empty workspace rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repos: BTreeMap::new(),
        }
    }

    /// Insert an entry; two entries may never share a name
    ///
    /// An ambiguous workspace is a configuration error surfaced to the
    /// user, never resolved by last-one-wins.
    pub fn insert(&mut self, entry: WorkspaceEntry) -> Result<()> {
        if self.repos.contains_key(&entry.name) {
            return Err(Error::DuplicateWorkspaceEntry(entry.name));
        }
        self.repos.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// The on-disk directory of an entry's working copy
    pub fn entry_dir(&self, entry: &WorkspaceEntry) -> PathBuf {
        self.root.join(&entry.dir)
    }

    /// Prepare the on-disk root for cloning
    ///
    /// With `fresh` the entire root is removed first. A leftover entry that
    /// is not a directory, or a directory containing exactly one file, is
    /// an aborted clone from a prior run and is deleted so the orchestrator
    /// treats it as absent.
    pub fn prepare_root(&self, fresh: bool) -> Result<()> {
        if fresh && self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;

        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if !path.is_dir() || fs::read_dir(&path)?.count() == 1 {
                tracing::debug!(path = %path.display(), "removing unusable workspace entry");
                remove_path(&path)?;
            }
        }
        Ok(())
    }
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
