//! Local git operations for workspace clones
//!
//! Clone and fetch go through libgit2; checkout shells out to the `git`
//! binary, which handles the branch/tag/SHA ambiguity for us.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use semver::Version;
use tracing::debug;

use crate::{Error, Result};

/// Source-control operations the orchestrator needs
///
/// Implemented over libgit2 and the git CLI; tests substitute a fake that
/// fabricates directories.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Whether `dir` already holds a usable clone
    async fn is_cloned(&self, dir: &Path) -> bool;

    /// Clone `url` into `dir`
    async fn clone(&self, url: &str, dir: &Path) -> Result<()>;

    /// Fetch all remotes of the clone at `dir`
    async fn fetch(&self, dir: &Path) -> Result<()>;

    /// Check out a branch, tag or SHA in the clone at `dir`
    async fn checkout(&self, dir: &Path, reference: &str) -> Result<()>;

    /// Check out the highest semver-tagged release in the clone at `dir`
    async fn checkout_latest_release(&self, dir: &Path) -> Result<()>;

    /// The commit id at HEAD of the clone at `dir`
    async fn head_commit_id(&self, dir: &Path) -> Result<String>;
}

/// [`Vcs`] backed by libgit2, authenticating with an optional GitHub token
#[derive(Debug, Default)]
pub struct GitVcs {
    token: Option<String>,
}

impl GitVcs {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    fn fetch_options(token: Option<String>) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(token) = token {
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext(&token, "x-oauth-basic")
            });
        }
        callbacks.certificate_check(|_cert, _host| Ok(git2::CertificateCheckStatus::CertificateOk));

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn is_cloned(&self, dir: &Path) -> bool {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Repository::open(&dir).is_ok())
            .await
            .unwrap_or(false)
    }

    async fn clone(&self, url: &str, dir: &Path) -> Result<()> {
        let url = url.to_string();
        let dir = dir.to_path_buf();
        let token = self.token.clone();
        debug!(url = %url, dir = %dir.display(), "cloning");
        run_git(move || {
            RepoBuilder::new()
                .fetch_options(GitVcs::fetch_options(token))
                .clone(&url, &dir)?;
            Ok(())
        })
        .await
    }

    async fn fetch(&self, dir: &Path) -> Result<()> {
        let dir = dir.to_path_buf();
        let token = self.token.clone();
        debug!(dir = %dir.display(), "fetching");
        run_git(move || {
            let repo = Repository::open(&dir)?;
            for remote_name in repo.remotes()?.iter().flatten() {
                let mut remote = repo.find_remote(remote_name)?;
                let mut options = GitVcs::fetch_options(token.clone());
                remote.fetch(&[] as &[&str], Some(&mut options), None)?;
            }
            Ok(())
        })
        .await
    }

    async fn checkout(&self, dir: &Path, reference: &str) -> Result<()> {
        let output = tokio::process::Command::new("git")
            .arg("checkout")
            .arg(reference)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| Error::Git(format!("failed to run git checkout: {e}")))?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "checkout of '{}' in {} failed: {}",
                reference,
                dir.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn checkout_latest_release(&self, dir: &Path) -> Result<()> {
        let tag = {
            let dir: PathBuf = dir.to_path_buf();
            run_git(move || {
                let repo = Repository::open(&dir)?;
                let tags = repo.tag_names(None)?;
                Ok(latest_release_tag(tags.iter().flatten()))
            })
            .await?
        };
        match tag {
            Some(tag) => self.checkout(dir, &tag).await,
            None => Err(Error::Git(format!(
                "no semver release tags in {}",
                dir.display()
            ))),
        }
    }

    async fn head_commit_id(&self, dir: &Path) -> Result<String> {
        let dir = dir.to_path_buf();
        run_git(move || {
            let repo = Repository::open(&dir)?;
            let head = repo.head()?.peel_to_commit()?;
            Ok(head.id().to_string())
        })
        .await
    }
}

async fn run_git<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, git2::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::Git(format!("git task failed: {e}")))?
        .map_err(|e| Error::Git(e.message().to_string()))
}

/// The highest semver tag among `tags`, or `None` when none parse
///
/// A leading `v` is tolerated; the returned string is the tag exactly as it
/// appears in the repository so it can be passed back to checkout.
pub fn latest_release_tag<'a>(tags: impl Iterator<Item = &'a str>) -> Option<String> {
    tags.filter_map(|tag| {
        let bare = tag.strip_prefix('v').unwrap_or(tag);
        Version::parse(bare).ok().map(|version| (version, tag))
    })
    .max_by(|(a, _), (b, _)| a.cmp(b))
    .map(|(_, tag)| tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_release_tag_picks_highest_semver() {
        let tags = ["v1.0.0", "v2.1.3", "v2.0.0", "1.9.9"];
        assert_eq!(
            latest_release_tag(tags.iter().copied()),
            Some("v2.1.3".to_string())
        );
    }

    #[test]
    fn test_latest_release_tag_ignores_non_semver() {
        let tags = ["nightly", "v1.2.0", "release-candidate"];
        assert_eq!(
            latest_release_tag(tags.iter().copied()),
            Some("v1.2.0".to_string())
        );
    }

    #[test]
    fn test_latest_release_tag_orders_prereleases_before_release() {
        let tags = ["v2.0.0-rc.1", "v2.0.0", "v2.0.0-beta"];
        assert_eq!(
            latest_release_tag(tags.iter().copied()),
            Some("v2.0.0".to_string())
        );
    }

    #[test]
    fn test_latest_release_tag_none_when_no_semver_tags() {
        assert_eq!(latest_release_tag(["main", "wip"].iter().copied()), None);
    }

    #[test]
    fn test_latest_release_tag_preserves_tag_spelling() {
        // The checkout needs the literal tag, prefix included.
        let tags = ["v0.3.0", "0.2.0"];
        assert_eq!(
            latest_release_tag(tags.iter().copied()),
            Some("v0.3.0".to_string())
        );
    }
}
