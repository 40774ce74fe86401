//! GitHub directory service over octocrab
//!
//! Lists an owner's repositories (org first, user as fallback) and fetches
//! per-repo metadata, with a per-run in-memory cache. Listing an owner
//! warms the metadata cache so wildcard expansion costs one page walk
//! instead of one request per repo.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use stampede_core::{RepoDirectory, RepoMetadata};

use crate::error::{Error, Result};

const PAGE_SIZE: usize = 50;

#[derive(Serialize)]
struct PageParams {
    per_page: usize,
    page: usize,
}

/// A repository as GitHub's list and get endpoints return it
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Repository {
    name: String,
    full_name: String,
    clone_url: String,
    default_branch: Option<String>,
}

impl Repository {
    fn to_metadata(&self) -> RepoMetadata {
        RepoMetadata {
            name: self.name.clone(),
            full_name: self.full_name.clone(),
            clone_url: self.clone_url.clone(),
            default_branch: self.default_branch.clone(),
        }
    }
}

#[derive(Default)]
struct DirectoryCache {
    /// Owner (lowercased) to that owner's repo names
    names: HashMap<String, Vec<String>>,
    /// `owner/name` (lowercased) to resolved metadata
    metadata: HashMap<String, RepoMetadata>,
}

fn cache_key(owner: &str, name: &str) -> String {
    format!("{}/{}", owner.to_lowercase(), name.to_lowercase())
}

/// GitHub-backed [`RepoDirectory`]
pub struct GitHubClient {
    client: Octocrab,
    cache: Mutex<DirectoryCache>,
}

impl GitHubClient {
    /// Build a client, authenticated when a token is given
    pub fn new(token: Option<String>) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Auth(format!("could not build GitHub client: {e}")))?;
        Ok(Self {
            client,
            cache: Mutex::new(DirectoryCache::default()),
        })
    }

    /// Login of the authenticated user; validates the configured token
    pub async fn current_user(&self) -> Result<String> {
        let user = self
            .client
            .current()
            .user()
            .await
            .map_err(|e| Error::Auth(format!("token validation failed: {e}")))?;
        Ok(user.login)
    }

    /// Walk all pages of a repo-list route
    async fn list_pages(&self, route: &str) -> Result<Vec<Repository>> {
        let mut repos = Vec::new();
        let mut page = 1;
        loop {
            let params = PageParams {
                per_page: PAGE_SIZE,
                page,
            };
            let batch: Vec<Repository> = self.client.get(route, Some(&params)).await?;
            let short_page = batch.len() < PAGE_SIZE;
            repos.extend(batch);
            if short_page {
                return Ok(repos);
            }
            page += 1;
        }
    }

    /// List an owner's repos, trying org semantics first then user
    async fn fetch_owner_repos(&self, owner: &str) -> Result<Vec<Repository>> {
        match self.list_pages(&format!("/orgs/{owner}/repos")).await {
            Ok(repos) => Ok(repos),
            Err(e) if is_not_found(&e) => {
                debug!(owner, "not an organization, retrying as user");
                match self.list_pages(&format!("/users/{owner}/repos")).await {
                    Ok(repos) => Ok(repos),
                    Err(e) if is_not_found(&e) => Err(Error::OwnerNotFound(owner.to_string())),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// All repo names belonging to `owner`, cached per run
    pub async fn repo_names(&self, owner: &str) -> Result<Vec<String>> {
        let owner_key = owner.to_lowercase();
        if let Some(names) = self.cache.lock().await.names.get(&owner_key) {
            return Ok(names.clone());
        }

        let repos = self.fetch_owner_repos(owner).await?;
        info!(owner, count = repos.len(), "listed owner repositories");

        let mut cache = self.cache.lock().await;
        let mut names = Vec::new();
        for repo in repos {
            if !names.iter().any(|n: &String| n.eq_ignore_ascii_case(&repo.name)) {
                names.push(repo.name.clone());
            }
            cache
                .metadata
                .insert(cache_key(owner, &repo.name), repo.to_metadata());
        }
        cache.names.insert(owner_key, names.clone());
        Ok(names)
    }

    /// Metadata for one repo, cached per run
    ///
    /// A response whose `full_name` disagrees with the request means GitHub
    /// silently followed a rename redirect; that is surfaced as a hard
    /// error so the workspace never silently tracks a moved repo.
    pub async fn repo_info(&self, owner: &str, name: &str) -> Result<RepoMetadata> {
        let key = cache_key(owner, name);
        if let Some(info) = self.cache.lock().await.metadata.get(&key) {
            return Ok(info.clone());
        }

        let route = format!("/repos/{owner}/{name}");
        let repo: Repository = match self.client.get(&route, None::<&()>).await {
            Ok(repo) => repo,
            Err(e) if api_not_found(&e) => {
                return Err(Error::RepoNotFound(format!("{owner}/{name}")))
            }
            Err(e) => return Err(e.into()),
        };

        let requested = format!("{owner}/{name}");
        if moved(&requested, &repo.full_name) {
            return Err(Error::RepoMoved {
                requested,
                moved_to: repo.full_name,
            });
        }

        let info = repo.to_metadata();
        self.cache.lock().await.metadata.insert(key, info.clone());
        Ok(info)
    }
}

fn api_not_found(e: &octocrab::Error) -> bool {
    matches!(e, octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404)
}

fn is_not_found(e: &Error) -> bool {
    matches!(e, Error::Api(api) if api_not_found(api))
}

/// Whether the remote's `full_name` names a different repo than requested
fn moved(requested: &str, actual_full_name: &str) -> bool {
    !requested.eq_ignore_ascii_case(actual_full_name)
}

#[async_trait]
impl RepoDirectory for GitHubClient {
    async fn repo_names(&self, owner: &str) -> stampede_core::Result<Vec<String>> {
        Ok(GitHubClient::repo_names(self, owner).await?)
    }

    async fn repo_info(&self, owner: &str, name: &str) -> stampede_core::Result<RepoMetadata> {
        Ok(GitHubClient::repo_info(self, owner, name).await?)
    }
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient").finish_non_exhaustive()
    }
}
