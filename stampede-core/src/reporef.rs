//! Repository reference parsing, serialization and wildcard matching

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::{Error, Result};

/// A GitHub repository plus an optional branch/tag/SHA to check out
///
/// Parsed from `owner/repo[#ref]`. When used as a pattern the repo name may
/// contain `*` wildcards; a concrete ref never does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    /// The org or user owning the repo on GitHub
    pub owner: String,

    /// The name of the repo on GitHub
    pub name: String,

    /// The branch name or SHA to check out in the clone, when requested
    pub checkout_ref: Option<String>,
}

impl RepoRef {
    /// Create a reference from its parts
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        checkout_ref: Option<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            checkout_ref,
        }
    }

    /// Whether the repo name contains a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.name.contains('*')
    }

    /// A concrete ref with this pattern's owner and checkout ref
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            owner: self.owner.clone(),
            name: name.to_string(),
            checkout_ref: self.checkout_ref.clone(),
        }
    }

    /// Whether this ref, treated as a pattern, matches the candidate
    ///
    /// Owner comparison is exact but case-insensitive; repo name comparison
    /// honors `*` wildcards. Checkout refs are not compared: exclude and
    /// skip filters match on owner+repo only.
    pub fn matches(&self, candidate: &RepoRef) -> bool {
        self.owner.eq_ignore_ascii_case(&candidate.owner)
            && wildcard_pattern(&self.name).is_match(&candidate.name)
    }
}

impl FromStr for RepoRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut hash_split = s.split('#');
        let repo_part = hash_split.next().unwrap_or_default();
        let checkout_ref = hash_split.next();
        if hash_split.next().is_some() {
            return Err(Error::MalformedRepoRef(s.to_string()));
        }

        let slash_split: Vec<&str> = repo_part.split('/').collect();
        if slash_split.len() != 2 || slash_split[0].is_empty() || slash_split[1].is_empty() {
            return Err(Error::MalformedRepoRef(s.to_string()));
        }

        Ok(Self {
            owner: slash_split[0].to_string(),
            name: slash_split[1].to_string(),
            // A bare trailing '#' means no checkout ref was requested.
            checkout_ref: checkout_ref.filter(|r| !r.is_empty()).map(str::to_string),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.checkout_ref {
            Some(checkout_ref) => write!(f, "{}/{}#{}", self.owner, self.name, checkout_ref),
            None => write!(f, "{}/{}", self.owner, self.name),
        }
    }
}

/// Compile a repo-name wildcard into an anchored, case-insensitive regex
///
/// Literal parts are escaped so regex metacharacters in repo names match
/// themselves; each `*` matches any substring.
pub fn wildcard_pattern(name: &str) -> Regex {
    let parts: Vec<String> = name.split('*').map(|part| regex::escape(part)).collect();
    let source = format!("(?i)^{}$", parts.join(".*"));
    Regex::new(&source).expect("escaped wildcard pattern is always a valid regex")
}
