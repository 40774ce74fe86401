//! Run configuration: defaults, config file, and CLI merge
//!
//! Effective options are built by layering: built-in defaults, then the
//! JSON config file, then command-line values. List-valued options replace
//! rather than append.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{Error, Result};

/// Directory repos are cloned into when none is configured
pub const DEFAULT_WORKSPACE_DIR: &str = "repos";

/// Flags passed to the test runner when none are configured
pub const DEFAULT_WCT_FLAGS: &[&str] = &["-b", "chrome"];

/// Token file consulted when no other token source is set
pub const TOKEN_FILE: &str = "github-token";

const SCM_MAX_CONCURRENT: usize = 20;
const SCM_MIN_DELAY: Duration = Duration::from_millis(100);
const TEST_MAX_CONCURRENT: usize = 1;
const TEST_MIN_DELAY: Duration = Duration::from_millis(100);

/// Fully-resolved options for one run
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Repo expressions to make available in the workspace
    pub require: Vec<String>,
    /// Repo expressions to test
    pub test: Vec<String>,
    /// Patterns removing repos from the require set
    pub exclude: Vec<String>,
    /// Patterns removing repos from the test set
    pub skip: Vec<String>,
    /// Delete the whole workspace before cloning
    pub fresh: bool,
    /// Check out each repo's highest release tag instead of its ref
    pub latest_release: bool,
    /// Report skipped repos and per-suite output
    pub verbose: bool,
    /// Flags passed through to the test runner
    pub wct_flags: Vec<String>,
    /// Directory the clones live under
    pub workspace_dir: PathBuf,
    /// Where the failure rerun script is written
    pub rerun_script: PathBuf,
    /// Source-control limiter shape
    pub scm_limit: (usize, Duration),
    /// Test-invocation limiter shape
    pub test_limit: (usize, Duration),
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            require: Vec::new(),
            test: Vec::new(),
            exclude: Vec::new(),
            skip: Vec::new(),
            fresh: false,
            latest_release: false,
            verbose: false,
            wct_flags: DEFAULT_WCT_FLAGS.iter().map(|s| s.to_string()).collect(),
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            rerun_script: PathBuf::from("rerun.sh"),
            scm_limit: (SCM_MAX_CONCURRENT, SCM_MIN_DELAY),
            test_limit: (TEST_MAX_CONCURRENT, TEST_MIN_DELAY),
        }
    }
}

/// Options as read from the JSON config file
///
/// Every field is optional; absent fields fall through to the next layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    // Keys mirror the CLI flag names.
    #[serde(rename = "repo")]
    pub require: Option<Vec<String>>,
    pub test: Option<Vec<String>>,
    #[serde(rename = "exclude-repo")]
    pub exclude: Option<Vec<String>>,
    #[serde(rename = "skip-test")]
    pub skip: Option<Vec<String>>,
    pub fresh: Option<bool>,
    pub latest_release: Option<bool>,
    pub verbose: Option<bool>,
    pub wct_flags: Option<Vec<String>>,
    pub workspace_dir: Option<PathBuf>,
    pub github_token: Option<String>,
}

impl ConfigFile {
    /// Load the config file at `path`
    ///
    /// A missing file is an empty config; a file that exists but does not
    /// parse is a fatal configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))
    }
}

/// Option values given on the command line
///
/// `None` and empty lists mean the flag was not given.
#[derive(Debug, Clone, Default)]
pub struct CliValues {
    pub require: Vec<String>,
    pub test: Vec<String>,
    pub exclude: Vec<String>,
    pub skip: Vec<String>,
    pub fresh: bool,
    pub latest_release: bool,
    pub verbose: bool,
    pub wct_flags: Option<Vec<String>>,
    pub workspace_dir: Option<PathBuf>,
}

impl RunnerOptions {
    /// Layer command line over config file over defaults
    pub fn merge(cli: &CliValues, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let pick_list = |cli: &Vec<String>, file: &Option<Vec<String>>| {
            if !cli.is_empty() {
                cli.clone()
            } else {
                file.clone().unwrap_or_default()
            }
        };

        Self {
            require: pick_list(&cli.require, &file.require),
            test: pick_list(&cli.test, &file.test),
            exclude: pick_list(&cli.exclude, &file.exclude),
            skip: pick_list(&cli.skip, &file.skip),
            fresh: cli.fresh || file.fresh.unwrap_or(false),
            latest_release: cli.latest_release || file.latest_release.unwrap_or(false),
            verbose: cli.verbose || file.verbose.unwrap_or(false),
            wct_flags: cli
                .wct_flags
                .clone()
                .or_else(|| file.wct_flags.clone())
                .unwrap_or(defaults.wct_flags),
            workspace_dir: cli
                .workspace_dir
                .clone()
                .or_else(|| file.workspace_dir.clone())
                .unwrap_or(defaults.workspace_dir),
            rerun_script: defaults.rerun_script,
            scm_limit: defaults.scm_limit,
            test_limit: defaults.test_limit,
        }
    }
}

/// Resolve the GitHub token from flag, config file, environment, then the
/// `github-token` file
pub fn resolve_github_token(
    cli_token: Option<&str>,
    file: &ConfigFile,
) -> Result<Option<String>> {
    if let Some(token) = cli_token {
        return Ok(Some(token.to_string()));
    }
    if let Some(token) = &file.github_token {
        return Ok(Some(token.clone()));
    }
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        if !token.is_empty() {
            return Ok(Some(token));
        }
    }
    match std::fs::read_to_string(TOKEN_FILE) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(
                "no GitHub token configured; unauthenticated requests are heavily \
                 rate-limited. Create a token at https://github.com/settings/tokens \
                 and pass it with --github-token, GITHUB_TOKEN, or a '{TOKEN_FILE}' file"
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
