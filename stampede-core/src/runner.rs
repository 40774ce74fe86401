//! Run orchestration: resolve, clone, test, report
//!
//! Clone/update and test execution are pipelined: a repo whose clone has
//! finished may start testing while other repos are still cloning, each
//! phase gated by its own rate limiter.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::RunnerOptions;
use crate::git::Vcs;
use crate::limiter::RateLimiter;
use crate::report::{render, write_rerun_script, Summary};
use crate::resolver::{resolve, RepoDirectory, RepoPatterns};
use crate::test_exec::{run_with_retry, TestOutcome, TestRunner, TestStatus};
use crate::workspace::{Workspace, WorkspaceEntry};
use crate::{Error, Result};

/// Ties the directory service, source control and test runner together for
/// one run
pub struct Runner {
    options: RunnerOptions,
    directory: Arc<dyn RepoDirectory>,
    vcs: Arc<dyn Vcs>,
    tests: Arc<dyn TestRunner>,
    scm_limiter: Arc<RateLimiter>,
    test_limiter: Arc<RateLimiter>,
}

impl Runner {
    pub fn new(
        options: RunnerOptions,
        directory: Arc<dyn RepoDirectory>,
        vcs: Arc<dyn Vcs>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        let scm_limiter = Arc::new(RateLimiter::new(options.scm_limit.0, options.scm_limit.1));
        let test_limiter = Arc::new(RateLimiter::new(options.test_limit.0, options.test_limit.1));
        Self {
            options,
            directory,
            vcs,
            tests,
            scm_limiter,
            test_limiter,
        }
    }

    /// Execute the whole pipeline and return the run summary
    ///
    /// The report is printed as a side effect; a rerun script is written
    /// when any suite failed.
    pub async fn run(&self) -> Result<Summary> {
        let patterns = RepoPatterns {
            require: self.options.require.clone(),
            test: self.options.test.clone(),
            exclude: self.options.exclude.clone(),
            skip: self.options.skip.clone(),
        };
        let workspace = resolve(
            &self.options.workspace_dir,
            &patterns,
            &self.directory,
            &self.scm_limiter,
        )
        .await?;
        info!(
            repos = workspace.repos.len(),
            root = %workspace.root.display(),
            "workspace resolved"
        );

        workspace.prepare_root(self.options.fresh)?;

        let outcomes = self.clone_and_test(&workspace).await?;
        print!("{}", render(&outcomes, self.options.verbose));

        let command = format!("wct {}", self.options.wct_flags.join(" "));
        if write_rerun_script(&self.options.rerun_script, &outcomes, &command)? {
            info!(path = %self.options.rerun_script.display(), "wrote rerun script for failures");
        }

        Ok(Summary::tally(&outcomes))
    }

    /// Clone or update every entry, chaining each test target straight into
    /// its suite
    ///
    /// A failing clone is fatal, but only after every sibling already in
    /// flight has finished; the first error observed is the one surfaced.
    async fn clone_and_test(&self, workspace: &Workspace) -> Result<Vec<TestOutcome>> {
        let mut tasks: JoinSet<Result<Option<TestOutcome>>> = JoinSet::new();
        for entry in workspace.repos.values() {
            let entry = entry.clone();
            let dir = workspace.entry_dir(&entry);
            let vcs = Arc::clone(&self.vcs);
            let tests = Arc::clone(&self.tests);
            let scm_limiter = Arc::clone(&self.scm_limiter);
            let test_limiter = Arc::clone(&self.test_limiter);
            let latest_release = self.options.latest_release;
            let wct_flags = self.options.wct_flags.clone();

            tasks.spawn(async move {
                clone_or_update(&*vcs, &scm_limiter, &entry, &dir, latest_release).await?;
                if !entry.test_target {
                    return Ok(None);
                }
                let attempt = test_limiter
                    .run(|| run_with_retry(&*tests, &entry.name, &dir, &wct_flags))
                    .await;
                match attempt {
                    Ok(outcome) => Ok(Some(outcome)),
                    // A runner that could not start fails this entry alone.
                    Err(Error::TestSpawn(msg)) => Ok(Some(TestOutcome {
                        name: entry.name.clone(),
                        dir,
                        status: TestStatus::Failed(msg),
                    })),
                    Err(e) => Err(e),
                }
            });
        }

        let mut outcomes = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| Error::Remote(format!("worker task failed: {e}")))? {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => warn!(error = %e, "additional failure during run"),
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        outcomes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(outcomes)
    }
}

/// Bring one entry's working copy up to date
///
/// An existing clone is fetched, a missing one cloned, both under the
/// source-control limiter. Checkout failures are tolerated: a ref that no
/// longer exists leaves the clone where it was, with a warning.
async fn clone_or_update(
    vcs: &dyn Vcs,
    limiter: &RateLimiter,
    entry: &WorkspaceEntry,
    dir: &Path,
    latest_release: bool,
) -> Result<()> {
    let metadata = entry
        .metadata
        .as_ref()
        .ok_or_else(|| Error::Remote(format!("no metadata resolved for {}", entry.name)))?;

    if vcs.is_cloned(dir).await {
        limiter.run(|| vcs.fetch(dir)).await?;
    } else {
        limiter.run(|| vcs.clone(&metadata.clone_url, dir)).await?;
    }

    let checkout_result = if latest_release {
        vcs.checkout_latest_release(dir).await
    } else {
        let reference = entry
            .repo_ref
            .checkout_ref
            .as_deref()
            .or(metadata.default_branch.as_deref())
            .unwrap_or("master");
        vcs.checkout(dir, reference).await
    };
    if let Err(e) = checkout_result {
        warn!(repo = %entry.name, error = %e, "checkout failed, leaving clone as-is");
    }

    match vcs.head_commit_id(dir).await {
        Ok(commit) => debug!(repo = %entry.name, %commit, "working copy ready"),
        Err(e) => debug!(repo = %entry.name, error = %e, "could not read HEAD"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_exec::{TestInvocation, TestStatus};
    use crate::workspace::RepoMetadata;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FakeDirectory {
        owners: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl RepoDirectory for FakeDirectory {
        async fn repo_names(&self, owner: &str) -> Result<Vec<String>> {
            self.owners
                .get(&owner.to_lowercase())
                .cloned()
                .ok_or_else(|| Error::OwnerNotFound(owner.to_string()))
        }

        async fn repo_info(&self, owner: &str, name: &str) -> Result<RepoMetadata> {
            Ok(RepoMetadata {
                name: name.to_string(),
                full_name: format!("{owner}/{name}"),
                clone_url: format!("https://github.test/{owner}/{name}.git"),
                default_branch: Some("master".to_string()),
            })
        }
    }

    /// Fabricates clones as directories with a `test/` subdirectory
    #[derive(Default)]
    struct FakeVcs {
        clones: AtomicUsize,
        fetches: AtomicUsize,
        checkouts: Mutex<Vec<String>>,
        fail_clone_of: Option<String>,
    }

    #[async_trait]
    impl Vcs for FakeVcs {
        async fn is_cloned(&self, dir: &Path) -> bool {
            dir.is_dir()
        }

        async fn clone(&self, url: &str, dir: &Path) -> Result<()> {
            if let Some(fail) = &self.fail_clone_of {
                if url.contains(fail.as_str()) {
                    return Err(Error::Git(format!("cannot clone {url}")));
                }
            }
            self.clones.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(dir.join("test"))?;
            Ok(())
        }

        async fn fetch(&self, _dir: &Path) -> Result<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn checkout(&self, _dir: &Path, reference: &str) -> Result<()> {
            self.checkouts.lock().unwrap().push(reference.to_string());
            Ok(())
        }

        async fn checkout_latest_release(&self, _dir: &Path) -> Result<()> {
            self.checkouts.lock().unwrap().push("latest-release".to_string());
            Ok(())
        }

        async fn head_commit_id(&self, _dir: &Path) -> Result<String> {
            Ok("deadbeef".to_string())
        }
    }

    struct FakeTests {
        fail: Vec<String>,
    }

    #[async_trait]
    impl TestRunner for FakeTests {
        async fn run(&self, cwd: &Path, _flags: &[String]) -> Result<TestInvocation> {
            let name = cwd.file_name().unwrap().to_string_lossy().to_string();
            if self.fail.contains(&name) {
                Ok(TestInvocation {
                    succeeded: false,
                    output: format!("{name} is broken"),
                })
            } else {
                Ok(TestInvocation {
                    succeeded: true,
                    output: String::new(),
                })
            }
        }
    }

    fn options(root: &Path) -> RunnerOptions {
        RunnerOptions {
            require: vec!["acme/*".to_string()],
            test: vec!["acme/iron-list".to_string()],
            workspace_dir: root.join("repos"),
            rerun_script: root.join("rerun.sh"),
            scm_limit: (8, Duration::ZERO),
            test_limit: (1, Duration::ZERO),
            ..Default::default()
        }
    }

    fn directory() -> Arc<dyn RepoDirectory> {
        Arc::new(FakeDirectory {
            owners: [(
                "acme".to_string(),
                vec!["iron-list".to_string(), "paper-button".to_string()],
            )]
            .into(),
        })
    }

    #[tokio::test]
    async fn test_pipeline_clones_everything_and_tests_targets() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::default());
        let runner = Runner::new(
            options(temp.path()),
            directory(),
            vcs.clone(),
            Arc::new(FakeTests { fail: vec![] }),
        );

        let summary = runner.run().await.unwrap();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(vcs.clones.load(Ordering::SeqCst), 2);
        assert!(temp.path().join("repos/iron-list/test").is_dir());
        assert!(temp.path().join("repos/paper-button/test").is_dir());
        assert!(!temp.path().join("rerun.sh").exists());
    }

    #[tokio::test]
    async fn test_existing_clones_are_fetched_not_recloned() {
        let temp = TempDir::new().unwrap();
        let opts = options(temp.path());
        std::fs::create_dir_all(opts.workspace_dir.join("iron-list/test")).unwrap();
        std::fs::create_dir_all(opts.workspace_dir.join("iron-list/src")).unwrap();

        let vcs = Arc::new(FakeVcs::default());
        let runner = Runner::new(
            opts,
            directory(),
            vcs.clone(),
            Arc::new(FakeTests { fail: vec![] }),
        );
        runner.run().await.unwrap();

        assert_eq!(vcs.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(vcs.clones.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_suite_writes_rerun_script() {
        let temp = TempDir::new().unwrap();
        let runner = Runner::new(
            options(temp.path()),
            directory(),
            Arc::new(FakeVcs::default()),
            Arc::new(FakeTests {
                fail: vec!["iron-list".to_string()],
            }),
        );

        let summary = runner.run().await.unwrap();
        assert_eq!(summary.failed, 1);

        let script = std::fs::read_to_string(temp.path().join("rerun.sh")).unwrap();
        assert!(script.contains("iron-list"));
        assert!(script.contains("wct -b chrome"));
    }

    #[tokio::test]
    async fn test_clone_failure_is_fatal_after_siblings_finish() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs {
            fail_clone_of: Some("paper-button".to_string()),
            ..Default::default()
        });
        let runner = Runner::new(
            options(temp.path()),
            directory(),
            vcs.clone(),
            Arc::new(FakeTests { fail: vec![] }),
        );

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, Error::Git(_)));
        // The sibling clone still completed.
        assert_eq!(vcs.clones.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_latest_release_checkout_is_used_for_every_entry() {
        let temp = TempDir::new().unwrap();
        let opts = RunnerOptions {
            latest_release: true,
            ..options(temp.path())
        };
        let vcs = Arc::new(FakeVcs::default());
        let runner = Runner::new(
            opts,
            directory(),
            vcs.clone(),
            Arc::new(FakeTests { fail: vec![] }),
        );
        runner.run().await.unwrap();

        let checkouts = vcs.checkouts.lock().unwrap();
        assert_eq!(checkouts.len(), 2);
        assert!(checkouts.iter().all(|c| c == "latest-release"));
    }

    #[tokio::test]
    async fn test_requested_ref_wins_over_default_branch() {
        let temp = TempDir::new().unwrap();
        let opts = RunnerOptions {
            require: vec!["acme/iron-list#2.0-preview".to_string()],
            test: vec![],
            ..options(temp.path())
        };
        let vcs = Arc::new(FakeVcs::default());
        let runner = Runner::new(
            opts,
            directory(),
            vcs.clone(),
            Arc::new(FakeTests { fail: vec![] }),
        );
        runner.run().await.unwrap();

        let checkouts = vcs.checkouts.lock().unwrap();
        assert_eq!(checkouts.as_slice(), ["2.0-preview"]);
    }

    #[tokio::test]
    async fn test_skipped_repo_counts_in_summary() {
        let temp = TempDir::new().unwrap();

        /// Clones without creating a test/ directory
        struct TestlessVcs;
        #[async_trait]
        impl Vcs for TestlessVcs {
            async fn is_cloned(&self, dir: &Path) -> bool {
                dir.is_dir()
            }
            async fn clone(&self, _url: &str, dir: &Path) -> Result<()> {
                std::fs::create_dir_all(dir)?;
                Ok(())
            }
            async fn fetch(&self, _dir: &Path) -> Result<()> {
                Ok(())
            }
            async fn checkout(&self, _dir: &Path, _reference: &str) -> Result<()> {
                Ok(())
            }
            async fn checkout_latest_release(&self, _dir: &Path) -> Result<()> {
                Ok(())
            }
            async fn head_commit_id(&self, _dir: &Path) -> Result<String> {
                Ok("deadbeef".to_string())
            }
        }

        let runner = Runner::new(
            options(temp.path()),
            directory(),
            Arc::new(TestlessVcs),
            Arc::new(FakeTests { fail: vec![] }),
        );
        let summary = runner.run().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_options_default_rerun_script_is_relative() {
        assert_eq!(RunnerOptions::default().rerun_script, PathBuf::from("rerun.sh"));
    }
}
