//! Test invocation with flake retries
//!
//! A repo without a `test/` directory is skipped outright. A failing suite
//! is retried a fixed number of times; only the last attempt's output is
//! reported.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Extra attempts granted to a failing suite before it counts as failed
pub const FLAKE_RETRIES: usize = 2;

/// Output of one test-runner invocation
#[derive(Debug, Clone)]
pub struct TestInvocation {
    /// Whether the runner exited zero
    pub succeeded: bool,
    /// Interleaved stdout and stderr of the run
    pub output: String,
}

/// Runs one repo's test suite in its working copy
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, cwd: &Path, flags: &[String]) -> Result<TestInvocation>;
}

/// [`TestRunner`] invoking the `wct` binary
#[derive(Debug, Default)]
pub struct WctRunner;

#[async_trait]
impl TestRunner for WctRunner {
    async fn run(&self, cwd: &Path, flags: &[String]) -> Result<TestInvocation> {
        let output = tokio::process::Command::new("wct")
            .args(flags)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::TestSpawn(format!("wct in {}: {e}", cwd.display())))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(TestInvocation {
            succeeded: output.status.success(),
            output: text,
        })
    }
}

/// Terminal state of one repo's test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    /// Failed after all retries; carries the final attempt's output
    Failed(String),
    /// The repo has no test suite
    Skipped,
}

/// One repo's test result, as reported at the end of a run
#[derive(Debug, Clone)]
pub struct TestOutcome {
    /// Workspace key of the repo
    pub name: String,
    /// Directory the suite ran in
    pub dir: PathBuf,
    pub status: TestStatus,
}

/// Run a repo's suite, retrying flakes
///
/// A spawn failure is a hard error with no retry, distinct from a test
/// failure. Absence of `dir/test` short-circuits to [`TestStatus::Skipped`]
/// without invoking the runner at all.
pub async fn run_with_retry(
    runner: &dyn TestRunner,
    name: &str,
    dir: &Path,
    flags: &[String],
) -> Result<TestOutcome> {
    if !dir.join("test").is_dir() {
        debug!(repo = name, "no test/ directory, skipping");
        return Ok(TestOutcome {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            status: TestStatus::Skipped,
        });
    }

    let mut last_output = String::new();
    for attempt in 0..=FLAKE_RETRIES {
        let invocation = runner.run(dir, flags).await?;
        if invocation.succeeded {
            return Ok(TestOutcome {
                name: name.to_string(),
                dir: dir.to_path_buf(),
                status: TestStatus::Passed,
            });
        }
        last_output = invocation.output;
        if attempt < FLAKE_RETRIES {
            warn!(repo = name, attempt = attempt + 1, "tests failed, retrying");
        }
    }

    Ok(TestOutcome {
        name: name.to_string(),
        dir: dir.to_path_buf(),
        status: TestStatus::Failed(last_output),
    })
}
