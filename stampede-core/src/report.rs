//! End-of-run reporting and the failure rerun script

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::test_exec::{TestOutcome, TestStatus};
use crate::Result;

/// Pass/fail/skip counts for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn tally(outcomes: &[TestOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed(_) => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// Targets that actually ran, skips excluded
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }
}

/// Render the human-readable run report
///
/// One status line per outcome; captured failure output and skipped
/// entries appear only with `verbose`. Ends with the aggregate summary
/// line.
pub fn render(outcomes: &[TestOutcome], verbose: bool) -> String {
    let mut out = String::new();
    for outcome in outcomes {
        match &outcome.status {
            TestStatus::Passed => {
                let _ = writeln!(out, "Tests for: {} status: PASSED", outcome.name);
            }
            TestStatus::Failed(output) => {
                let _ = writeln!(out, "Tests for: {} status: FAILED", outcome.name);
                if verbose {
                    let _ = writeln!(out, "{}", output.trim_end());
                }
            }
            TestStatus::Skipped => {
                if verbose {
                    let _ = writeln!(out, "Tests for: {} status: SKIPPED", outcome.name);
                }
            }
        }
    }

    let summary = Summary::tally(outcomes);
    let _ = writeln!(
        out,
        "{} / {} tests passed. {} skipped.",
        summary.passed,
        summary.total(),
        summary.skipped
    );
    out
}

/// Write a shell script rerunning every failed suite, when any failed
///
/// The script changes into each failing repo's directory and reruns the
/// given command there. It is made executable by owner only. Nothing is
/// written on a fully green run.
pub fn write_rerun_script(
    path: &Path,
    outcomes: &[TestOutcome],
    command: &str,
) -> Result<bool> {
    let failed: Vec<&TestOutcome> = outcomes
        .iter()
        .filter(|o| matches!(o.status, TestStatus::Failed(_)))
        .collect();
    if failed.is_empty() {
        return Ok(false);
    }

    let mut script = String::from("#!/bin/bash\n");
    for outcome in failed {
        let _ = writeln!(script, "pushd {}", outcome.dir.display());
        let _ = writeln!(script, "{command}");
        let _ = writeln!(script, "popd");
    }
    fs::write(path, script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(true)
}
