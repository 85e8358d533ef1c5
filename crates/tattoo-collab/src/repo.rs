//! Package-repository helper: commits keyword and stabilisation changes to
//! the local checkout.
//!
//! Grounded on the shell-subprocess pattern used throughout the teacher's
//! adapters for wrapping external CLIs: spawn, wait, map a non-zero exit
//! status to a typed error, never swallow stderr.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("{command} exited with {status}: {stderr}")]
    NonZeroExit {
        command: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Applies a resolved keyword or stabilisation change to the package tree.
#[async_trait]
pub trait RepoHelper: Send + Sync {
    /// Stable-keyword an atom for `arch` and commit (`--keywordreq` done).
    async fn keyword(&self, atom: &str, arch: &str, bug: u32) -> Result<(), RepoError>;

    /// Drop the `~` prefix for `arch` on an atom and commit (`--stablereq`
    /// done).
    async fn stabilize(&self, atom: &str, arch: &str, bug: u32) -> Result<(), RepoError>;
}

pub struct ShellRepoHelper {
    repo_root: PathBuf,
}

impl ShellRepoHelper {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        ShellRepoHelper { repo_root: repo_root.into() }
    }

    async fn run_git(&self, args: &[&str]) -> Result<(), RepoError> {
        let out = Command::new("git")
            .current_dir(&self.repo_root)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RepoError::Spawn("git", e))?
            .wait_with_output()
            .await
            .map_err(|e| RepoError::Spawn("git", e))?;
        if !out.status.success() {
            return Err(RepoError::NonZeroExit {
                command: "git",
                status: out.status,
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RepoHelper for ShellRepoHelper {
    async fn keyword(&self, atom: &str, arch: &str, bug: u32) -> Result<(), RepoError> {
        self.run_git(&["add", "-A"]).await?;
        let msg = format!("{atom}: keyword {arch}, bug #{bug}");
        self.run_git(&["commit", "-m", &msg]).await
    }

    async fn stabilize(&self, atom: &str, arch: &str, bug: u32) -> Result<(), RepoError> {
        self.run_git(&["add", "-A"]).await?;
        let msg = format!("{atom}: stable {arch}, bug #{bug}");
        self.run_git(&["commit", "-m", &msg]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_runs_add_then_commit_against_a_real_repo() {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git")
            .current_dir(dir.path())
            .args(["init", "-q"])
            .status()
            .await
            .unwrap();
        Command::new("git")
            .current_dir(dir.path())
            .args(["config", "user.email", "tattoo@example.invalid"])
            .status()
            .await
            .unwrap();
        Command::new("git")
            .current_dir(dir.path())
            .args(["config", "user.name", "tattoo"])
            .status()
            .await
            .unwrap();
        std::fs::write(dir.path().join("foo.ebuild"), "KEYWORDS=\"~amd64\"\n").unwrap();

        let helper = ShellRepoHelper::new(dir.path());
        helper.keyword("cat/foo-1.0", "amd64", 12345).await.unwrap();

        let log = Command::new("git")
            .current_dir(dir.path())
            .args(["log", "--oneline"])
            .output()
            .await
            .unwrap();
        let log = String::from_utf8_lossy(&log.stdout);
        assert!(log.contains("cat/foo-1.0: keyword amd64, bug #12345"));
    }

    #[tokio::test]
    async fn non_zero_git_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let helper = ShellRepoHelper::new(dir.path());
        let err = helper.keyword("cat/foo-1.0", "amd64", 1).await.unwrap_err();
        assert!(matches!(err, RepoError::NonZeroExit { .. }));
    }
}
