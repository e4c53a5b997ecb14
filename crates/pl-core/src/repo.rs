//! Shell-out git plumbing for the mutating half of the loop.
//!
//! Reads go through libgit2 (see [`crate::git2_ops`]); anything that
//! mutates the repository or talks to a remote runs the `git` binary, so
//! credential helpers, hooks and transport config behave exactly as they
//! do for a human operator.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("git {op} failed: {detail}")]
    GitCommand { op: String, detail: String },

    #[error("not a git repository: {0}")]
    NotARepo(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git job failed: {0}")]
    JobFailed(String),
}

pub type Result<T> = std::result::Result<T, RepoError>;

// ---------------------------------------------------------------------------
// RepoPath
// ---------------------------------------------------------------------------

/// A repository's two fundamental paths: the `.git` directory and the
/// working tree. Kept separate so worktree checkouts (common on CI
/// runners) resolve correctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoPath {
    gitdir: PathBuf,
    workdir: PathBuf,
}

impl RepoPath {
    /// Create a RepoPath from a working directory, auto-discovering the
    /// gitdir.
    pub fn from_workdir(workdir: impl Into<PathBuf>) -> Result<Self> {
        let workdir = workdir.into();
        if !workdir.exists() {
            return Err(RepoError::PathNotFound(workdir.display().to_string()));
        }
        let gitdir = discover_gitdir(&workdir)?;
        Ok(Self { gitdir, workdir })
    }

    /// Create a RepoPath with explicit gitdir and workdir.
    pub fn new(gitdir: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            gitdir: gitdir.into(),
            workdir: workdir.into(),
        }
    }

    pub fn gitdir(&self) -> &Path {
        &self.gitdir
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

impl std::fmt::Display for RepoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.workdir.display())
    }
}

/// Discover the gitdir for a working directory: libgit2 first (no process
/// spawn), `git rev-parse --git-dir` as the fallback.
fn discover_gitdir(workdir: &Path) -> Result<PathBuf> {
    if let Ok(path) = crate::git2_ops::Git2ReadOps::discover_gitdir(workdir) {
        return Ok(path);
    }

    let output = std::process::Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(workdir)
        .output()?;

    if !output.status.success() {
        return Err(RepoError::NotARepo(workdir.display().to_string()));
    }

    let gitdir_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let gitdir = Path::new(&gitdir_str);

    // git rev-parse may return a relative path
    if gitdir.is_absolute() {
        Ok(gitdir.to_path_buf())
    } else {
        Ok(workdir.join(gitdir))
    }
}

// ---------------------------------------------------------------------------
// AsyncGitJob
// ---------------------------------------------------------------------------

/// Status of an async git operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitJobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Result of a completed git operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitJobResult {
    pub status: GitJobStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl GitJobResult {
    pub fn success(&self) -> bool {
        self.status == GitJobStatus::Completed && self.exit_code == Some(0)
    }

    /// Trimmed stdout on success, a [`RepoError::GitCommand`] carrying the
    /// command's stderr otherwise.
    pub fn require_success(self, op: &str) -> Result<String> {
        if self.success() {
            Ok(self.stdout.trim().to_string())
        } else {
            let detail = if self.stderr.trim().is_empty() {
                format!("exit code {:?}", self.exit_code)
            } else {
                self.stderr.trim().to_string()
            };
            Err(RepoError::GitCommand {
                op: op.to_string(),
                detail,
            })
        }
    }
}

/// One git command running in the background via `tokio::spawn`. The loop
/// awaits these sequentially, but the job abstraction keeps command
/// execution, timing and logging in one place.
pub struct AsyncGitJob {
    pub id: uuid::Uuid,
    pub description: String,
    pub status: GitJobStatus,
    handle: Option<tokio::task::JoinHandle<Result<GitJobResult>>>,
}

impl AsyncGitJob {
    /// Spawn a new async git command.
    pub fn spawn(repo: &RepoPath, args: Vec<String>, description: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4();
        let desc = description.into();
        let workdir = repo.workdir().to_path_buf();
        let gitdir = repo.gitdir().to_path_buf();
        let log_desc = desc.clone();

        let handle = tokio::spawn(async move {
            let start = std::time::Instant::now();

            let output = tokio::process::Command::new("git")
                .args(&args)
                .current_dir(&workdir)
                .env("GIT_DIR", &gitdir)
                .output()
                .await
                .map_err(RepoError::Io)?;

            let duration_ms = start.elapsed().as_millis() as u64;
            let status = if output.status.success() {
                GitJobStatus::Completed
            } else {
                GitJobStatus::Failed
            };
            tracing::debug!(
                job = %id,
                op = %log_desc,
                exit = ?output.status.code(),
                duration_ms,
                "git command finished"
            );

            Ok(GitJobResult {
                status,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
                duration_ms,
            })
        });

        Self {
            id,
            description: desc,
            status: GitJobStatus::Running,
            handle: Some(handle),
        }
    }

    /// Wait for the job to complete and return its result.
    pub async fn wait(mut self) -> Result<GitJobResult> {
        match self.handle.take() {
            Some(handle) => {
                let result = handle
                    .await
                    .map_err(|e| RepoError::JobFailed(e.to_string()))??;
                Ok(result)
            }
            None => Err(RepoError::JobFailed("job already consumed".to_string())),
        }
    }

    /// Abort the underlying command.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.status = GitJobStatus::Cancelled;
        }
    }
}

// ---------------------------------------------------------------------------
// Git operations used by the generation cycle
// ---------------------------------------------------------------------------

/// The git commands a generation cycle needs: branch management, staging,
/// commit and push. Each returns a job to await.
pub struct AsyncGitOps;

impl AsyncGitOps {
    pub fn current_branch(repo: &RepoPath) -> AsyncGitJob {
        AsyncGitJob::spawn(
            repo,
            vec!["rev-parse".into(), "--abbrev-ref".into(), "HEAD".into()],
            "get current branch",
        )
    }

    /// Full sha of HEAD.
    pub fn head_sha(repo: &RepoPath) -> AsyncGitJob {
        AsyncGitJob::spawn(
            repo,
            vec!["rev-parse".into(), "HEAD".into()],
            "resolve HEAD",
        )
    }

    pub fn fetch(repo: &RepoPath, remote: &str) -> AsyncGitJob {
        AsyncGitJob::spawn(
            repo,
            vec!["fetch".into(), remote.into()],
            format!("git fetch {}", remote),
        )
    }

    pub fn checkout(repo: &RepoPath, branch: &str) -> AsyncGitJob {
        AsyncGitJob::spawn(
            repo,
            vec!["checkout".into(), branch.into()],
            format!("git checkout {}", branch),
        )
    }

    /// Create `branch` at `start_point` and switch to it.
    pub fn create_branch(repo: &RepoPath, branch: &str, start_point: &str) -> AsyncGitJob {
        AsyncGitJob::spawn(
            repo,
            vec![
                "checkout".into(),
                "-b".into(),
                branch.into(),
                start_point.into(),
            ],
            format!("git checkout -b {}", branch),
        )
    }

    /// Stage everything, including deletions and new files.
    pub fn add_all(repo: &RepoPath) -> AsyncGitJob {
        AsyncGitJob::spawn(repo, vec!["add".into(), "-A".into()], "git add -A")
    }

    pub fn commit(repo: &RepoPath, message: &str) -> AsyncGitJob {
        AsyncGitJob::spawn(
            repo,
            vec!["commit".into(), "-m".into(), message.into()],
            "git commit",
        )
    }

    /// Push `branch`, creating the upstream on first push.
    pub fn push(repo: &RepoPath, remote: &str, branch: &str) -> AsyncGitJob {
        AsyncGitJob::spawn(
            repo,
            vec!["push".into(), "-u".into(), remote.into(), branch.into()],
            format!("git push {} {}", remote, branch),
        )
    }
}

// ---------------------------------------------------------------------------
// DiffEntry: structured working-tree status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub status: DiffStatus,
    pub additions: u32,
    pub deletions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_path_accessors_and_display() {
        let rp = RepoPath::new("/repo/.git", "/repo");
        assert_eq!(rp.gitdir(), Path::new("/repo/.git"));
        assert_eq!(rp.workdir(), Path::new("/repo"));
        assert_eq!(rp.to_string(), "/repo");
    }

    #[test]
    fn repo_path_serialize() {
        let rp = RepoPath::new("/repo/.git", "/repo");
        let json = serde_json::to_string(&rp).unwrap();
        let back: RepoPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rp);
    }

    #[test]
    fn from_workdir_rejects_missing_path() {
        let err = RepoPath::from_workdir("/definitely/not/a/path").unwrap_err();
        assert!(matches!(err, RepoError::PathNotFound(_)));
    }

    #[test]
    fn from_workdir_rejects_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RepoPath::from_workdir(dir.path()).is_err());
    }

    #[test]
    fn from_workdir_discovers_gitdir() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let rp = RepoPath::from_workdir(dir.path()).unwrap();
        assert!(rp.gitdir().ends_with(".git"));
    }

    #[test]
    fn git_job_result_success_check() {
        let result = GitJobResult {
            status: GitJobStatus::Completed,
            stdout: "ok".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 100,
        };
        assert!(result.success());

        let failed = GitJobResult {
            status: GitJobStatus::Failed,
            stdout: String::new(),
            stderr: "error".to_string(),
            exit_code: Some(1),
            duration_ms: 50,
        };
        assert!(!failed.success());
    }

    #[test]
    fn require_success_returns_trimmed_stdout() {
        let result = GitJobResult {
            status: GitJobStatus::Completed,
            stdout: "main\n".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 5,
        };
        assert_eq!(result.require_success("branch").unwrap(), "main");
    }

    #[test]
    fn require_success_carries_stderr_into_error() {
        let result = GitJobResult {
            status: GitJobStatus::Failed,
            stdout: String::new(),
            stderr: "fatal: pathspec 'nope' did not match\n".to_string(),
            exit_code: Some(1),
            duration_ms: 5,
        };
        let err = result.require_success("checkout").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("checkout"));
        assert!(msg.contains("pathspec"));
    }

    #[test]
    fn git_job_status_serialize() {
        let json = serde_json::to_string(&GitJobStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[tokio::test]
    async fn async_git_job_cancel() {
        let rp = RepoPath::new("/tmp/.git", "/tmp");
        let mut job = AsyncGitJob::spawn(&rp, vec!["version".into()], "test cancel");
        job.cancel();
        assert_eq!(job.status, GitJobStatus::Cancelled);
    }
}
