//! The working-tree seam the Code Agent runs against.
//!
//! [`GitWorkspace`] is the real thing: git2 for reads, shelled-out git
//! for branch/commit/push. [`MockWorkspace`] records the write calls and
//! serves files from a plain directory, so agent and orchestrator tests
//! exercise the full patch pipeline without a git binary or a remote.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use pl_core::git2_ops::Git2ReadOps;
use pl_core::repo::{AsyncGitOps, RepoError, RepoPath, Result};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Workspace: Send + Sync {
    /// The working tree root patches are applied under.
    fn root(&self) -> &Path;

    async fn is_clean(&self) -> Result<bool>;

    /// Put the tree on `branch`. With `fresh` the branch is created from
    /// the remote's `base`; otherwise an existing branch is checked out.
    async fn prepare_branch(&self, branch: &str, base: &str, fresh: bool) -> Result<()>;

    async fn tracked_files(&self) -> Result<Vec<String>>;

    /// Read a tracked file, capped at `max_bytes`. `None` for missing,
    /// binary, or suspicious paths.
    async fn read_file(&self, rel_path: &str, max_bytes: usize) -> Result<Option<String>>;

    /// Stage everything and commit. Returns the new head sha.
    async fn commit_all(&self, message: &str) -> Result<String>;

    async fn push(&self, branch: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Git implementation
// ---------------------------------------------------------------------------

pub struct GitWorkspace {
    repo: RepoPath,
    remote: String,
}

impl GitWorkspace {
    pub fn new(repo: RepoPath) -> Self {
        Self {
            repo,
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    fn root(&self) -> &Path {
        self.repo.workdir()
    }

    async fn is_clean(&self) -> Result<bool> {
        Git2ReadOps::is_clean(self.repo.workdir())
    }

    async fn prepare_branch(&self, branch: &str, base: &str, fresh: bool) -> Result<()> {
        if fresh {
            AsyncGitOps::fetch(&self.repo, &self.remote)
                .wait()
                .await?
                .require_success("fetch")?;
            let start = format!("{}/{}", self.remote, base);
            let created = AsyncGitOps::create_branch(&self.repo, branch, &start)
                .wait()
                .await?;
            if !created.success() {
                // Left over from an earlier run; reuse it.
                AsyncGitOps::checkout(&self.repo, branch)
                    .wait()
                    .await?
                    .require_success("checkout")?;
            }
        } else {
            AsyncGitOps::checkout(&self.repo, branch)
                .wait()
                .await?
                .require_success("checkout")?;
        }
        Ok(())
    }

    async fn tracked_files(&self) -> Result<Vec<String>> {
        Git2ReadOps::tracked_files(self.repo.workdir())
    }

    async fn read_file(&self, rel_path: &str, max_bytes: usize) -> Result<Option<String>> {
        if !safe_rel_path(rel_path) {
            return Ok(None);
        }
        let full = self.repo.workdir().join(rel_path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(clip_text(&bytes, max_bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepoError::Io(e)),
        }
    }

    async fn commit_all(&self, message: &str) -> Result<String> {
        AsyncGitOps::add_all(&self.repo)
            .wait()
            .await?
            .require_success("add")?;
        AsyncGitOps::commit(&self.repo, message)
            .wait()
            .await?
            .require_success("commit")?;
        Git2ReadOps::head_sha(self.repo.workdir())
    }

    async fn push(&self, branch: &str) -> Result<()> {
        AsyncGitOps::push(&self.repo, &self.remote, branch)
            .wait()
            .await?
            .require_success("push")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock implementation
// ---------------------------------------------------------------------------

/// Serves a plain directory as the tree and records every write call.
pub struct MockWorkspace {
    root: PathBuf,
    clean: AtomicBool,
    prepared: Mutex<Vec<(String, String, bool)>>,
    commits: Mutex<Vec<String>>,
    pushes: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl MockWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clean: AtomicBool::new(true),
            prepared: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.clean.store(!dirty, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn prepared_branches(&self) -> Vec<(String, String, bool)> {
        self.prepared.lock().unwrap().clone()
    }
}

#[async_trait]
impl Workspace for MockWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn is_clean(&self) -> Result<bool> {
        Ok(self.clean.load(Ordering::SeqCst))
    }

    async fn prepare_branch(&self, branch: &str, base: &str, fresh: bool) -> Result<()> {
        self.prepared
            .lock()
            .unwrap()
            .push((branch.to_string(), base.to_string(), fresh));
        Ok(())
    }

    async fn tracked_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        walk(&self.root, &self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    async fn read_file(&self, rel_path: &str, max_bytes: usize) -> Result<Option<String>> {
        if !safe_rel_path(rel_path) {
            return Ok(None);
        }
        match tokio::fs::read(self.root.join(rel_path)).await {
            Ok(bytes) => Ok(clip_text(&bytes, max_bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepoError::Io(e)),
        }
    }

    async fn commit_all(&self, message: &str) -> Result<String> {
        self.commits.lock().unwrap().push(message.to_string());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{n:040x}"))
    }

    async fn push(&self, branch: &str) -> Result<()> {
        self.pushes.lock().unwrap().push(branch.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn safe_rel_path(rel: &str) -> bool {
    !rel.is_empty()
        && !rel.starts_with('/')
        && !rel.contains('\\')
        && !rel.split('/').any(|part| part == "..")
}

/// Decode bytes as text, clipped to `max_bytes`. `None` for binary data.
fn clip_text(bytes: &[u8], max_bytes: usize) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }
    let clipped = if bytes.len() > max_bytes {
        &bytes[..max_bytes]
    } else {
        bytes
    };
    Some(String::from_utf8_lossy(clipped).into_owned())
}

fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name() == ".git" {
            continue;
        }
        if path.is_dir() {
            walk(&path, root, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn mock_lists_files_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), "Cargo.toml", "[package]\n");
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main\n");

        let ws = MockWorkspace::new(dir.path());
        let files = ws.tracked_files().await.unwrap();
        assert_eq!(files, vec!["Cargo.toml", "src/main.rs"]);
    }

    #[tokio::test]
    async fn read_file_caps_and_guards() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.txt", &"x".repeat(100));

        let ws = MockWorkspace::new(dir.path());
        let text = ws.read_file("big.txt", 10).await.unwrap().unwrap();
        assert_eq!(text.len(), 10);

        assert_eq!(ws.read_file("../escape.txt", 10).await.unwrap(), None);
        assert_eq!(ws.read_file("/etc/hosts", 10).await.unwrap(), None);
        assert_eq!(ws.read_file("missing.txt", 10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn binary_files_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 159, 146, 150]).unwrap();

        let ws = MockWorkspace::new(dir.path());
        assert_eq!(ws.read_file("blob.bin", 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn mock_records_writes_and_fabricates_shas() {
        let dir = tempfile::tempdir().unwrap();
        let ws = MockWorkspace::new(dir.path());

        ws.prepare_branch("agent/issue-7", "main", true).await.unwrap();
        let sha = ws.commit_all("Add retry flag").await.unwrap();
        ws.push("agent/issue-7").await.unwrap();

        assert_eq!(sha.len(), 40);
        assert_eq!(ws.commits(), vec!["Add retry flag"]);
        assert_eq!(ws.pushes(), vec!["agent/issue-7"]);
        assert_eq!(
            ws.prepared_branches(),
            vec![("agent/issue-7".to_string(), "main".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn git_workspace_reads_through_git2() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        write(dir.path(), "src/lib.rs", "pub fn one() -> u32 { 1 }\n");

        let mut index = repo.index().unwrap();
        index
            .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@example.invalid").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        drop(tree);

        let ws = GitWorkspace::new(RepoPath::from_workdir(dir.path()).unwrap());
        assert!(ws.is_clean().await.unwrap());
        assert_eq!(ws.tracked_files().await.unwrap(), vec!["src/lib.rs"]);
        let content = ws.read_file("src/lib.rs", 4096).await.unwrap().unwrap();
        assert!(content.contains("pub fn one"));
    }
}
