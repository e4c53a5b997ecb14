//! Read-side git operations backed by libgit2.
//!
//! The split is deliberate: reads go through libgit2 in-process (fast, no
//! subprocess, works without a `git` binary), while writes shell out (see
//! [`crate::repo`]) so hooks and credential helpers still apply.

use std::path::{Path, PathBuf};

use crate::repo::{DiffEntry, DiffStatus, RepoError, Result};

impl From<git2::Error> for RepoError {
    fn from(e: git2::Error) -> Self {
        RepoError::GitCommand {
            op: "libgit2".to_string(),
            detail: e.message().to_string(),
        }
    }
}

/// Stateless read operations. Every call opens the repository fresh;
/// libgit2 repository handles are cheap and not `Send`, so holding one
/// across awaits is not worth the trouble.
pub struct Git2ReadOps;

impl Git2ReadOps {
    /// Discover the `.git` directory for any path inside a repository.
    pub fn discover_gitdir(path: &Path) -> Result<PathBuf> {
        let repo = git2::Repository::discover(path)?;
        Ok(repo.path().to_path_buf())
    }

    fn open(workdir: &Path) -> Result<git2::Repository> {
        git2::Repository::discover(workdir)
            .map_err(|_| RepoError::NotARepo(workdir.display().to_string()))
    }

    /// Current branch name, or a short sha when HEAD is detached.
    pub fn current_branch(workdir: &Path) -> Result<String> {
        let repo = Self::open(workdir)?;
        let head = repo.head()?;
        if head.is_branch() {
            Ok(head.shorthand().unwrap_or("HEAD").to_string())
        } else {
            let oid = head.target().ok_or_else(|| RepoError::GitCommand {
                op: "head".to_string(),
                detail: "HEAD has no target".to_string(),
            })?;
            Ok(format!("{:.7}", oid))
        }
    }

    /// Full hex sha of HEAD.
    pub fn head_sha(workdir: &Path) -> Result<String> {
        let repo = Self::open(workdir)?;
        let oid = repo
            .head()?
            .target()
            .ok_or_else(|| RepoError::GitCommand {
                op: "head".to_string(),
                detail: "HEAD has no target".to_string(),
            })?;
        Ok(oid.to_string())
    }

    /// True when neither the index nor the working tree has changes.
    /// Untracked files count as dirty: a generation cycle must start from
    /// a tree that exactly matches a commit.
    pub fn is_clean(workdir: &Path) -> Result<bool> {
        Ok(Self::status(workdir)?.is_empty())
    }

    /// Working-tree status, untracked files included.
    pub fn status(workdir: &Path) -> Result<Vec<DiffEntry>> {
        let repo = Self::open(workdir)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut opts))?;

        let entries = statuses
            .iter()
            .filter_map(|entry| {
                let path = entry.path()?.to_string();
                let status = map_status(entry.status())?;
                Some(DiffEntry {
                    path,
                    status,
                    additions: 0,
                    deletions: 0,
                })
            })
            .collect();
        Ok(entries)
    }

    /// Paths of all files in the index, sorted. This is the candidate set
    /// for the file-selection pre-pass.
    pub fn tracked_files(workdir: &Path) -> Result<Vec<String>> {
        let repo = Self::open(workdir)?;
        let index = repo.index()?;
        let mut paths: Vec<String> = index
            .iter()
            .map(|entry| String::from_utf8_lossy(&entry.path).to_string())
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

// ---- internal helpers ----

fn map_status(status: git2::Status) -> Option<DiffStatus> {
    if status.contains(git2::Status::WT_NEW) {
        Some(DiffStatus::Untracked)
    } else if status.contains(git2::Status::INDEX_NEW) {
        Some(DiffStatus::Added)
    } else if status.contains(git2::Status::WT_DELETED) || status.contains(git2::Status::INDEX_DELETED)
    {
        Some(DiffStatus::Deleted)
    } else if status.contains(git2::Status::WT_RENAMED) || status.contains(git2::Status::INDEX_RENAMED)
    {
        Some(DiffStatus::Renamed)
    } else if status.contains(git2::Status::WT_MODIFIED)
        || status.contains(git2::Status::INDEX_MODIFIED)
        || status.contains(git2::Status::WT_TYPECHANGE)
        || status.contains(git2::Status::INDEX_TYPECHANGE)
    {
        Some(DiffStatus::Modified)
    } else {
        // IGNORED and CURRENT carry no signal for the loop
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) -> git2::Repository {
        let repo = git2::Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "tester").unwrap();
        config.set_str("user.email", "tester@example.invalid").unwrap();
        repo
    }

    fn commit_all(repo: &git2::Repository, message: &str) -> git2::Oid {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        let parent = repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .map(|oid| repo.find_commit(oid).unwrap());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    #[test]
    fn discover_gitdir_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let sub = dir.path().join("src");
        std::fs::create_dir(&sub).unwrap();
        let gitdir = Git2ReadOps::discover_gitdir(&sub).unwrap();
        assert!(gitdir.ends_with(".git") || gitdir.ends_with(".git/"));
    }

    #[test]
    fn head_sha_matches_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        let oid = commit_all(&repo, "initial");
        let sha = Git2ReadOps::head_sha(dir.path()).unwrap();
        assert_eq!(sha, oid.to_string());
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn current_branch_on_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        commit_all(&repo, "initial");
        let branch = Git2ReadOps::current_branch(dir.path()).unwrap();
        assert!(!branch.is_empty());
    }

    #[test]
    fn clean_tree_detection() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        commit_all(&repo, "initial");
        assert!(Git2ReadOps::is_clean(dir.path()).unwrap());

        std::fs::write(dir.path().join("b.txt"), "untracked\n").unwrap();
        assert!(!Git2ReadOps::is_clean(dir.path()).unwrap());
    }

    #[test]
    fn status_classifies_changes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        commit_all(&repo, "initial");

        std::fs::write(dir.path().join("a.txt"), "changed\n").unwrap();
        std::fs::write(dir.path().join("new.txt"), "fresh\n").unwrap();

        let entries = Git2ReadOps::status(dir.path()).unwrap();
        let modified = entries.iter().find(|e| e.path == "a.txt").unwrap();
        assert_eq!(modified.status, DiffStatus::Modified);
        let untracked = entries.iter().find(|e| e.path == "new.txt").unwrap();
        assert_eq!(untracked.status, DiffStatus::Untracked);
    }

    #[test]
    fn tracked_files_lists_index_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("z.txt"), "z\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        commit_all(&repo, "initial");

        let files = Git2ReadOps::tracked_files(dir.path()).unwrap();
        assert_eq!(files, vec!["a.txt".to_string(), "z.txt".to_string()]);
    }

    #[test]
    fn open_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Git2ReadOps::head_sha(dir.path()).is_err());
    }
}
