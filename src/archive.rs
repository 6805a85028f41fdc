//! Access to the mirrored mailing-list archive.
//!
//! lore-style public-inbox mirrors are plain git repositories with one
//! commit per message; the raw message lives in the blob `m` of each
//! commit's tree. [`GitArchive`] shells out to `git` for clone/update,
//! commit listing, and blob reads, caching the clone in a directory keyed
//! by a hash of the remote URL. The [`ArchiveSource`] trait is the seam the
//! pipeline consumes, so tests can substitute an in-memory archive.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ArchiveConfig;

/// Supplies raw message content by opaque reference (the mirror commit
/// hash). Read failures surface per-record and are counted as malformed by
/// the caller, never aborting the run.
pub trait ArchiveSource {
    /// Refs of the most recent messages, newest first, optionally bounded
    /// by count and commit-date range (`YYYY-MM-DD`).
    fn list_refs(
        &self,
        limit: Option<usize>,
        since: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<String>>;

    /// The raw message text behind one ref.
    fn read_raw_message(&self, source_ref: &str) -> Result<String>;
}

/// A local clone of the mailing-list git mirror.
pub struct GitArchive {
    url: String,
    branch: String,
    shallow: bool,
    cache_dir: PathBuf,
}

impl GitArchive {
    pub fn new(config: &ArchiveConfig) -> Self {
        let cache_dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => Path::new(".lore-cache").join(short_hash(&config.url)),
        };
        GitArchive {
            url: config.url.clone(),
            branch: config.branch.clone(),
            shallow: config.shallow,
            cache_dir,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Clone the mirror if absent, otherwise fetch and hard-reset to the
    /// remote branch.
    pub fn sync(&self) -> Result<()> {
        if self.cache_dir.join(".git").exists() {
            self.update()
        } else {
            self.clone_mirror()
        }
    }

    fn clone_mirror(&self) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", self.cache_dir.display())
        })?;

        let mut cmd = Command::new("git");
        cmd.args(["clone", "--branch", &self.branch, "--single-branch"]);
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg(&self.url);
        cmd.arg(&self.cache_dir);

        let output = cmd
            .output()
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone failed: {}", stderr.trim());
        }
        Ok(())
    }

    fn update(&self) -> Result<()> {
        let output = Command::new("git")
            .args(["fetch", "origin", &self.branch])
            .current_dir(&self.cache_dir)
            .output()
            .with_context(|| "Failed to execute 'git fetch'")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git fetch failed: {}", stderr.trim());
        }

        let remote_ref = format!("origin/{}", self.branch);
        let output = Command::new("git")
            .args(["reset", "--hard", &remote_ref])
            .current_dir(&self.cache_dir)
            .output()
            .with_context(|| "Failed to execute 'git reset'")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git reset failed: {}", stderr.trim());
        }
        Ok(())
    }
}

impl ArchiveSource for GitArchive {
    fn list_refs(
        &self,
        limit: Option<usize>,
        since: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut cmd = Command::new("git");
        cmd.args(["log", "--format=%H"]);
        if let Some(n) = limit {
            cmd.arg(format!("-n{}", n));
        }
        if let Some(s) = since {
            cmd.arg(format!("--since={}", s));
        }
        if let Some(u) = until {
            cmd.arg(format!("--until={}", u));
        }
        cmd.arg(&self.branch);
        cmd.current_dir(&self.cache_dir);

        let output = cmd
            .output()
            .with_context(|| "Failed to execute 'git log'. Has the archive been synced?")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git log failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn read_raw_message(&self, source_ref: &str) -> Result<String> {
        // public-inbox stores the message in the blob 'm'.
        let output = Command::new("git")
            .args(["show", &format!("{}:m", source_ref)])
            .current_dir(&self.cache_dir)
            .output()
            .with_context(|| format!("Failed to read message blob for {}", source_ref))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        // Older mirror layouts keep the message as the commit body.
        let output = Command::new("git")
            .args(["log", "-1", "--format=%B", source_ref])
            .current_dir(&self.cache_dir)
            .output()
            .with_context(|| format!("Failed to read commit message for {}", source_ref))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("cannot read message for {}: {}", source_ref, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_dir_is_stable() {
        let config = ArchiveConfig {
            url: "https://lore.kernel.org/kvmarm/0".to_string(),
            branch: "master".to_string(),
            cache_dir: None,
            shallow: false,
        };
        let a = GitArchive::new(&config);
        let b = GitArchive::new(&config);
        assert_eq!(a.cache_dir(), b.cache_dir());
        assert!(a.cache_dir().starts_with(".lore-cache"));
    }

    #[test]
    fn test_explicit_cache_dir_wins() {
        let config = ArchiveConfig {
            url: "https://example.org/list/0".to_string(),
            branch: "master".to_string(),
            cache_dir: Some(PathBuf::from("/tmp/mirror")),
            shallow: true,
        };
        assert_eq!(GitArchive::new(&config).cache_dir(), Path::new("/tmp/mirror"));
    }
}
