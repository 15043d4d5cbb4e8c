use anyhow::Context;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::Result;

/// Cache environment variables redirected into the workspace, paired with
/// their subdirectory under `<workspace>/cache`. Model downloads then live
/// inside the workspace and disappear with it.
const CACHE_ENV_VARS: &[(&str, &str)] = &[
    ("HF_HOME", "hf"),
    ("TRANSFORMERS_CACHE", "transformers"),
    ("XDG_CACHE_HOME", ""),
    ("PYANNOTE_CACHE", "pyannote"),
    ("TORCH_HOME", "torch"),
];

/// Ephemeral per-run directory holding the virtualenv, redirected model
/// caches and the intermediate audio file.
///
/// Exactly one workspace exists per run. It is removed on `close()`;
/// dropping an unclosed workspace removes it best-effort, so error paths and
/// interrupts do not leave directories behind unless preservation was
/// requested.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    keep: bool,
    cleaned: bool,
}

impl Workspace {
    /// Create a uniquely named workspace under `base_dir`.
    pub fn create(base_dir: &Path, timestamp_tag: &str, keep: bool) -> Result<Self> {
        let suffix = Uuid::new_v4().to_string()[..8].to_string();
        let root = base_dir.join(format!(".yt_diarizer_work_{timestamp_tag}_{suffix}"));

        fs_err::create_dir_all(&root).context("Failed to create workspace directory")?;
        fs_err::create_dir_all(root.join("cache")).context("Failed to create cache directory")?;

        tracing::debug!("Created workspace at {}", root.display());
        Ok(Self {
            root,
            keep,
            cleaned: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root.join("venv")
    }

    pub fn venv_bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir().join("Scripts")
        } else {
            self.venv_dir().join("bin")
        }
    }

    pub fn venv_python(&self) -> PathBuf {
        let name = if cfg!(windows) { "python.exe" } else { "python" };
        self.venv_bin_dir().join(name)
    }

    /// Cache redirection pairs for child processes. Variables already set in
    /// the ambient environment are left alone.
    pub fn cache_env(&self) -> Vec<(String, PathBuf)> {
        self.cache_env_with(|var| std::env::var_os(var).is_some())
    }

    fn cache_env_with(&self, ambient_has: impl Fn(&str) -> bool) -> Vec<(String, PathBuf)> {
        let cache_root = self.cache_root();
        CACHE_ENV_VARS
            .iter()
            .filter(|(var, _)| !ambient_has(var))
            .map(|(var, subdir)| {
                let path = if subdir.is_empty() {
                    cache_root.clone()
                } else {
                    cache_root.join(subdir)
                };
                (var.to_string(), path)
            })
            .collect()
    }

    /// Keep the workspace on disk when the run ends (installation failures
    /// and `--keep-workspace` runs).
    pub fn preserve(&mut self) {
        self.keep = true;
    }

    /// Remove the workspace, or report its location when preservation was
    /// requested.
    pub fn close(mut self) -> Result<()> {
        self.cleaned = true;
        if self.keep {
            tracing::info!("Workspace preserved at {}", self.root.display());
            return Ok(());
        }

        tracing::debug!("Cleaning up workspace {}", self.root.display());
        fs_err::remove_dir_all(&self.root).context("Failed to remove workspace directory")?;
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.cleaned && !self.keep {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_removes_the_workspace() {
        let base = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(base.path(), "20240101_000000", false).unwrap();
        let root = workspace.root().to_path_buf();
        assert!(root.is_dir());

        workspace.close().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn drop_removes_an_unclosed_workspace() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let workspace = Workspace::create(base.path(), "20240101_000000", false).unwrap();
            workspace.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn preserved_workspace_survives_close() {
        let base = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(base.path(), "20240101_000000", false).unwrap();
        workspace.preserve();
        let root = workspace.root().to_path_buf();

        workspace.close().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn workspaces_with_the_same_tag_do_not_collide() {
        let base = tempfile::tempdir().unwrap();
        let first = Workspace::create(base.path(), "20240101_000000", false).unwrap();
        let second = Workspace::create(base.path(), "20240101_000000", false).unwrap();
        assert_ne!(first.root(), second.root());
    }

    #[test]
    fn cache_env_skips_variables_set_in_the_ambient_environment() {
        let base = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(base.path(), "20240101_000000", false).unwrap();

        let pairs = workspace.cache_env_with(|var| var == "HF_HOME");
        assert!(pairs.iter().all(|(var, _)| var != "HF_HOME"));
        assert!(pairs.iter().any(|(var, _)| var == "TORCH_HOME"));

        let xdg = pairs
            .iter()
            .find(|(var, _)| var == "XDG_CACHE_HOME")
            .unwrap();
        assert_eq!(xdg.1, workspace.cache_root());
    }
}
