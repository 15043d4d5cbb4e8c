use anyhow::Context;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::process::{run_logged, tail_snippet, which};
use crate::workspace::Workspace;
use crate::{DiarizerError, Result};

/// Pinned WhisperX stack. NumPy stays below 2.x and torch/torchaudio move in
/// lockstep; WhisperX 3.1.1 breaks against anything newer.
const PIN_NUMPY: &str = "1.26.4";
const PIN_TORCH: &str = "2.3.1";
const PIN_TORCHAUDIO: &str = "2.3.1";
const PIN_WHISPERX: &str = "3.1.1";
const PIN_YT_DLP: &str = "2024.11.18";

const TORCH_CPU_INDEX: &str = "https://download.pytorch.org/whl/cpu";

const SNIPPET_LINES: usize = 50;

/// A provisioned virtualenv inside the workspace.
#[derive(Debug, Clone)]
pub struct PythonEnv {
    bin_dir: PathBuf,
    python: PathBuf,
}

/// Create the workspace virtualenv and install the pinned WhisperX stack
/// into it.
pub async fn provision(workspace: &Workspace) -> Result<PythonEnv> {
    ensure_pkg_config()?;

    let system_python = which("python3").or_else(|| which("python")).ok_or_else(|| {
        DiarizerError::Dependency("python3 not found in PATH; install Python 3.9+".to_string())
    })?;

    let venv_dir = workspace.venv_dir();
    tracing::info!("Creating temporary virtualenv in {}", venv_dir.display());

    let mut create = Command::new(&system_python);
    create.args(["-m", "venv"]).arg(&venv_dir);
    let output = run_logged(create, "create virtualenv").await?;
    if !output.success {
        anyhow::bail!(
            "Failed to create virtualenv: exit code {}.\nLast output snippet:\n{}",
            exit_code_label(output.code),
            tail_snippet(&output.lines, SNIPPET_LINES)
        );
    }

    let env = PythonEnv {
        bin_dir: workspace.venv_bin_dir(),
        python: workspace.venv_python(),
    };
    if !env.python.is_file() {
        anyhow::bail!("Could not locate venv python at {}", env.python.display());
    }

    install_python_dependencies(&env, workspace).await?;
    Ok(env)
}

/// Install the pinned packages into the venv, preserving the original
/// install order: pip upgrade, NumPy pin, CPU torch wheels, then WhisperX +
/// yt-dlp under a torch constraint file.
async fn install_python_dependencies(env: &PythonEnv, workspace: &Workspace) -> Result<()> {
    tracing::info!("Installing Python dependencies (pinned WhisperX stack) inside venv");

    install_step(
        env.pip(["install", "--upgrade", "pip"]),
        "pip upgrade",
    )
    .await?;

    install_step(
        env.pip(["install", &format!("numpy=={PIN_NUMPY}")]),
        "install NumPy (below 2.x, required by the pinned torch stack)",
    )
    .await?;

    install_step(
        env.pip([
            "install",
            &format!("torch=={PIN_TORCH}"),
            &format!("torchaudio=={PIN_TORCHAUDIO}"),
            "--index-url",
            TORCH_CPU_INDEX,
        ]),
        "install PyTorch CPU wheels",
    )
    .await?;

    let mut constraint = tempfile::NamedTempFile::new_in(workspace.root())
        .context("Failed to create pip constraint file")?;
    constraint
        .write_all(constraint_file_contents().as_bytes())
        .context("Failed to write pip constraint file")?;

    let constraint_path = constraint.path().to_string_lossy().to_string();
    install_step(
        env.pip([
            "install",
            &format!("whisperx=={PIN_WHISPERX}"),
            &format!("yt-dlp=={PIN_YT_DLP}"),
            "--constraint",
            &constraint_path,
        ]),
        "install WhisperX and yt-dlp",
    )
    .await?;

    Ok(())
}

async fn install_step(command: Command, description: &str) -> Result<()> {
    let output = run_logged(command, description).await?;
    if !output.success {
        let snippet = tail_snippet(&output.lines, SNIPPET_LINES);
        return Err(DiarizerError::Install(format!(
            "{description} failed with exit code {}.\nLast output snippet:\n{snippet}",
            exit_code_label(output.code)
        ))
        .into());
    }
    Ok(())
}

/// WhisperX pulls in packages that build native extensions; on Unix those
/// builds need pkg-config, and failing early beats a long pip traceback.
fn ensure_pkg_config() -> Result<()> {
    if cfg!(unix) && which("pkg-config").is_none() {
        return Err(DiarizerError::Install(
            "pkg-config not found in PATH; install it (e.g. `brew install pkg-config` or \
`apt install pkg-config`) and rerun"
                .to_string(),
        )
        .into());
    }
    Ok(())
}

fn constraint_file_contents() -> String {
    format!("torch=={PIN_TORCH}\ntorchaudio=={PIN_TORCHAUDIO}\n")
}

fn exit_code_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string())
}

impl PythonEnv {
    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    fn pip<const N: usize>(&self, args: [&str; N]) -> Command {
        let mut command = Command::new(&self.python);
        command.args(["-m", "pip"]).args(args);
        command
    }

    /// First matching executable from the venv bin directory.
    fn tool(&self, candidates: &[&str]) -> Result<PathBuf> {
        for name in candidates {
            let path = if cfg!(windows) {
                self.bin_dir.join(format!("{name}.exe"))
            } else {
                self.bin_dir.join(name)
            };
            if path.is_file() {
                return Ok(path);
            }
        }
        Err(DiarizerError::Dependency(format!(
            "Executables not found in virtualenv: {}",
            candidates.join(", ")
        ))
        .into())
    }

    pub fn yt_dlp(&self) -> Result<PathBuf> {
        self.tool(&["yt-dlp", "yt_dlp"])
    }

    pub fn whisperx(&self) -> Result<PathBuf> {
        self.tool(&["whisperx"])
    }

    /// PATH for child processes: venv bin first, then any extra tool
    /// directories (downloaded ffmpeg), then the ambient PATH.
    pub fn path_env(&self, extra_bin_dirs: &[PathBuf]) -> Result<OsString> {
        let mut paths = vec![self.bin_dir.clone()];
        paths.extend(extra_bin_dirs.iter().cloned());
        if let Some(ambient) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&ambient));
        }
        std::env::join_paths(paths).context("Failed to assemble PATH for child processes")
    }
}
