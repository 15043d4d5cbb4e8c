use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::Result;

/// Collected outcome of a logged subprocess run.
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub lines: Vec<String>,
}

/// Extra environment applied to every pipeline subprocess: the assembled
/// PATH (venv bin first) plus redirected cache variables and the HF token.
/// The orchestrator's own environment is never mutated.
#[derive(Debug, Clone)]
pub struct ChildEnv {
    pub path: OsString,
    pub vars: Vec<(String, OsString)>,
}

impl ChildEnv {
    pub fn apply(&self, command: &mut Command) {
        command.env("PATH", &self.path);
        for (key, value) in &self.vars {
            command.env(key, value);
        }
    }
}

/// Run a subprocess, streaming combined stdout/stderr to the terminal while
/// collecting it for error reporting.
///
/// yt-dlp rewrites its `[download]` progress line in place with carriage
/// returns; those updates are rendered on a spinner instead of flooding the
/// output, and only the final progress line is kept in the buffer.
pub async fn run_logged(mut command: Command, description: &str) -> Result<CommandOutput> {
    tracing::debug!("Running subprocess ({description}): {command:?}");

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn subprocess ({description})"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("Subprocess stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("Subprocess stderr was not captured"))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let stdout_task = forward_lines(stdout, tx.clone());
    let stderr_task = forward_lines(stderr, tx);

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    progress.set_message(description.to_string());

    let mut lines = Vec::new();
    let mut last_progress_line: Option<String> = None;

    while let Some(raw) = rx.recv().await {
        for part in raw.split('\r') {
            let part = part.trim_end();
            if part.is_empty() {
                continue;
            }

            if part.starts_with("[download]") {
                last_progress_line = Some(part.to_string());
                progress.set_message(part.to_string());
                continue;
            }

            progress.println(part);
            lines.push(part.to_string());
        }
    }

    if let Some(progress_line) = last_progress_line {
        progress.println(&progress_line);
        lines.push(progress_line);
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for subprocess ({description})"))?;
    let _ = tokio::join!(stdout_task, stderr_task);
    progress.finish_and_clear();

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        lines,
    })
}

fn forward_lines<R>(reader: R, tx: UnboundedSender<String>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

/// Last `limit` non-empty output lines, joined for error messages.
pub fn tail_snippet(lines: &[String], limit: usize) -> String {
    let non_empty: Vec<&str> = lines
        .iter()
        .map(|line| line.as_str())
        .filter(|line| !line.trim().is_empty())
        .collect();

    let start = non_empty.len().saturating_sub(limit);
    non_empty[start..].join("\n")
}

/// Check if a command is available in PATH
pub async fn command_available(command: &str) -> bool {
    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Locate an executable on the ambient PATH.
pub fn which(name: &str) -> Option<PathBuf> {
    which_in(name, std::env::var_os("PATH"))
}

fn which_in(name: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    let path_var = path_var?;
    for dir in std::env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let candidate = dir.join(format!("{name}.exe"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
