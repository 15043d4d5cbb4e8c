use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::process::{run_logged, tail_snippet, ChildEnv};
use crate::workspace::Workspace;
use crate::{DiarizerError, Result};

const WHISPER_MODEL: &str = "large-v3";
const SNIPPET_LINES: usize = 50;

/// Parsed WhisperX transcription result.
///
/// Only the fields needed to build transcript lines are modeled; the raw
/// JSON file itself is moved to the output directory unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperxOutput {
    #[serde(default)]
    pub segments: Vec<WhisperxSegment>,
    pub language: Option<String>,
}

/// A single transcript segment with timing and an optional speaker label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperxSegment {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub text: Option<String>,
    pub speaker: Option<String>,
}

/// Run the WhisperX CLI against the downloaded audio.
///
/// High-quality settings: large-v3 model, float32 on CPU, beam size 5,
/// pyannote VAD, diarization unless disabled. Returns the path of the JSON
/// result inside the workspace.
pub async fn run_whisperx(
    whisperx: &Path,
    audio_path: &Path,
    hf_token: &str,
    workspace: &Workspace,
    diarize: bool,
    child_env: &ChildEnv,
) -> Result<PathBuf> {
    if diarize {
        tracing::info!("Running WhisperX diarization with {WHISPER_MODEL} model");
    } else {
        tracing::info!("Running WhisperX transcription with {WHISPER_MODEL} model (no diarization)");
    }

    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let mut command = Command::new(whisperx);
    command.arg(audio_path).args(["--model", WHISPER_MODEL]);
    if diarize {
        command.arg("--diarize");
    }
    command
        .args(["--hf_token", hf_token])
        .args(["--batch_size", "8"])
        .args(["--beam_size", "5"])
        .args(["--compute_type", "float32"])
        .args(["--device", "cpu"])
        .args(["--threads", &threads.to_string()])
        .args(["--vad_method", "pyannote"])
        .args(["--output_format", "json"])
        .arg("--output_dir")
        .arg(workspace.root())
        .args(["--verbose", "True"])
        .args(["--print_progress", "True"]);
    child_env.apply(&mut command);

    let output = run_logged(command, "whisperx diarization").await?;
    if !output.success {
        let snippet = tail_snippet(&output.lines, SNIPPET_LINES);
        return Err(DiarizerError::Transcription(format!(
            "WhisperX failed with exit code {}.\nLast output snippet:\n{snippet}",
            output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        ))
        .into());
    }

    let json_path = locate_json_output(workspace.root(), audio_path)?;
    tracing::debug!("WhisperX JSON output: {}", json_path.display());
    Ok(json_path)
}

/// WhisperX names its output after the audio stem; fall back to the first
/// JSON file in the workspace when it does not.
fn locate_json_output(workspace_root: &Path, audio_path: &Path) -> Result<PathBuf> {
    if let Some(stem) = audio_path.file_stem() {
        let expected = workspace_root.join(format!("{}.json", stem.to_string_lossy()));
        if expected.is_file() {
            return Ok(expected);
        }
    }

    let mut candidates: Vec<PathBuf> = fs_err::read_dir(workspace_root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        DiarizerError::Transcription(
            "WhisperX completed but no JSON output was found in the workspace".to_string(),
        )
        .into()
    })
}

/// Load and parse the WhisperX JSON result.
pub fn load_output(json_path: &Path) -> Result<WhisperxOutput> {
    let content = fs_err::read_to_string(json_path)?;
    let output = serde_json::from_str(&content)?;
    Ok(output)
}

/// Format seconds as `HH:MM:SS.mmm` (zero-padded, clamped at zero).
pub fn format_timestamp(seconds: Option<f64>) -> String {
    let total_ms = seconds
        .map(|s| (s * 1000.0).round() as i64)
        .unwrap_or(0)
        .max(0);

    let hours = total_ms / 3_600_000;
    let rem = total_ms % 3_600_000;
    let minutes = rem / 60_000;
    let rem = rem % 60_000;
    let secs = rem / 1000;
    let ms = rem % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}.{ms:03}")
}

/// Build diarized transcript lines:
/// `[00:00:01.000 --> 00:00:03.500] SPEAKER_00: Hello world`
pub fn diarized_lines(output: &WhisperxOutput) -> Vec<String> {
    output
        .segments
        .iter()
        .map(|seg| {
            let speaker = seg.speaker.as_deref().unwrap_or("UNKNOWN");
            format!(
                "[{} --> {}] {}: {}",
                format_timestamp(seg.start),
                format_timestamp(seg.end),
                speaker,
                seg.text.as_deref().unwrap_or("").trim()
            )
        })
        .collect()
}

/// Build speaker-less transcript lines for no-diarize runs.
pub fn plain_lines(output: &WhisperxOutput) -> Vec<String> {
    output
        .segments
        .iter()
        .map(|seg| {
            format!(
                "[{} --> {}] {}",
                format_timestamp(seg.start),
                format_timestamp(seg.end),
                seg.text.as_deref().unwrap_or("").trim()
            )
        })
        .collect()
}
