use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::Result;

/// Paths of the final transcript files.
#[derive(Debug, Clone)]
pub struct RunOutputs {
    pub txt: PathBuf,
    pub json: PathBuf,
}

pub fn transcript_basename(timestamp_tag: &str) -> String {
    format!("diarized_transcript_{timestamp_tag}")
}

/// Save the transcript (.txt) and the raw WhisperX JSON into the output
/// directory, both named with the run-start timestamp. The JSON is moved
/// verbatim, never re-serialized.
pub fn save_final_outputs(
    lines: &[String],
    json_src: &Path,
    output_dir: &Path,
    timestamp_tag: &str,
) -> Result<RunOutputs> {
    let base_name = transcript_basename(timestamp_tag);
    let txt_path = output_dir.join(format!("{base_name}.txt"));
    let json_path = output_dir.join(format!("{base_name}.json"));

    let content: String = lines.iter().map(|line| format!("{line}\n")).collect();
    fs_err::write(&txt_path, content).context("Failed to write transcript file")?;

    move_file(json_src, &json_path).context("Failed to move raw JSON output")?;

    tracing::debug!("Saved TXT transcript to {}", txt_path.display());
    tracing::debug!("Saved JSON output to {}", json_path.display());

    Ok(RunOutputs {
        txt: txt_path,
        json: json_path,
    })
}

/// Rename, falling back to copy+remove when the workspace and the output
/// directory sit on different filesystems.
fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if fs_err::rename(src, dest).is_ok() {
        return Ok(());
    }
    fs_err::copy(src, dest)?;
    fs_err::remove_file(src)?;
    Ok(())
}
