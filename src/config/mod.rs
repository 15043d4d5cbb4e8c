use anyhow::Context;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::{DiarizerError, Result};

pub const TOKEN_FILENAME: &str = "token.txt";
pub const COOKIES_FILENAME: &str = "cookies.txt";

/// Environment override for the ffmpeg binary (file or containing directory)
pub const ENV_FFMPEG_PATH: &str = "YT_DIARIZER_FFMPEG_PATH";
/// Environment override for the ffprobe binary (file or containing directory)
pub const ENV_FFPROBE_PATH: &str = "YT_DIARIZER_FFPROBE_PATH";

/// Immutable per-run configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Wall-clock start of the run; output filenames and the workspace name embed it
    pub started_at: DateTime<Local>,

    /// Directory receiving the final transcript files
    pub output_dir: PathBuf,

    /// Cookie file handed to yt-dlp, if one was found
    pub cookies: Option<PathBuf>,

    /// Explicit ffmpeg path from the environment (binary or containing directory)
    pub ffmpeg_override: Option<PathBuf>,

    /// Explicit ffprobe path from the environment (binary or containing directory)
    pub ffprobe_override: Option<PathBuf>,

    /// Hugging Face token for the pyannote segmentation/diarization models
    pub hf_token: String,

    /// Run speaker diarization (off for plain timestamped transcripts)
    pub diarize: bool,

    /// Leave the workspace behind when the run ends
    pub keep_workspace: bool,
}

impl RunConfig {
    /// Resolve the full run configuration from CLI arguments and the environment.
    ///
    /// Credential resolution happens here, before any workspace or network
    /// activity: a missing or empty `token.txt` aborts the run immediately.
    pub fn resolve(
        output_dir: Option<PathBuf>,
        cookies: Option<PathBuf>,
        no_diarize: bool,
        keep_workspace: bool,
    ) -> Result<Self> {
        let output_dir = match output_dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };

        let hf_token = load_hf_token(&output_dir)?;
        let cookies = resolve_cookie_file(cookies, &output_dir);

        Ok(Self {
            started_at: Local::now(),
            output_dir,
            cookies,
            ffmpeg_override: std::env::var_os(ENV_FFMPEG_PATH).map(PathBuf::from),
            ffprobe_override: std::env::var_os(ENV_FFPROBE_PATH).map(PathBuf::from),
            hf_token,
            diarize: !no_diarize,
            keep_workspace,
        })
    }

    /// Timestamp tag embedded in the workspace name and the output filenames
    pub fn timestamp_tag(&self) -> String {
        self.started_at.format("%Y%m%d_%H%M%S").to_string()
    }
}

/// Candidate locations for `token.txt`: the output directory (repository root
/// when run in place), then the directory holding the executable.
fn token_search_paths(output_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![output_dir.join(TOKEN_FILENAME)];

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidate = exe_dir.join(TOKEN_FILENAME);
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }

    candidates
}

/// Load the Hugging Face token, preferring the output directory.
pub fn load_hf_token(output_dir: &Path) -> Result<String> {
    load_hf_token_from(&token_search_paths(output_dir))
}

fn load_hf_token_from(candidates: &[PathBuf]) -> Result<String> {
    for token_path in candidates {
        if token_path.is_file() {
            let token = fs_err::read_to_string(token_path)?.trim().to_string();
            if token.is_empty() {
                return Err(DiarizerError::Credential(format!(
                    "{} is empty",
                    token_path.display()
                ))
                .into());
            }
            tracing::debug!("Using Hugging Face token from {}", token_path.display());
            return Ok(token);
        }
    }

    Err(DiarizerError::Credential(format!(
        "{TOKEN_FILENAME} not found. Place it in the output directory or next to the \
yt-diarizer executable (a Hugging Face token with access to pyannote \
segmentation-3.0 and speaker-diarization-3.1 is required)"
    ))
    .into())
}

/// Pick the cookie file for yt-dlp: an explicit flag/env path if it exists,
/// otherwise `cookies.txt` in the output directory.
fn resolve_cookie_file(explicit: Option<PathBuf>, output_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path);
        }
        tracing::warn!(
            "Cookie file {} does not exist; falling back to {}",
            path.display(),
            COOKIES_FILENAME
        );
    }

    let candidate = output_dir.join(COOKIES_FILENAME);
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_loaded_from_first_existing_candidate() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs_err::write(first.path().join(TOKEN_FILENAME), "hf_first\n").unwrap();
        fs_err::write(second.path().join(TOKEN_FILENAME), "hf_second\n").unwrap();

        let candidates = vec![
            first.path().join(TOKEN_FILENAME),
            second.path().join(TOKEN_FILENAME),
        ];
        assert_eq!(load_hf_token_from(&candidates).unwrap(), "hf_first");
    }

    #[test]
    fn token_falls_back_to_second_candidate() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs_err::write(second.path().join(TOKEN_FILENAME), "  hf_token  \n").unwrap();

        let candidates = vec![
            first.path().join(TOKEN_FILENAME),
            second.path().join(TOKEN_FILENAME),
        ];
        assert_eq!(load_hf_token_from(&candidates).unwrap(), "hf_token");
    }

    #[test]
    fn empty_token_file_is_a_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join(TOKEN_FILENAME), "   \n").unwrap();

        let err = load_hf_token_from(&[dir.path().join(TOKEN_FILENAME)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiarizerError>(),
            Some(DiarizerError::Credential(_))
        ));
    }

    #[test]
    fn missing_token_everywhere_is_a_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_hf_token_from(&[dir.path().join(TOKEN_FILENAME)]).unwrap_err();
        let message = err.to_string();
        assert!(matches!(
            err.downcast_ref::<DiarizerError>(),
            Some(DiarizerError::Credential(_))
        ));
        assert!(message.contains(TOKEN_FILENAME));
    }

    #[test]
    fn explicit_cookie_file_wins_over_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("my_cookies.txt");
        fs_err::write(&explicit, "# Netscape HTTP Cookie File").unwrap();
        fs_err::write(dir.path().join(COOKIES_FILENAME), "# fallback").unwrap();

        let resolved = resolve_cookie_file(Some(explicit.clone()), dir.path());
        assert_eq!(resolved, Some(explicit));
    }

    #[test]
    fn missing_explicit_cookie_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join(COOKIES_FILENAME), "# fallback").unwrap();

        let resolved = resolve_cookie_file(Some(dir.path().join("absent.txt")), dir.path());
        assert_eq!(resolved, Some(dir.path().join(COOKIES_FILENAME)));
    }

    #[test]
    fn no_cookie_file_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_cookie_file(None, dir.path()), None);
    }
}
