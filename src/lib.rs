//! yt-diarizer - download a YouTube video's audio and produce a diarized transcript
//!
//! This library wraps yt-dlp, ffmpeg and WhisperX behind a single command. All of the
//! heavy lifting (audio extraction, transcription, speaker diarization) happens in
//! external tools inside an ephemeral per-run workspace; the crate itself sequences
//! environment setup, audio acquisition, transcription and output formatting.

pub mod cli;
pub mod config;
pub mod download;
pub mod ffmpeg;
pub mod namer;
pub mod output;
pub mod process;
pub mod pyenv;
pub mod transcribe;
pub mod workspace;

pub use cli::{Cli, Commands};
pub use config::RunConfig;
pub use workspace::Workspace;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the diarizer
#[derive(thiserror::Error, Debug)]
pub enum DiarizerError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Missing dependency: {0}")]
    Dependency(String),

    #[error("Dependency installation failed: {0}")]
    Install(String),

    #[error("Audio download failed: {0}")]
    Download(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),
}
