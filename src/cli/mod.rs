use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "yt-diarizer",
    about = "Download a YouTube video's audio and produce a speaker-diarized transcript with WhisperX",
    version,
    long_about = "A single-run CLI wrapper around yt-dlp, ffmpeg and WhisperX. Provisions an \
ephemeral Python environment in a temporary workspace, downloads the best audio track, runs \
speech-to-text with speaker diarization, and writes a timestamped transcript next to your files. \
The workspace (virtualenv, model caches, intermediate audio) is removed when the run ends."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download audio from a YouTube URL and produce a diarized transcript
    Run {
        /// YouTube URL to transcribe (prompts interactively if omitted)
        #[arg(value_name = "URL")]
        url: Option<String>,

        /// Path to a Netscape-format cookies.txt for yt-dlp (for restricted videos)
        #[arg(short, long, value_name = "FILE", env = "YT_DIARIZER_COOKIES")]
        cookies: Option<PathBuf>,

        /// Directory where transcript outputs are written (defaults to the current directory)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Skip speaker diarization and produce a plain timestamped transcript
        #[arg(long)]
        no_diarize: bool,

        /// Keep the workspace directory after the run for inspection
        #[arg(long)]
        keep_workspace: bool,
    },

    /// Interactively rename SPEAKER_NN labels in existing transcript outputs
    Rename {
        /// Path to the diarized .txt transcript containing SPEAKER_NN entries
        #[arg(value_name = "TRANSCRIPT")]
        transcript: PathBuf,

        /// Path to the matching raw JSON output (inferred from the transcript path if omitted)
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,
    },

    /// Check availability of the external tools a run needs
    Doctor,
}
