use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yt_diarizer::cli::{Cli, Commands};
use yt_diarizer::config::RunConfig;
use yt_diarizer::process::{command_available, ChildEnv};
use yt_diarizer::workspace::Workspace;
use yt_diarizer::{download, ffmpeg, namer, output, pyenv, transcribe, DiarizerError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "yt_diarizer=debug"
    } else {
        "yt_diarizer=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run {
            url,
            cookies,
            output_dir,
            no_diarize,
            keep_workspace,
        } => run(url, cookies, output_dir, no_diarize, keep_workspace).await,
        Commands::Rename { transcript, json } => namer::run(&transcript, json.as_deref()),
        Commands::Doctor => {
            doctor().await;
            Ok(())
        }
    }
}

async fn run(
    url: Option<String>,
    cookies: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    no_diarize: bool,
    keep_workspace: bool,
) -> Result<()> {
    // Input first, credentials second: both must fail before the workspace
    // exists and before anything touches the network.
    let url = resolve_url(url).await?;
    let config = RunConfig::resolve(output_dir, cookies, no_diarize, keep_workspace)?;

    let mut workspace = Workspace::create(
        &config.output_dir,
        &config.timestamp_tag(),
        config.keep_workspace,
    )?;
    let workspace_root = workspace.root().to_path_buf();

    let result = tokio::select! {
        res = run_pipeline(&config, &workspace, &url) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted by user");
            if !config.keep_workspace {
                let _ = std::fs::remove_dir_all(&workspace_root);
            }
            std::process::exit(130);
        }
    };

    match result {
        Ok(outputs) => {
            workspace.close()?;
            println!();
            println!("=== Done ===");
            println!("Diarized transcript (TXT): {}", outputs.txt.display());
            println!("Raw WhisperX output (JSON): {}", outputs.json.display());
            Ok(())
        }
        Err(err) => {
            // Installation failures leave the workspace behind for inspection
            if matches!(
                err.downcast_ref::<DiarizerError>(),
                Some(DiarizerError::Install(_))
            ) {
                workspace.preserve();
            }
            let _ = workspace.close();
            Err(err)
        }
    }
}

async fn run_pipeline(
    config: &RunConfig,
    workspace: &Workspace,
    url: &str,
) -> Result<output::RunOutputs> {
    if !download::is_youtube_url(url) {
        tracing::warn!("URL does not look like a YouTube link; yt-dlp may still support it");
    }

    let env = pyenv::provision(workspace).await?;
    let ffmpeg_paths = ffmpeg::ensure_ffmpeg(config, workspace).await?;

    let extra_dirs: Vec<PathBuf> = ffmpeg_paths
        .bin_dir()
        .map(|dir| vec![dir.to_path_buf()])
        .unwrap_or_default();

    let mut vars: Vec<(String, OsString)> = workspace
        .cache_env()
        .into_iter()
        .map(|(key, path)| (key, path.into_os_string()))
        .collect();
    vars.push(("HF_TOKEN".to_string(), config.hf_token.clone().into()));

    let child_env = ChildEnv {
        path: env.path_env(&extra_dirs)?,
        vars,
    };

    let yt_dlp = env.yt_dlp()?;
    let wav_path = download::download_audio(
        &yt_dlp,
        url,
        workspace,
        config.cookies.as_deref(),
        ffmpeg_paths.bin_dir(),
        &child_env,
    )
    .await?;

    let whisperx = env.whisperx()?;
    let json_path = transcribe::run_whisperx(
        &whisperx,
        &wav_path,
        &config.hf_token,
        workspace,
        config.diarize,
        &child_env,
    )
    .await?;

    let parsed = transcribe::load_output(&json_path)?;
    let lines = if config.diarize {
        transcribe::diarized_lines(&parsed)
    } else {
        transcribe::plain_lines(&parsed)
    };

    output::save_final_outputs(&lines, &json_path, &config.output_dir, &config.timestamp_tag())
}

async fn resolve_url(arg: Option<String>) -> Result<String> {
    let url = match arg {
        Some(url) => url,
        None => prompt_for_url().await?,
    };
    download::validate_url(&url)?;
    Ok(url)
}

async fn prompt_for_url() -> Result<String> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    println!("Paste YouTube video URL:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read URL from stdin")?;

    let url = line.trim().to_string();
    if url.is_empty() {
        return Err(DiarizerError::Input(
            "No URL provided (pass it as an argument or paste it at the prompt)".to_string(),
        )
        .into());
    }
    Ok(url)
}

async fn doctor() {
    println!("Checking external tools:");
    for (name, needed_for) in [
        ("python3", "virtualenv provisioning"),
        ("ffmpeg", "audio conversion (auto-downloaded on macOS/Windows when missing)"),
        ("ffprobe", "audio probing (auto-downloaded with ffmpeg)"),
        ("pkg-config", "building the WhisperX stack on Unix"),
    ] {
        if command_available(name).await {
            println!("  • {name}: ok");
        } else {
            println!("  • {name}: missing - needed for {needed_for}");
        }
    }
}
