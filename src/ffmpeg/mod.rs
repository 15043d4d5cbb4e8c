use anyhow::Context;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{RunConfig, ENV_FFMPEG_PATH, ENV_FFPROBE_PATH};
use crate::process::which;
use crate::workspace::Workspace;
use crate::{DiarizerError, Result};

/// Resolved ffmpeg/ffprobe binaries.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FfmpegPaths {
    /// Directory containing both binaries, handed to yt-dlp via
    /// `--ffmpeg-location` and prepended to child PATHs.
    pub fn bin_dir(&self) -> Option<&Path> {
        self.ffmpeg.parent()
    }
}

/// Ensure ffmpeg and ffprobe are available.
///
/// Resolution order:
/// 1. Environment overrides (`YT_DIARIZER_FFMPEG_PATH` / `YT_DIARIZER_FFPROBE_PATH`).
/// 2. Binaries already on PATH.
/// 3. A platform static build downloaded and unpacked into the workspace.
pub async fn ensure_ffmpeg(config: &RunConfig, workspace: &Workspace) -> Result<FfmpegPaths> {
    match resolve_overrides(
        config.ffmpeg_override.as_deref(),
        config.ffprobe_override.as_deref(),
    ) {
        Ok(Some(paths)) => {
            tracing::info!(
                "Using ffmpeg from {ENV_FFMPEG_PATH}: {}",
                paths.ffmpeg.display()
            );
            return Ok(paths);
        }
        Ok(None) => {}
        Err(err) => tracing::warn!("Ignoring ffmpeg environment overrides: {err}"),
    }

    if let Some(paths) = resolve_from_path() {
        tracing::info!(
            "Using ffmpeg/ffprobe from system PATH: ffmpeg={}, ffprobe={}",
            paths.ffmpeg.display(),
            paths.ffprobe.display()
        );
        return Ok(paths);
    }

    download_static_build(workspace).await
}

/// Apply the environment overrides, accepting either a binary path or a
/// directory containing the binary. When only ffmpeg is given, ffprobe is
/// expected next to it.
fn resolve_overrides(
    ffmpeg_override: Option<&Path>,
    ffprobe_override: Option<&Path>,
) -> Result<Option<FfmpegPaths>> {
    if ffmpeg_override.is_none() && ffprobe_override.is_none() {
        return Ok(None);
    }

    let ffmpeg = match ffmpeg_override {
        Some(path) => resolve_override(path, &exe_name("ffmpeg"))?,
        None => {
            return Err(DiarizerError::Dependency(format!(
                "{ENV_FFMPEG_PATH} must also be set when {ENV_FFPROBE_PATH} is provided"
            ))
            .into())
        }
    };

    let ffprobe = match ffprobe_override {
        Some(path) => resolve_override(path, &exe_name("ffprobe"))?,
        None => {
            let sibling = ffmpeg.with_file_name(exe_name("ffprobe"));
            if !sibling.is_file() {
                return Err(DiarizerError::Dependency(format!(
                    "{ENV_FFMPEG_PATH} was provided but ffprobe was not found next to it; \
set {ENV_FFPROBE_PATH} or point to a directory containing both binaries"
                ))
                .into());
            }
            sibling
        }
    };

    Ok(Some(FfmpegPaths { ffmpeg, ffprobe }))
}

fn resolve_override(value: &Path, exe: &str) -> Result<PathBuf> {
    let candidate = if value.is_dir() {
        value.join(exe)
    } else {
        value.to_path_buf()
    };

    if !candidate.is_file() {
        return Err(DiarizerError::Dependency(format!(
            "Environment override for {exe} points to a missing file: {}",
            candidate.display()
        ))
        .into());
    }
    Ok(candidate)
}

fn resolve_from_path() -> Option<FfmpegPaths> {
    let ffmpeg = which("ffmpeg")?;
    let ffprobe = which("ffprobe")?;
    Some(FfmpegPaths { ffmpeg, ffprobe })
}

/// Static build zip archives per platform. Linux builds ship as tar.xz only,
/// so Linux gets an empty list and an install-guidance error instead.
fn static_build_urls() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec![
            "https://github.com/ColorsWind/FFmpeg-macOS/releases/download/\
n5.0.1-patch3/FFmpeg-shared-n5.0.1-OSX-universal.zip"
                .to_string(),
            "https://github.com/ColorsWind/FFmpeg-macOS/releases/download/\
n5.0.1-patch3/FFmpeg-n5.0.1-OSX-universal.zip"
                .to_string(),
        ]
    } else if cfg!(windows) {
        vec![
            "https://github.com/yt-dlp/FFmpeg-Builds/releases/latest/download/\
ffmpeg-master-latest-win64-gpl.zip"
                .to_string(),
        ]
    } else {
        Vec::new()
    }
}

async fn download_static_build(workspace: &Workspace) -> Result<FfmpegPaths> {
    let urls = static_build_urls();
    if urls.is_empty() {
        return Err(DiarizerError::Dependency(format!(
            "ffmpeg/ffprobe not found in PATH and no static build is available for this \
platform; install ffmpeg (e.g. `apt install ffmpeg`) or set {ENV_FFMPEG_PATH}"
        ))
        .into());
    }

    let mut attempted = Vec::new();
    let mut archive_path = None;
    for url in &urls {
        attempted.push(url.clone());
        let filename = url.rsplit('/').next().unwrap_or("ffmpeg.zip");
        let dest = workspace.root().join(filename);
        match download_archive(url, &dest).await {
            Ok(()) => {
                archive_path = Some(dest);
                break;
            }
            Err(err) => tracing::warn!("ffmpeg download failed from {url}: {err}"),
        }
    }

    let archive_path = archive_path.ok_or_else(|| {
        DiarizerError::Dependency(format!(
            "Automatic ffmpeg download failed; tried URLs: {}. Install ffmpeg so it is on \
PATH or set {ENV_FFMPEG_PATH}",
            attempted.join(", ")
        ))
    })?;

    let unpack_dir = workspace.root().join("ffmpeg_unpacked");
    tracing::debug!("Extracting ffmpeg archive to {}", unpack_dir.display());
    {
        let archive_path = archive_path.clone();
        let unpack_dir = unpack_dir.clone();
        tokio::task::spawn_blocking(move || extract_zip(&archive_path, &unpack_dir))
            .await
            .context("ffmpeg extraction task failed")??;
    }

    let ffmpeg = find_binary(&unpack_dir, &exe_name("ffmpeg")).ok_or_else(|| {
        DiarizerError::Dependency(
            "Downloaded ffmpeg archive but could not find an 'ffmpeg' binary inside".to_string(),
        )
    })?;
    let ffprobe = find_binary(&unpack_dir, &exe_name("ffprobe")).ok_or_else(|| {
        DiarizerError::Dependency(
            "Downloaded ffmpeg archive but could not find an 'ffprobe' binary inside".to_string(),
        )
    })?;

    make_executable(&ffmpeg)?;
    make_executable(&ffprobe)?;

    tracing::info!("Using downloaded ffmpeg at {}", ffmpeg.display());
    Ok(FfmpegPaths { ffmpeg, ffprobe })
}

async fn download_archive(url: &str, dest: &Path) -> Result<()> {
    tracing::info!("Downloading ffmpeg static build from {url}");

    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download ffmpeg archive: HTTP {}", response.status());
    }

    let total_size = response.content_length().unwrap_or(0);
    let progress = ProgressBar::new(total_size);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap(),
    );
    progress.set_message("Downloading ffmpeg...");

    let mut file = fs_err::File::create(dest)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        progress.set_position(downloaded);
    }

    progress.finish_with_message("Download complete");
    Ok(())
}

fn extract_zip(archive_path: &Path, unpack_dir: &Path) -> Result<()> {
    fs_err::create_dir_all(unpack_dir)?;
    let file = fs_err::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).context("Failed to read ffmpeg archive")?;
    archive
        .extract(unpack_dir)
        .context("Failed to extract ffmpeg archive")?;
    Ok(())
}

/// Recursively search for a binary by name (case-insensitive) under `root`.
fn find_binary(root: &Path, name: &str) -> Option<PathBuf> {
    let entries = fs_err::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_binary(&path, name) {
                return Some(found);
            }
        } else if path
            .file_name()
            .map(|f| f.to_string_lossy().eq_ignore_ascii_case(name))
            .unwrap_or(false)
        {
            return Some(path);
        }
    }
    None
}

fn exe_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs_err::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs_err::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs_err::write(path, "").unwrap();
    }

    #[test]
    fn no_overrides_resolve_to_none() {
        assert_eq!(resolve_overrides(None, None).unwrap(), None);
    }

    #[test]
    fn directory_override_resolves_both_binaries() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(exe_name("ffmpeg")));
        touch(&dir.path().join(exe_name("ffprobe")));

        let paths = resolve_overrides(Some(dir.path()), None).unwrap().unwrap();
        assert_eq!(paths.ffmpeg, dir.path().join(exe_name("ffmpeg")));
        assert_eq!(paths.ffprobe, dir.path().join(exe_name("ffprobe")));
    }

    #[test]
    fn file_override_infers_sibling_ffprobe() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = dir.path().join(exe_name("ffmpeg"));
        touch(&ffmpeg);
        touch(&dir.path().join(exe_name("ffprobe")));

        let paths = resolve_overrides(Some(ffmpeg.as_path()), None)
            .unwrap()
            .unwrap();
        assert_eq!(paths.ffmpeg, ffmpeg);
    }

    #[test]
    fn missing_sibling_ffprobe_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = dir.path().join(exe_name("ffmpeg"));
        touch(&ffmpeg);

        assert!(resolve_overrides(Some(ffmpeg.as_path()), None).is_err());
    }

    #[test]
    fn ffprobe_override_alone_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ffprobe = dir.path().join(exe_name("ffprobe"));
        touch(&ffprobe);

        assert!(resolve_overrides(None, Some(ffprobe.as_path())).is_err());
    }

    #[test]
    fn override_pointing_at_a_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(resolve_overrides(Some(missing.as_path()), None).is_err());
    }

    #[test]
    fn find_binary_searches_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("build").join("bin");
        fs_err::create_dir_all(&nested).unwrap();
        touch(&nested.join("ffmpeg"));

        let found = find_binary(dir.path(), "ffmpeg").unwrap();
        assert_eq!(found, nested.join("ffmpeg"));
    }

    #[test]
    fn static_build_urls_are_zip_archives() {
        for url in static_build_urls() {
            assert!(url.ends_with(".zip"), "unexpected archive format: {url}");
        }
    }
}
