use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use url::Url;

use crate::process::{run_logged, tail_snippet, ChildEnv};
use crate::workspace::Workspace;
use crate::{DiarizerError, Result};

/// yt-dlp occasionally serves YouTube's anti-bot page to unknown clients;
/// pinning a desktop Safari user agent and the web player client avoids it.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/605.1.15 (KHTML, like Gecko) \
Version/17.0 Safari/605.1.15";

const SNIPPET_LINES: usize = 50;

/// Validate the input URL (http/https only).
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|_| DiarizerError::Input(format!("Invalid URL format: {url}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DiarizerError::Input("URL must use HTTP or HTTPS protocol".to_string()).into());
    }

    Ok(parsed)
}

/// Whether the URL looks like one of the usual YouTube forms. Other hosts are
/// not rejected (yt-dlp supports many), only warned about.
pub fn is_youtube_url(url: &str) -> bool {
    let url_lower = url.to_lowercase();
    url_lower.contains("youtube.com/watch")
        || url_lower.contains("youtu.be/")
        || url_lower.contains("youtube.com/embed/")
        || url_lower.contains("youtube.com/v/")
        || url_lower.contains("m.youtube.com/")
}

/// One yt-dlp invocation attempt.
#[derive(Debug)]
struct DownloadPlan {
    label: String,
    args: Vec<OsString>,
}

/// Build the yt-dlp command variants to try, in order:
/// 1. plain public download
/// 2. with the resolved cookie file (if any)
/// 3. cookies from Safari (macOS)
/// 4. cookies from Chrome
fn command_variants(
    url: &str,
    workspace_root: &Path,
    cookies: Option<&Path>,
    ffmpeg_bin_dir: Option<&Path>,
) -> Vec<DownloadPlan> {
    let output_template = workspace_root.join("audio.%(ext)s");

    let mut base: Vec<OsString> = vec![
        "--ignore-config".into(),
        "--no-playlist".into(),
        "-f".into(),
        "bestaudio/best".into(),
        "-x".into(),
        "--audio-format".into(),
        "wav".into(),
        "--user-agent".into(),
        USER_AGENT.into(),
        "--extractor-args".into(),
        "youtube:player_client=web".into(),
        "-o".into(),
        output_template.into_os_string(),
    ];

    if let Some(dir) = ffmpeg_bin_dir {
        base.push("--ffmpeg-location".into());
        base.push(dir.as_os_str().to_os_string());
    }

    base.push(url.into());

    let mut variants = vec![DownloadPlan {
        label: "plain".to_string(),
        args: base.clone(),
    }];

    if let Some(cookie_path) = cookies {
        let mut args = base.clone();
        args.push("--cookies".into());
        args.push(cookie_path.as_os_str().to_os_string());
        variants.push(DownloadPlan {
            label: format!("cookies from {}", cookie_path.display()),
            args,
        });
    }

    if cfg!(target_os = "macos") {
        let mut args = base.clone();
        args.push("--cookies-from-browser".into());
        args.push("safari".into());
        variants.push(DownloadPlan {
            label: "Safari browser cookies".to_string(),
            args,
        });
    }

    let mut args = base;
    args.push("--cookies-from-browser".into());
    args.push("chrome".into());
    variants.push(DownloadPlan {
        label: "Chrome browser cookies".to_string(),
        args,
    });

    variants
}

/// Use yt-dlp to grab the best audio track and convert it to WAV, trying the
/// cookie fallback chain until one variant succeeds.
pub async fn download_audio(
    yt_dlp: &Path,
    url: &str,
    workspace: &Workspace,
    cookies: Option<&Path>,
    ffmpeg_bin_dir: Option<&Path>,
    child_env: &ChildEnv,
) -> Result<PathBuf> {
    tracing::info!("Starting audio download via yt-dlp");

    let variants = command_variants(url, workspace.root(), cookies, ffmpeg_bin_dir);
    let mut last_err_msg: Option<String> = None;
    let mut succeeded = false;

    for (idx, plan) in variants.iter().enumerate() {
        let description = format!("yt-dlp variant #{} ({})", idx + 1, plan.label);
        tracing::debug!("Trying {description}");

        let mut command = Command::new(yt_dlp);
        command.args(&plan.args);
        child_env.apply(&mut command);

        let output = run_logged(command, &description).await?;
        if output.success {
            tracing::debug!("yt-dlp download succeeded");
            succeeded = true;
            break;
        }

        let snippet = tail_snippet(&output.lines, SNIPPET_LINES);
        let message = format!(
            "yt-dlp exited with code {}. Last output snippet:\n{snippet}",
            output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        tracing::debug!("{message}");
        last_err_msg = Some(message);
    }

    if !succeeded {
        return Err(DiarizerError::Download(format!(
            "Audio download/conversion failed after trying multiple strategies.\n\
If this video is age/region/login restricted, export your browser cookies to a \
Netscape-format cookies.txt and place it in the output directory, or set \
YT_DIARIZER_COOKIES=/full/path/to/cookies.txt, then rerun.\n\
On macOS with Safari, the terminal may also need 'Full Disk Access' in \
System Settings.\n{}",
            last_err_msg.unwrap_or_default()
        ))
        .into());
    }

    let expected = workspace.root().join("audio.wav");
    if expected.is_file() {
        tracing::info!("Audio saved to {}", expected.display());
        return Ok(expected);
    }

    // yt-dlp sometimes picks its own name despite the output template
    find_wav_fallback(workspace.root())?.ok_or_else(|| {
        DiarizerError::Download(
            "yt-dlp reported success but no .wav files were found in the workspace".to_string(),
        )
        .into()
    })
}

fn find_wav_fallback(dir: &Path) -> Result<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = fs_err::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("wav"))
                .unwrap_or(false)
        })
        .collect();

    candidates.sort();
    if let Some(chosen) = candidates.first() {
        tracing::debug!("Using WAV file: {}", chosen.display());
    }
    Ok(candidates.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[test]
    fn validates_http_and_https_urls() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not-a-url").is_err());
    }

    #[test]
    fn invalid_url_is_an_input_error() {
        let err = validate_url("not-a-url").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiarizerError>(),
            Some(DiarizerError::Input(_))
        ));
    }

    #[test]
    fn recognizes_youtube_url_forms() {
        assert!(is_youtube_url(URL));
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://m.youtube.com/watch?v=abc"));
        assert!(!is_youtube_url("https://vimeo.com/12345"));
    }

    #[test]
    fn plain_variant_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        let variants = command_variants(URL, dir.path(), None, None);

        assert_eq!(variants[0].label, "plain");
        assert!(!variants[0]
            .args
            .iter()
            .any(|arg| arg.to_string_lossy().contains("cookies")));
    }

    #[test]
    fn cookie_file_variant_follows_plain() {
        let dir = tempfile::tempdir().unwrap();
        let cookie_path = dir.path().join("cookies.txt");
        let variants = command_variants(URL, dir.path(), Some(&cookie_path), None);

        assert!(variants[1].label.starts_with("cookies from"));
        let args: Vec<String> = variants[1]
            .args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        let pos = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[pos + 1], cookie_path.to_string_lossy());
    }

    #[test]
    fn chrome_cookie_variant_is_the_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let variants = command_variants(URL, dir.path(), None, None);

        let last = variants.last().unwrap();
        assert_eq!(last.label, "Chrome browser cookies");
        assert!(last
            .args
            .iter()
            .any(|arg| arg.to_string_lossy() == "--cookies-from-browser"));
    }

    #[test]
    fn variants_request_wav_extraction_into_the_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let variants = command_variants(URL, dir.path(), None, None);

        let args: Vec<String> = variants[0]
            .args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"wav".to_string()));
        assert!(args
            .iter()
            .any(|a| a.ends_with("audio.%(ext)s") && a.starts_with(&*dir.path().to_string_lossy())));
        assert_eq!(args.last().unwrap(), URL);
    }

    #[test]
    fn ffmpeg_location_is_passed_through_when_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        let variants = command_variants(URL, dir.path(), None, Some(&bin_dir));

        let args: Vec<String> = variants[0]
            .args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        let pos = args.iter().position(|a| a == "--ffmpeg-location").unwrap();
        assert_eq!(args[pos + 1], bin_dir.to_string_lossy());
    }

    #[test]
    fn wav_fallback_picks_the_first_sorted_candidate() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("b.wav"), "").unwrap();
        fs_err::write(dir.path().join("a.wav"), "").unwrap();
        fs_err::write(dir.path().join("notes.txt"), "").unwrap();

        let chosen = find_wav_fallback(dir.path()).unwrap().unwrap();
        assert_eq!(chosen, dir.path().join("a.wav"));
    }

    #[test]
    fn wav_fallback_is_none_without_candidates() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_wav_fallback(dir.path()).unwrap(), None);
    }
}
