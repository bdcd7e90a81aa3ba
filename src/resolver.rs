use std::env;
use std::path::PathBuf;

use reqwest::Client;
use serenity::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{MusicError, MusicResult};
use crate::track::Track;

/// Resolves a search query or URL into queueable track metadata, and a
/// queued track into a direct audio-stream URL.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Resolved, MusicError>;
    async fn stream_url(&self, track: &Track) -> Result<String, MusicError>;
}

pub struct Resolved {
    pub entries: Vec<Track>,
    pub is_playlist: bool,
}

/// yt-dlp subprocess backend. Queries that are not URLs become
/// `ytsearch:` lookups; playlist URLs are flattened entry by entry with
/// unavailable entries skipped.
pub struct YtDlpResolver;

impl YtDlpResolver {
    async fn dump_json(&self, arg: &str) -> Result<serde_json::Value, MusicError> {
        let output = Command::new("yt-dlp")
            .arg("-J")
            .arg("--no-warnings")
            .arg("--ignore-errors")
            .arg("--flat-playlist")
            .arg(arg)
            .output()
            .await
            .map_err(|e| MusicError::Resolution(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(MusicError::Resolution(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let line = String::from_utf8_lossy(&output.stdout);
        let value: serde_json::Value = serde_json::from_str(line.trim())
            .map_err(|e| MusicError::Resolution(format!("bad yt-dlp JSON: {e}")))?;
        Ok(value)
    }
}

fn entry_to_track(entry: &serde_json::Value) -> Option<Track> {
    if entry.is_null() {
        return None;
    }
    let url = entry
        .get("webpage_url")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            entry
                .get("id")
                .and_then(|v| v.as_str())
                .map(|id| format!("https://www.youtube.com/watch?v={id}"))
        })?;
    let title = entry
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let duration = entry
        .get("duration")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as u64;
    Some(Track::new(url, title, duration))
}

fn is_url(query: &str) -> bool {
    query.starts_with("http://") || query.starts_with("https://")
}

fn looks_like_playlist(query: &str) -> bool {
    query.contains("list=") || query.contains("playlist")
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Resolved, MusicError> {
        let query = query.trim();
        let is_playlist = is_url(query) && looks_like_playlist(query);
        let arg = if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch:{query}")
        };

        let info = self.dump_json(&arg).await?;

        let entries = match info.get("entries").and_then(|v| v.as_array()) {
            // Playlist: take every resolvable entry. Search: the first hit.
            Some(list) if is_playlist => list.iter().filter_map(entry_to_track).collect(),
            Some(list) => list.iter().filter_map(entry_to_track).take(1).collect(),
            None => entry_to_track(&info).into_iter().collect::<Vec<_>>(),
        };

        if entries.is_empty() {
            return Err(MusicError::Resolution(format!("no results for '{query}'")));
        }

        Ok(Resolved { entries, is_playlist })
    }

    /// Re-extracts the track and picks the highest-quality format:
    /// audio-only formats sorted by (abr, asr) descending, falling back to
    /// mixed audio/video formats when no audio-only format exists.
    async fn stream_url(&self, track: &Track) -> Result<String, MusicError> {
        let info = self.dump_json(&track.url).await?;

        let formats = info
            .get("formats")
            .and_then(|v| v.as_array())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| {
                MusicError::Resolution(format!("no audio formats available for '{}'", track.title))
            })?;

        let acodec = |f: &serde_json::Value| {
            f.get("acodec").and_then(|v| v.as_str()).unwrap_or("none").to_string()
        };
        let vcodec = |f: &serde_json::Value| {
            f.get("vcodec").and_then(|v| v.as_str()).unwrap_or("none").to_string()
        };

        let mut audio_only: Vec<&serde_json::Value> = formats
            .iter()
            .filter(|f| acodec(f) != "none" && vcodec(f) == "none")
            .collect();
        if audio_only.is_empty() {
            warn!(title = %track.title, "no audio-only formats found, using mixed formats");
            audio_only = formats.iter().collect();
        }

        let rate = |f: &serde_json::Value, key: &str| {
            f.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
        };
        audio_only.sort_by(|a, b| {
            (rate(b, "abr"), rate(b, "asr"))
                .partial_cmp(&(rate(a, "abr"), rate(a, "asr")))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        audio_only
            .first()
            .and_then(|f| f.get("url"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                MusicError::Resolution(format!("no playable URL found for '{}'", track.title))
            })
    }
}

/// Download yt-dlp into `.bin/` if it is not already there, put `.bin` on
/// PATH, and check that ffmpeg is reachable.
pub async fn ensure_media_tools() -> MusicResult<()> {
    const BIN_DIR: &str = ".bin";
    const YTDLP_BIN: &str = "yt-dlp";
    const YTDLP_URL: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp";

    let ytdlp_path = PathBuf::from(BIN_DIR).join(YTDLP_BIN);

    if fs::metadata(&ytdlp_path).await.is_err() && which_on_path("yt-dlp").is_none() {
        info!("downloading yt-dlp into {BIN_DIR}/");
        fs::create_dir_all(BIN_DIR).await?;
        let bytes = Client::new()
            .get(YTDLP_URL)
            .send()
            .await?
            .error_for_status()?;
        let content = bytes.bytes().await?;
        fs::write(&ytdlp_path, &content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&ytdlp_path).await?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&ytdlp_path, perms).await?;
        }
    }

    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(o) if o.status.success() => {
            info!("ffmpeg found");
        }
        Ok(o) => {
            warn!("ffmpeg exists but failed to run: {}", String::from_utf8_lossy(&o.stderr));
        }
        Err(_) => {
            warn!("ffmpeg not found on PATH, playback may fail");
        }
    }

    prepend_path(BIN_DIR)?;
    Ok(())
}

fn which_on_path(bin: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|p| p.join(bin))
        .find(|p| p.is_file())
}

fn prepend_path(bin: &str) -> MusicResult<()> {
    let bin_path = PathBuf::from(bin);
    let mut paths: Vec<PathBuf> = env::var_os("PATH")
        .map(|p| env::split_paths(&p).collect())
        .unwrap_or_default();

    if !paths.iter().any(|p| p == &bin_path) {
        paths.insert(0, bin_path);
        let new_path = env::join_paths(paths)?;
        unsafe {
            env::set_var("PATH", &new_path);
        }
    }
    Ok(())
}
