use std::path::{Path, PathBuf};
use serde::Deserialize;
use tokio::process::Command;

use crate::error::RipError;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FfprobeData {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: Option<FfprobeFormat>,
}

/// Format-level metadata from ffprobe. Container metadata varies, so
/// every field is optional and ffprobe reports numbers as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub size: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FfprobeStream {
    #[serde(rename = "codec_type")]
    pub codec_type: Option<String>,
    #[serde(rename = "codec_name")]
    pub codec_name: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Probe result for one ripped file, flattened for keeper selection.
/// Recomputed on demand, never persisted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub video_codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Lower-cased codec names in stream order
    pub audio_codecs: Vec<String>,
    pub audio_tracks: usize,
    pub subtitle_tracks: usize,
}

/// Runs ffprobe on single files and flattens the result
#[derive(Debug, Clone)]
pub struct Prober {
    ffprobe_bin: PathBuf,
}

impl Prober {
    pub fn new(ffprobe_bin: PathBuf) -> Self {
        Self { ffprobe_bin }
    }

    /// Probe one file. Fails with [`RipError::ProbeFailure`] if ffprobe
    /// cannot be run, exits non-zero, or returns malformed JSON.
    pub async fn probe(&self, file_path: &Path) -> Result<MediaInfo, RipError> {
        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(file_path)
            .output()
            .await
            .map_err(|e| RipError::ProbeFailure {
                path: file_path.to_path_buf(),
                detail: format!("failed to run {}: {}", self.ffprobe_bin.display(), e),
            })?;

        if !output.status.success() {
            return Err(RipError::ProbeFailure {
                path: file_path.to_path_buf(),
                detail: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let data: FfprobeData =
            serde_json::from_slice(&output.stdout).map_err(|e| RipError::ProbeFailure {
                path: file_path.to_path_buf(),
                detail: format!("unparseable ffprobe JSON: {}", e),
            })?;

        // ffprobe may omit the container size; fall back to the file itself
        let fallback_size = std::fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);

        Ok(flatten_probe(data, file_path, fallback_size))
    }
}

/// Flatten raw ffprobe output into a [`MediaInfo`]. Missing optional
/// fields are treated as unknown/zero.
pub fn flatten_probe(data: FfprobeData, path: &Path, fallback_size: u64) -> MediaInfo {
    let (duration_secs, size_bytes) = match &data.format {
        Some(fmt) => (
            fmt.duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(0.0),
            fmt.size
                .as_deref()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(fallback_size),
        ),
        None => (0.0, fallback_size),
    };

    let mut video_codec = None;
    let mut width = None;
    let mut height = None;
    let mut audio_codecs = Vec::new();
    let mut audio_tracks = 0;
    let mut subtitle_tracks = 0;

    for stream in &data.streams {
        match stream.codec_type.as_deref() {
            Some("video") if video_codec.is_none() => {
                video_codec = stream.codec_name.as_deref().map(str::to_lowercase);
                width = stream.width;
                height = stream.height;
            }
            Some("audio") => {
                audio_tracks += 1;
                if let Some(codec) = &stream.codec_name {
                    audio_codecs.push(codec.to_lowercase());
                }
            }
            Some("subtitle") => {
                subtitle_tracks += 1;
            }
            _ => {}
        }
    }

    MediaInfo {
        path: path.to_path_buf(),
        duration_secs,
        size_bytes,
        video_codec,
        width,
        height,
        audio_codecs,
        audio_tracks,
        subtitle_tracks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> FfprobeData {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn flattens_a_typical_disc_title() {
        let data = parse(
            r#"{
                "streams": [
                    {"codec_type": "video", "codec_name": "H264", "width": 1920, "height": 1080},
                    {"codec_type": "audio", "codec_name": "TrueHD"},
                    {"codec_type": "audio", "codec_name": "ac3"},
                    {"codec_type": "subtitle", "codec_name": "hdmv_pgs_subtitle"},
                    {"codec_type": "subtitle", "codec_name": "hdmv_pgs_subtitle"}
                ],
                "format": {"duration": "5400.021000", "size": "24000000000"}
            }"#,
        );

        let info = flatten_probe(data, Path::new("/rips/title_t00.mkv"), 0);
        assert_eq!(info.duration_secs, 5400.021);
        assert_eq!(info.size_bytes, 24_000_000_000);
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.audio_codecs, vec!["truehd", "ac3"]);
        assert_eq!(info.audio_tracks, 2);
        assert_eq!(info.subtitle_tracks, 2);
    }

    #[test]
    fn missing_fields_become_unknown_or_zero() {
        let data = parse(r#"{"streams": [{"codec_type": "audio"}]}"#);
        let info = flatten_probe(data, Path::new("/rips/odd.mkv"), 123);

        assert_eq!(info.duration_secs, 0.0);
        assert_eq!(info.size_bytes, 123);
        assert_eq!(info.video_codec, None);
        // audio stream with no codec name still counts as a track
        assert_eq!(info.audio_tracks, 1);
        assert!(info.audio_codecs.is_empty());
    }

    #[test]
    fn format_size_falls_back_to_file_size() {
        let data = parse(r#"{"streams": [], "format": {"duration": "10.0"}}"#);
        let info = flatten_probe(data, Path::new("/rips/a.mkv"), 4096);
        assert_eq!(info.size_bytes, 4096);
    }

    #[tokio::test]
    async fn probe_failure_when_tool_is_missing() {
        let prober = Prober::new(PathBuf::from("/nonexistent/ffprobe"));
        let err = prober.probe(Path::new("/nonexistent/file.mkv")).await;
        assert!(matches!(err, Err(RipError::ProbeFailure { .. })));
    }
}
