use std::path::{Path, PathBuf};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::RipError;
use crate::ffprobe::{MediaInfo, Prober};

/// Tunables for main-feature selection.
///
/// The scoring below is a heuristic proxy for "most complete rip among
/// near-duplicates", not a quality measure. Tune it per library; the
/// defaults match a typical movie disc.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperPolicy {
    /// Titles shorter than this are never the main feature
    pub min_feature_secs: f64,
    /// Titles within this many seconds of the longest one compete for
    /// keeper (absorbs near-identical angles/re-encodes)
    pub duration_tolerance_secs: f64,
    /// When titles are labeled "Angle N", angle 1 wins outright
    pub prefer_first_angle: bool,
}

impl Default for KeeperPolicy {
    fn default() -> Self {
        Self {
            min_feature_secs: 45.0 * 60.0,
            duration_tolerance_secs: 2.5,
            prefer_first_angle: true,
        }
    }
}

/// Extract the number of an "angle N" marker from a file name,
/// case-insensitive, optional whitespace before the number.
pub fn angle_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    for (idx, _) in name.match_indices("angle") {
        let rest = name[idx + "angle".len()..].trim_start();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            if let Ok(n) = digits.parse() {
                return Some(n);
            }
        }
    }
    None
}

/// Per-track audio preference points. Substring checks run in priority
/// order, first match wins per track (so "eac3" never scores as "ac3").
fn audio_score(codecs: &[String]) -> u32 {
    let mut score = 0;
    for codec in codecs {
        let c = codec.to_lowercase();
        score += if c.contains("truehd") {
            50
        } else if c.contains("dts") && c.contains("hd") {
            40
        } else if c.contains("dts") {
            30
        } else if c.contains("eac3") || c.contains("ec-3") {
            20
        } else if c.contains("ac3") {
            15
        } else if c.contains("aac") {
            10
        } else {
            5
        };
    }
    score
}

/// Heuristic ranking inside the longest-duration bucket: estimated
/// bitrate dominates, richer audio and more tracks break near-ties.
fn heuristic_score(info: &MediaInfo) -> f64 {
    let bytes_per_sec = info.size_bytes as f64 / info.duration_secs.max(1.0);
    bytes_per_sec / 1_000_000.0
        + f64::from(audio_score(&info.audio_codecs)) / 10.0
        + info.subtitle_tracks as f64 * 0.1
        + info.audio_tracks as f64 * 0.05
}

/// Choose the main feature among probed titles.
///
/// 1. drop titles below the minimum length (none left -> `NoCandidate`);
/// 2. keep only titles within `duration_tolerance_secs` of the longest;
/// 3. a lone survivor wins; otherwise an "angle 1" label wins when
///    `prefer_first_angle` is set; otherwise the highest heuristic score
///    wins, ties broken by input order.
pub fn select_keeper(infos: Vec<MediaInfo>, policy: &KeeperPolicy) -> Result<MediaInfo, RipError> {
    let candidates: Vec<MediaInfo> = infos
        .into_iter()
        .filter(|i| i.duration_secs >= policy.min_feature_secs)
        .collect();
    if candidates.is_empty() {
        return Err(RipError::NoCandidate {
            min_secs: policy.min_feature_secs,
        });
    }

    let max_duration = candidates
        .iter()
        .map(|i| i.duration_secs)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut bucket: Vec<MediaInfo> = candidates
        .into_iter()
        .filter(|i| (max_duration - i.duration_secs).abs() <= policy.duration_tolerance_secs)
        .collect();

    if bucket.len() == 1 {
        return Ok(bucket.remove(0));
    }

    if policy.prefer_first_angle {
        if let Some(first_angle) = bucket.iter().find(|i| angle_number(&i.path) == Some(1)) {
            return Ok(first_angle.clone());
        }
    }

    let mut best: Option<(f64, MediaInfo)> = None;
    for info in bucket {
        let score = heuristic_score(&info);
        match &best {
            Some((best_score, _)) if score <= *best_score => {}
            _ => best = Some((score, info)),
        }
    }
    best.map(|(_, info)| info).ok_or(RipError::NoCandidate {
        min_secs: policy.min_feature_secs,
    })
}

/// Probe every candidate file and select the keeper. Individual probe
/// failures exclude that file from selection but do not fail the item
/// unless nothing remains.
pub async fn pick_keeper(
    prober: &Prober,
    paths: &[PathBuf],
    policy: &KeeperPolicy,
) -> Result<MediaInfo, RipError> {
    let mut infos = Vec::with_capacity(paths.len());
    for path in paths {
        match prober.probe(path).await {
            Ok(info) => infos.push(info),
            Err(e) => warn!("excluding {} from selection: {}", path.display(), e),
        }
    }
    select_keeper(infos, policy)
}
