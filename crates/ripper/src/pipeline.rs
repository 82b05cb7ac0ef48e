use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::MoveMode;
use crate::error::RipError;
use crate::ffprobe::{MediaInfo, Prober};
use crate::job::{load_job, write_receipt, Job, Receipt};
use crate::keeper::{pick_keeper, KeeperPolicy};
use crate::status::StopSignal;

/// Replace filesystem-illegal characters with underscores, collapse runs
/// of blanks, trim. Idempotent.
pub fn sanitize_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if "<>:\"/\\|?*".contains(c) { '_' } else { c })
        .collect();
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }
    out.trim().to_string()
}

/// Plex-safe base name: the catalog id rides in [brackets] and the IMDb
/// tag in {curly braces}, both ignored by Plex for display but parseable
/// downstream for identity.
pub fn plex_base_name(job: &Job) -> String {
    let mut base = job.title.clone();
    if let Some(year) = job.year {
        base.push_str(&format!(" ({})", year));
    }
    base.push_str(&format!(" [clz-{}]", job.clz_index));
    base.push_str(&format!(" {{imdb-{}}}", job.imdb_id));
    sanitize_name(&base)
}

/// Timestamp tag for rip folder names
pub fn now_tag() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Per-disc working folder name: sanitized `clz_title_timestamp`
pub fn rip_folder_name(clz_index: u32, title: &str, tag: &str) -> String {
    sanitize_name(&format!("{}_{}_{}", clz_index, title, tag))
}

/// True when no file under the folder was modified within the idle
/// window. An empty folder is never idle.
pub fn is_idle(folder: &Path, idle: Duration) -> bool {
    let mut latest: Option<SystemTime> = None;
    for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if let Ok(modified) = meta.modified() {
                latest = Some(match latest {
                    Some(seen) if seen >= modified => seen,
                    _ => modified,
                });
            }
        }
    }

    match latest {
        Some(newest) => SystemTime::now()
            .duration_since(newest)
            .map(|age| age >= idle)
            .unwrap_or(false),
        None => false,
    }
}

/// Poll until the folder goes idle, bounded by a safety ceiling.
///
/// Best-effort: this absorbs delayed writes by the rip tool, it does not
/// guarantee the tool is finished. Returns true when idleness was
/// confirmed; on a ceiling hit the caller proceeds with what is on disk.
/// A set stop signal also returns false -- callers check it separately.
pub async fn wait_for_idle(
    folder: &Path,
    idle: Duration,
    ceiling: Duration,
    poll: Duration,
    stop: &StopSignal,
) -> bool {
    let deadline = tokio::time::Instant::now() + ceiling;
    loop {
        if stop.is_set() {
            return false;
        }
        if is_idle(folder, idle) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// MKV files directly inside the rip folder, sorted for a deterministic
/// probe order
pub fn list_mkvs(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut mkvs = Vec::new();
    let entries = std::fs::read_dir(folder)
        .with_context(|| format!("Failed to read rip folder: {}", folder.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_mkv = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("mkv"))
            .unwrap_or(false);
        if is_mkv && path.is_file() {
            mkvs.push(path);
        }
    }
    mkvs.sort();
    Ok(mkvs)
}

/// Place the keeper into `staging_root/<base>/<base>.<ext>`.
/// Never overwrites: an existing destination fails the move and leaves
/// the source in the rip folder.
pub fn stage_keeper(
    staging_root: &Path,
    job: &Job,
    keeper: &MediaInfo,
    mode: MoveMode,
) -> Result<PathBuf> {
    let base = plex_base_name(job);
    let dest_dir = staging_root.join(&base);
    std::fs::create_dir_all(&dest_dir)
        .with_context(|| format!("Failed to create destination: {}", dest_dir.display()))?;

    let ext = keeper
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mkv");
    let dest = dest_dir.join(format!("{}.{}", base, ext));
    if dest.exists() {
        return Err(RipError::DestinationExists(dest).into());
    }

    match mode {
        MoveMode::Copy => {
            std::fs::copy(&keeper.path, &dest).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    keeper.path.display(),
                    dest.display()
                )
            })?;
        }
        MoveMode::Move => {
            if let Err(e) = std::fs::rename(&keeper.path, &dest) {
                // rename fails across filesystems; fall back to copy + delete
                debug!("rename failed ({}), copying instead", e);
                std::fs::copy(&keeper.path, &dest).with_context(|| {
                    format!(
                        "Failed to copy {} to {}",
                        keeper.path.display(),
                        dest.display()
                    )
                })?;
                std::fs::remove_file(&keeper.path).with_context(|| {
                    format!("Failed to remove source: {}", keeper.path.display())
                })?;
            }
        }
    }

    Ok(dest)
}

/// Finalize one rip folder: read the job marker back, select the keeper
/// among the ripped titles, stage it, write the receipt.
pub async fn process_rip_folder(
    rip_folder: &Path,
    staging_root: &Path,
    prober: &Prober,
    policy: &KeeperPolicy,
    mode: MoveMode,
) -> Result<PathBuf> {
    let job: Job = load_job(rip_folder)?
        .ok_or_else(|| RipError::MissingJobMarker(rip_folder.to_path_buf()))?;

    let mkvs = list_mkvs(rip_folder)?;
    if mkvs.is_empty() {
        return Err(RipError::NoRipOutput(rip_folder.to_path_buf()).into());
    }

    let keeper = pick_keeper(prober, &mkvs, policy).await?;
    info!(
        "keeper for clz-{}: {} ({:.0}s, {} bytes)",
        job.clz_index,
        keeper.path.display(),
        keeper.duration_secs,
        keeper.size_bytes
    );

    let dest = stage_keeper(staging_root, &job, &keeper, mode)?;

    let receipt = Receipt {
        rip_folder: rip_folder.to_path_buf(),
        keeper_source: keeper.path.clone(),
        keeper_dest: dest.clone(),
        clz_index: job.clz_index,
        title: job.title.clone(),
        year: job.year,
        imdb_id: job.imdb_id.clone(),
        completed_at: chrono::Utc::now(),
    };
    if let Err(e) = write_receipt(rip_folder, &receipt) {
        // the move itself succeeded; a failed receipt is worth a warning,
        // not a skipped item
        warn!("{:#}", e);
    }

    Ok(dest)
}
