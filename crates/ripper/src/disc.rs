use std::path::PathBuf;
use std::time::Duration;
use log::debug;
use tokio::process::Command;
use tokio::time::Instant;

use crate::config::RipConfig;
use crate::makemkv::{has_info_markers, parse_title_count, MakeMkv};
use crate::status::StopSignal;

/// Detects disc insertion/removal by polling MakeMKV, with a mount-point
/// fallback for the race where the info call times out while the OS has
/// already mounted the disc.
#[derive(Debug, Clone)]
pub struct DiscMonitor {
    makemkv: MakeMkv,
    drive_mount: PathBuf,
    info_timeout: Duration,
}

impl DiscMonitor {
    pub fn new(makemkv: MakeMkv, drive_mount: PathBuf, info_timeout: Duration) -> Self {
        Self {
            makemkv,
            drive_mount,
            info_timeout,
        }
    }

    pub fn from_config(cfg: &RipConfig) -> Self {
        Self::new(
            MakeMkv::new(cfg.makemkv_bin.clone(), cfg.disc_spec.clone()),
            cfg.drive_mount.clone(),
            Duration::from_secs(cfg.info_timeout_secs),
        )
    }

    /// One presence check.
    ///
    /// A `TCOUNT:` field answers definitively; other info markers count as
    /// present (lenient fallback). The mount point is consulted only when
    /// the info call timed out, because only then did the tool fail to
    /// answer at all. Tool failures read as absent and are retried by the
    /// surrounding poll loop.
    pub async fn disc_present(&self) -> bool {
        let probe = self.makemkv.info(self.info_timeout).await;

        if let Some(count) = parse_title_count(&probe.text) {
            return count > 0;
        }
        if has_info_markers(&probe.text) {
            return true;
        }
        if probe.timed_out && self.mount_has_media() {
            return true;
        }
        false
    }

    /// A mounted disc shows up as entries under the drive's mount point;
    /// an empty or missing mount directory reads as no media.
    fn mount_has_media(&self) -> bool {
        match std::fs::read_dir(&self.drive_mount) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }

    /// Poll until a disc appears. `max_wait` of zero means wait until
    /// cancellation. Returns false on timeout or stop.
    pub async fn wait_for_disc(
        &self,
        poll: Duration,
        max_wait: Duration,
        stop: &StopSignal,
    ) -> bool {
        let deadline = (max_wait > Duration::ZERO).then(|| Instant::now() + max_wait);
        loop {
            if stop.is_set() {
                return false;
            }
            if self.disc_present().await {
                return true;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Poll until the drive reads empty. `timeout` of zero means wait
    /// until cancellation. Returns false on timeout or stop.
    pub async fn wait_for_disc_removed(
        &self,
        poll: Duration,
        timeout: Duration,
        stop: &StopSignal,
    ) -> bool {
        let deadline = (timeout > Duration::ZERO).then(|| Instant::now() + timeout);
        loop {
            if stop.is_set() {
                return false;
            }
            if !self.disc_present().await {
                return true;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Best-effort eject: MakeMKV first, the OS eject utility as a
    /// fallback. Reports whether either appeared to succeed; callers
    /// confirm by watching for removal.
    pub async fn eject(&self) -> bool {
        let via_makemkv = self.makemkv.eject().await;

        let via_os = match Command::new("eject").arg(&self.drive_mount).output().await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("eject utility did not run: {}", e);
                false
            }
        };

        via_makemkv || via_os
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_monitor(drive_mount: PathBuf) -> DiscMonitor {
        // tool spawn fails instantly, so every info call reads "absent"
        DiscMonitor::new(
            MakeMkv::new(PathBuf::from("/nonexistent/makemkvcon"), "disc:0".into()),
            drive_mount,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn tool_failure_reads_as_absent() {
        let monitor = offline_monitor(PathBuf::from("/nonexistent/mount"));
        assert!(!monitor.disc_present().await);
    }

    #[tokio::test]
    async fn mount_fallback_only_applies_on_timeout() {
        // the mount dir exists and has entries, but the info call failed
        // to spawn rather than timing out, so it must not count
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("BDMV"), "").unwrap();
        let monitor = offline_monitor(dir.path().to_path_buf());
        assert!(!monitor.disc_present().await);
    }

    #[tokio::test]
    async fn wait_for_disc_times_out() {
        let monitor = offline_monitor(PathBuf::from("/nonexistent/mount"));
        let stop = StopSignal::new();
        let found = monitor
            .wait_for_disc(
                Duration::from_millis(10),
                Duration::from_millis(50),
                &stop,
            )
            .await;
        assert!(!found);
    }

    #[tokio::test]
    async fn wait_for_disc_stops_within_one_poll() {
        let monitor = offline_monitor(PathBuf::from("/nonexistent/mount"));
        let stop = StopSignal::new();
        stop.set();
        let started = std::time::Instant::now();
        let found = monitor
            .wait_for_disc(Duration::from_secs(60), Duration::ZERO, &stop)
            .await;
        assert!(!found);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn removal_confirms_immediately_when_drive_is_empty() {
        let monitor = offline_monitor(PathBuf::from("/nonexistent/mount"));
        let stop = StopSignal::new();
        let removed = monitor
            .wait_for_disc_removed(
                Duration::from_millis(10),
                Duration::from_millis(100),
                &stop,
            )
            .await;
        assert!(removed);
    }
}
