use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use log::warn;
use serde::Serialize;
use uuid::Uuid;

use crate::config::RipConfig;
use crate::disc::DiscMonitor;
use crate::error::RipError;
use crate::ffprobe::Prober;
use crate::job::{write_job, Job};
use crate::makemkv::MakeMkv;
use crate::pipeline::{self, process_rip_folder, wait_for_idle};
use crate::queue::QueueItem;
use crate::status::{RunObserver, RunStatus, Step, StopSignal};

/// Poll interval of the finalize (idle-folder) wait
const FINALIZE_POLL: Duration = Duration::from_secs(5);

/// Counters for one finished queue run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub stopped: bool,
}

enum ItemOutcome {
    Completed(PathBuf),
    Skipped(&'static str),
    Stopped,
}

struct Reporter<'a> {
    observer: &'a dyn RunObserver,
    status: RunStatus,
}

impl<'a> Reporter<'a> {
    fn new(observer: &'a dyn RunObserver, total: usize) -> Self {
        Self {
            observer,
            status: RunStatus::new(Uuid::new_v4(), total),
        }
    }

    fn set_item(&mut self, current: usize, item: &QueueItem) {
        self.status.current = current;
        self.status.title = Some(item.title.clone());
        self.status.clz_index = Some(item.clz_index);
        self.status.imdb_id = Some(item.imdb_id.clone());
    }

    fn step(&mut self, step: Step, running: bool) {
        self.status.step = step;
        self.status.running = running;
        self.observer.status(&self.status);
    }

    fn log(&self, line: &str) {
        self.observer.log(line);
    }
}

/// Session object owned by the hosting process. Guards against
/// concurrent run starts and owns the stop signal controllers use for
/// cooperative cancellation.
pub struct RunSession {
    active: AtomicBool,
    stop: StopSignal,
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSession {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            stop: StopSignal::new(),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.set();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run the queue. A second start while a run is active is rejected.
    pub async fn run(
        &self,
        cfg: &RipConfig,
        queue: &[QueueItem],
        observer: &dyn RunObserver,
    ) -> Result<RunSummary> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail!("a queue run is already active");
        }
        let _guard = ActiveGuard(&self.active);
        self.stop.clear();
        run_queue(cfg, queue, observer, &self.stop).await
    }
}

struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drive the whole queue, one disc at a time. Per-item failures are
/// logged and skipped; only cancellation ends the run early.
pub async fn run_queue(
    cfg: &RipConfig,
    queue: &[QueueItem],
    observer: &dyn RunObserver,
    stop: &StopSignal,
) -> Result<RunSummary> {
    let mut reporter = Reporter::new(observer, queue.len());
    let mut summary = RunSummary::default();

    if queue.is_empty() {
        reporter.log("Queue is empty. Nothing to do.");
        reporter.step(Step::Done, false);
        return Ok(summary);
    }

    std::fs::create_dir_all(&cfg.rip_prep_root).with_context(|| {
        format!("Failed to create rip prep root: {}", cfg.rip_prep_root.display())
    })?;
    std::fs::create_dir_all(&cfg.staging_root).with_context(|| {
        format!("Failed to create staging root: {}", cfg.staging_root.display())
    })?;

    let makemkv = MakeMkv::new(cfg.makemkv_bin.clone(), cfg.disc_spec.clone());
    let monitor = DiscMonitor::from_config(cfg);
    let prober = Prober::new(cfg.ffprobe_bin.clone());

    reporter.log(&format!("Queue run starting ({} items)", queue.len()));
    reporter.log(&format!("rip prep: {}", cfg.rip_prep_root.display()));
    reporter.log(&format!("staging:  {}", cfg.staging_root.display()));
    reporter.log(&format!(
        "makemkv:  {} ({})",
        cfg.makemkv_bin.display(),
        cfg.disc_spec
    ));

    for (idx, item) in queue.iter().enumerate() {
        if stop.is_set() {
            reporter.step(Step::Stopped, false);
            reporter.log("Stop requested. Ending queue run.");
            summary.stopped = true;
            return Ok(summary);
        }
        reporter.set_item(idx + 1, item);

        match rip_one(cfg, item, &makemkv, &monitor, &prober, &mut reporter, stop).await {
            Ok(ItemOutcome::Completed(dest)) => {
                summary.completed += 1;
                reporter.log(&format!("Done: {}", dest.display()));
            }
            Ok(ItemOutcome::Skipped(reason)) => {
                summary.skipped += 1;
                reporter.log(&format!("Skipped {:?}: {}", item.title, reason));
            }
            Ok(ItemOutcome::Stopped) => {
                reporter.step(Step::Stopped, false);
                reporter.log("Stop requested. Ending queue run.");
                summary.stopped = true;
                return Ok(summary);
            }
            Err(e) => {
                summary.skipped += 1;
                let line = match e.downcast_ref::<RipError>() {
                    Some(RipError::DestinationExists(dest)) => format!(
                        "Destination already exists for {:?}: {} -- keeper left in its rip folder.",
                        item.title,
                        dest.display()
                    ),
                    Some(RipError::NoCandidate { min_secs }) => format!(
                        "No title of {:?} reaches {:.0}s; rip folder kept for inspection.",
                        item.title, min_secs
                    ),
                    _ => format!(
                        "Item {:?} failed: {:#}. Continuing with the next disc.",
                        item.title, e
                    ),
                };
                warn!("{}", line);
                reporter.log(&line);
            }
        }
    }

    reporter.step(Step::Done, false);
    reporter.log("Queue complete.");
    Ok(summary)
}

/// One queue item end-to-end:
/// wait for disc -> rip -> finalize -> move -> eject.
async fn rip_one(
    cfg: &RipConfig,
    item: &QueueItem,
    makemkv: &MakeMkv,
    monitor: &DiscMonitor,
    prober: &Prober,
    reporter: &mut Reporter<'_>,
    stop: &StopSignal,
) -> Result<ItemOutcome> {
    let disc_poll = Duration::from_secs(cfg.disc_poll_secs);
    let removal_poll = Duration::from_secs(cfg.removal_poll_secs);

    let label = match item.year {
        Some(year) => format!("{} ({})", item.title, year),
        None => item.title.clone(),
    };
    reporter.log(&format!(
        "[{}/{}] Insert disc for: {}  clz={} imdb={}",
        reporter.status.current, reporter.status.total, label, item.clz_index, item.imdb_id
    ));
    reporter.step(Step::WaitingForDisc, true);

    // a disc left over from the previous item must leave the drive first,
    // otherwise it would be ripped under this item's identity
    if monitor.disc_present().await {
        reporter.log("A disc is already in the drive. Remove it, then insert the disc for this item.");
        if !monitor
            .wait_for_disc_removed(removal_poll, Duration::ZERO, stop)
            .await
        {
            return Ok(ItemOutcome::Stopped);
        }
    }

    reporter.log("Waiting for disc...");
    if !monitor.wait_for_disc(disc_poll, Duration::ZERO, stop).await {
        return Ok(ItemOutcome::Stopped);
    }

    let folder_name =
        pipeline::rip_folder_name(item.clz_index, &item.title, &pipeline::now_tag());
    let rip_folder = cfg.rip_prep_root.join(folder_name);
    std::fs::create_dir_all(&rip_folder)
        .with_context(|| format!("Failed to create rip folder: {}", rip_folder.display()))?;
    write_job(&rip_folder, &Job::from(item))?;

    reporter.step(Step::Ripping, true);
    reporter.log(&format!("Ripping all titles to {}", rip_folder.display()));
    let rip = makemkv
        .rip_all_titles(&rip_folder, cfg.rip_min_length_secs)
        .await?;
    rip.persist(&rip_folder)?;
    if rip.exit_code != 0 {
        reporter.log(&format!(
            "makemkvcon exited with code {}; output files on disk decide whether the rip counts.",
            rip.exit_code
        ));
    }

    let mkvs = pipeline::list_mkvs(&rip_folder)?;
    if mkvs.is_empty() {
        reporter.log("No MKV output after rip; see the artifacts in the rip folder.");
        if cfg.auto_eject {
            let _ = monitor.eject().await;
        }
        return Ok(ItemOutcome::Skipped("no rip output"));
    }

    reporter.step(Step::Finalizing, true);
    reporter.log("Waiting for the rip folder to go idle...");
    let idle_confirmed = wait_for_idle(
        &rip_folder,
        Duration::from_secs(cfg.idle_secs),
        Duration::from_secs(cfg.finalize_ceiling_secs),
        FINALIZE_POLL,
        stop,
    )
    .await;
    if stop.is_set() {
        return Ok(ItemOutcome::Stopped);
    }
    if !idle_confirmed {
        reporter.log("Folder never settled within the ceiling; proceeding with what is on disk.");
    }

    reporter.step(Step::Moving, true);
    reporter.log("Selecting the main feature and staging it...");
    let dest = process_rip_folder(
        &rip_folder,
        &cfg.staging_root,
        prober,
        &cfg.keeper,
        cfg.move_mode,
    )
    .await?;

    if cfg.auto_eject {
        reporter.step(Step::Ejecting, true);
        let ejected = monitor.eject().await;
        reporter.log("Eject requested. Waiting for the disc to be removed...");
        let removed = monitor
            .wait_for_disc_removed(
                removal_poll,
                Duration::from_secs(cfg.eject_confirm_secs),
                stop,
            )
            .await;
        if stop.is_set() {
            return Ok(ItemOutcome::Stopped);
        }
        if !ejected || !removed {
            // unattended operation: pause and keep polling instead of
            // assuming; the operator pulling the disc is the acknowledgement
            reporter.log(
                "Warning: eject could not be confirmed. Remove the disc manually; the run continues once the drive reads empty.",
            );
            if !monitor
                .wait_for_disc_removed(removal_poll, Duration::ZERO, stop)
                .await
            {
                return Ok(ItemOutcome::Stopped);
            }
        }
        reporter.log("Disc removed.");
    }

    Ok(ItemOutcome::Completed(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use crate::status::NullObserver;

    struct CollectingObserver {
        steps: Mutex<Vec<Step>>,
    }

    impl CollectingObserver {
        fn new() -> Self {
            Self {
                steps: Mutex::new(Vec::new()),
            }
        }
    }

    impl RunObserver for CollectingObserver {
        fn status(&self, status: &RunStatus) {
            self.steps.lock().unwrap().push(status.step);
        }
        fn log(&self, _line: &str) {}
    }

    fn test_config(prep: &std::path::Path, staging: &std::path::Path) -> RipConfig {
        let mut cfg = RipConfig::default();
        cfg.rip_prep_root = prep.to_path_buf();
        cfg.staging_root = staging.to_path_buf();
        cfg.makemkv_bin = PathBuf::from("/nonexistent/makemkvcon");
        cfg.ffprobe_bin = PathBuf::from("/nonexistent/ffprobe");
        cfg.drive_mount = PathBuf::from("/nonexistent/mount");
        cfg.disc_poll_secs = 1;
        cfg.removal_poll_secs = 1;
        cfg.info_timeout_secs = 1;
        cfg
    }

    fn item(clz: u32, title: &str) -> QueueItem {
        QueueItem {
            clz_index: clz,
            title: title.to_string(),
            year: Some(1979),
            imdb_id: "tt0078748".to_string(),
        }
    }

    /// Fake makemkvcon: first info call reports an empty drive, later
    /// calls report one title; the rip call produces no files.
    #[cfg(unix)]
    fn fake_makemkvcon(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("makemkvcon");
        std::fs::write(
            &bin,
            "#!/bin/sh\n\
             d=\"$(dirname \"$0\")\"\n\
             n=$(cat \"$d/calls\" 2>/dev/null || echo 0)\n\
             echo $((n+1)) > \"$d/calls\"\n\
             if [ \"$2\" = \"info\" ] && [ \"$n\" -ge 1 ]; then\n\
               echo \"TCOUNT:1\"\n\
             fi\n\
             exit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop_success() {
        let prep = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let cfg = test_config(prep.path(), staging.path());

        let observer = CollectingObserver::new();
        let stop = StopSignal::new();
        let summary = run_queue(&cfg, &[], &observer, &stop).await.unwrap();

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.skipped, 0);
        assert!(!summary.stopped);
        assert_eq!(*observer.steps.lock().unwrap(), vec![Step::Done]);
    }

    #[tokio::test]
    async fn preset_stop_ends_the_run_with_stopped_status() {
        let prep = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let cfg = test_config(prep.path(), staging.path());

        let observer = CollectingObserver::new();
        let stop = StopSignal::new();
        stop.set();
        let summary = run_queue(&cfg, &[item(1, "Alien")], &observer, &stop)
            .await
            .unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.completed, 0);
        assert_eq!(observer.steps.lock().unwrap().last(), Some(&Step::Stopped));
    }

    #[tokio::test]
    async fn stop_while_waiting_for_disc_lands_within_a_poll() {
        let prep = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let cfg = test_config(prep.path(), staging.path());

        let session = Arc::new(RunSession::new());
        let runner = {
            let session = session.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move {
                session.run(&cfg, &[item(1, "Alien")], &NullObserver).await
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(session.is_active());
        session.request_stop();

        let summary = runner.await.unwrap().unwrap();
        assert!(summary.stopped);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let prep = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let cfg = test_config(prep.path(), staging.path());

        let session = Arc::new(RunSession::new());
        let runner = {
            let session = session.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move {
                session.run(&cfg, &[item(1, "Alien")], &NullObserver).await
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        let err = session
            .run(&cfg, &[item(2, "Aliens")], &NullObserver)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already active"));

        session.request_stop();
        runner.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rip_with_zero_outputs_skips_and_finishes_the_run() {
        let tools = tempfile::tempdir().unwrap();
        let prep = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let mut cfg = test_config(prep.path(), staging.path());
        cfg.makemkv_bin = fake_makemkvcon(tools.path());
        cfg.auto_eject = false;

        let observer = CollectingObserver::new();
        let stop = StopSignal::new();
        let summary = run_queue(&cfg, &[item(10, "Alien")], &observer, &stop)
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed, 0);
        assert_eq!(observer.steps.lock().unwrap().last(), Some(&Step::Done));

        // the rip folder exists, is marked, holds artifacts, and has no receipt
        let folders: Vec<_> = std::fs::read_dir(prep.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(folders.len(), 1);
        let rip_folder = folders[0].path();
        assert!(rip_folder.join(crate::job::JOB_FILENAME).exists());
        assert!(rip_folder.join("_makemkv_exitcode.txt").exists());
        assert!(!rip_folder.join(crate::job::RECEIPT_FILENAME).exists());
    }
}
