use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the run currently is for the active queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    WaitingForDisc,
    Ripping,
    Finalizing,
    Moving,
    Ejecting,
    Done,
    Stopped,
}

/// Flat progress record pushed to observers on every state transition.
/// Lives for one queue run and is discarded afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub step: Step,
    pub running: bool,
    pub current: usize,
    pub total: usize,
    pub title: Option<String>,
    pub clz_index: Option<u32>,
    pub imdb_id: Option<String>,
}

impl RunStatus {
    pub fn new(run_id: Uuid, total: usize) -> Self {
        Self {
            run_id,
            step: Step::WaitingForDisc,
            running: false,
            current: 0,
            total,
            title: None,
            clz_index: None,
            imdb_id: None,
        }
    }
}

/// Status and log sink for a queue run. Implementations are called
/// synchronously from the worker and must not block.
pub trait RunObserver: Send + Sync {
    fn status(&self, status: &RunStatus);
    fn log(&self, line: &str);
}

/// Default observer: human-readable lines through the `log` facade,
/// status transitions at debug level.
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn status(&self, status: &RunStatus) {
        debug!(
            "status: step={:?} running={} item {}/{}",
            status.step, status.running, status.current, status.total
        );
    }

    fn log(&self, line: &str) {
        info!("{}", line);
    }
}

/// Observer that swallows everything
pub struct NullObserver;

impl RunObserver for NullObserver {
    fn status(&self, _status: &RunStatus) {}
    fn log(&self, _line: &str) {}
}

/// Shared cooperative cancellation flag, checked at every wait/poll
/// boundary. Never preemptive: a set signal takes effect at the next
/// boundary, leaving on-disk state intact.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
