//! Named one-shot timers per ECU
//!
//! Each timer is a sleeping task. When it fires it hands its callback to the
//! ECU's timer worker, which runs callbacks one after another, outside any
//! connection task. Re-adding a name cancels the previous timer.
//!
//! An entry stays in the table until the worker takes its job, so a timer
//! that fired but whose callback is still queued can be replaced or
//! cancelled like one that is still sleeping.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::ecu::SimEcu;

pub type TimerHandler = Box<dyn FnOnce(&SimEcu) + Send>;

type TimerTable = Arc<Mutex<HashMap<String, TimerEntry>>>;

struct TimerEntry {
    task: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl TimerEntry {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.task.abort();
    }
}

struct TimerJob {
    name: String,
    cancelled: Arc<AtomicBool>,
    handler: TimerHandler,
}

pub(crate) struct TimerManager {
    owner: Weak<SimEcu>,
    timers: TimerTable,
    worker: Mutex<Option<mpsc::UnboundedSender<TimerJob>>>,
}

impl TimerManager {
    pub(crate) fn new(owner: Weak<SimEcu>) -> Self {
        Self {
            owner,
            timers: Arc::new(Mutex::new(HashMap::new())),
            worker: Mutex::new(None),
        }
    }

    /// Must be called from within a Tokio runtime
    pub(crate) fn add_or_replace(&self, name: &str, delay: Duration, handler: TimerHandler) {
        let jobs = self.worker_sender();
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = TimerJob {
            name: name.to_string(),
            cancelled: cancelled.clone(),
            handler,
        };

        // Spawn under the lock so the worker cannot claim the job before
        // its entry exists
        let mut timers = self.timers.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let name = job.name.clone();
            if jobs.send(job).is_err() {
                debug!(timer = %name, "Timer worker gone, dropping callback");
            }
        });
        let previous = timers.insert(name.to_string(), TimerEntry { task, cancelled });
        drop(timers);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub(crate) fn cancel(&self, name: &str) -> bool {
        match self.timers.lock().remove(name) {
            Some(entry) => {
                entry.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) {
        for (_, entry) in self.timers.lock().drain() {
            entry.cancel();
        }
    }

    /// Names of timers whose callback has not started yet
    pub(crate) fn active(&self) -> Vec<String> {
        let mut names: Vec<_> = self.timers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn worker_sender(&self) -> mpsc::UnboundedSender<TimerJob> {
        let mut worker = self.worker.lock();
        if let Some(jobs) = worker.as_ref().filter(|jobs| !jobs.is_closed()) {
            return jobs.clone();
        }
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(self.owner.clone(), self.timers.clone(), rx));
        *worker = Some(jobs.clone());
        jobs
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Remove the entry `job` belongs to. False when the job was cancelled or
/// replaced in the meantime.
fn claim(timers: &TimerTable, job: &TimerJob) -> bool {
    let mut timers = timers.lock();
    if job.cancelled.load(Ordering::Acquire) {
        return false;
    }
    match timers.get(&job.name) {
        Some(entry) if Arc::ptr_eq(&entry.cancelled, &job.cancelled) => {
            timers.remove(&job.name);
            true
        }
        _ => false,
    }
}

async fn run_worker(
    owner: Weak<SimEcu>,
    timers: TimerTable,
    mut jobs: mpsc::UnboundedReceiver<TimerJob>,
) {
    while let Some(job) = jobs.recv().await {
        if !claim(&timers, &job) {
            continue;
        }
        let Some(ecu) = owner.upgrade() else {
            break;
        };

        debug!(ecu = %ecu.name(), timer = %job.name, "Timer fired");
        let handler = job.handler;
        if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&ecu))).is_err() {
            error!(ecu = %ecu.name(), timer = %job.name, "Timer callback panicked");
        }
    }
}
