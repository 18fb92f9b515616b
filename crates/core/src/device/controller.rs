//! The device worker: a background task that owns the device directory and
//! runs light jobs one at a time.
//!
//! The worker is started on first use. When it reports a context failure, or
//! its task has gone away, it is dropped and the next job starts a fresh one
//! that reloads the device cache.

use super::actuator::{DeviceActuator, DeviceReport, LightAction};
use super::directory::{DEVICE_CACHE_FORMAT, DeviceDirectory};
use super::DeviceConnector;
use crate::cache::CacheStore;
use crate::error::DeviceError;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const JOB_QUEUE: usize = 16;

type JobResult = Result<Vec<DeviceReport>, DeviceError>;

struct Job {
    device: String,
    action: LightAction,
    brightness: u8,
    reply: oneshot::Sender<JobResult>,
}

struct Worker {
    tx: mpsc::Sender<Job>,
    task: JoinHandle<()>,
}

impl Worker {
    fn is_usable(&self) -> bool {
        !self.tx.is_closed() && !self.task.is_finished()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the device worker on behalf of the light command.
pub struct LightController {
    connector: Arc<dyn DeviceConnector>,
    aliases: Vec<(String, String)>,
    cache_path: PathBuf,
    actuator: DeviceActuator,
    worker: Mutex<Option<Worker>>,
    started: AtomicUsize,
}

impl LightController {
    /// Creates a controller. No worker runs until the first job.
    ///
    /// # Arguments
    ///
    /// * `connector` - Discovers and reopens devices for each new worker.
    /// * `aliases` - Human label to IP pairs.
    /// * `cache_path` - The device descriptor cache, reloaded by every worker.
    /// * `actuator` - Applies actions; its fan-out also bounds the directory.
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        aliases: Vec<(String, String)>,
        cache_path: impl Into<PathBuf>,
        actuator: DeviceActuator,
    ) -> Self {
        Self {
            connector,
            aliases,
            cache_path: cache_path.into(),
            actuator,
            worker: Mutex::new(None),
            started: AtomicUsize::new(0),
        }
    }

    /// How many workers have been started so far.
    pub fn workers_started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    fn spawn_worker(&self) -> Worker {
        let generation = self.started.fetch_add(1, Ordering::Relaxed) + 1;
        let cache = CacheStore::load(&self.cache_path, DEVICE_CACHE_FORMAT);
        let mut directory =
            DeviceDirectory::new(self.connector.clone(), self.aliases.clone(), cache)
                .with_fanout(self.actuator.fanout());
        let actuator = self.actuator.clone();
        let (tx, mut rx) = mpsc::channel::<Job>(JOB_QUEUE);

        let task = tokio::spawn(async move {
            debug!(generation, "Device worker started");
            while let Some(job) = rx.recv().await {
                let result = match directory.resolve(&job.device).await {
                    Ok(devices) => Ok(actuator.execute(job.action, job.brightness, devices).await),
                    Err(e) => Err(e),
                };
                if job.reply.send(result).is_err() {
                    debug!("Job requester went away");
                }
            }
            debug!(generation, "Device worker stopped");
        });

        info!(generation, "Started device worker");
        Worker { tx, task }
    }

    /// Resolves `device` and applies `action` on the worker.
    pub async fn run(
        &self,
        device: &str,
        action: LightAction,
        brightness: u8,
    ) -> Result<Vec<DeviceReport>, DeviceError> {
        let mut slot = self.worker.lock().await;
        let usable = slot.as_ref().map(Worker::is_usable).unwrap_or(false);
        if !usable {
            if slot.is_some() {
                warn!("Device worker is gone; restarting");
            }
            *slot = Some(self.spawn_worker());
        }
        let Some(worker) = slot.as_ref() else {
            return Err(DeviceError::WorkerUnavailable);
        };

        let (reply, response) = oneshot::channel();
        let job = Job {
            device: device.to_string(),
            action,
            brightness,
            reply,
        };
        let result = match worker.tx.send(job).await {
            Ok(()) => response.await.unwrap_or(Err(DeviceError::WorkerUnavailable)),
            Err(_) => Err(DeviceError::WorkerUnavailable),
        };

        if let Err(e) = &result {
            if e.is_context_failure() {
                warn!(error = %e, "Discarding device worker");
                *slot = None;
            }
        }
        result
    }
}
