//! Fixed-rate task scheduler shared by every channel source of a tuner.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::Result;

/// Fewest worker threads of an owned runtime
pub const MIN_WORKER_THREADS: usize = 2;

pub struct Scheduler {
    /// Owned runtime, `None` when running on a caller-supplied handle
    runtime: Option<Runtime>,
    handle: Handle,
}

impl Scheduler {
    /// Start a multi-threaded runtime sized to the available cores
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let workers = config
            .worker_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(MIN_WORKER_THREADS)
            })
            .max(MIN_WORKER_THREADS);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("ddc-worker")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        info!(workers, "channel scheduler started");
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Schedule on an existing runtime; its time driver must be enabled
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `task` every `period` until it breaks or the handle is aborted.
    ///
    /// A late tick delays the following ones instead of bursting to catch
    /// up; each invocation runs to completion before cancellation is
    /// observed.
    pub fn schedule_fixed_rate<F>(&self, period: Duration, mut task: F) -> JoinHandle<()>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if task().is_break() {
                    break;
                }
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("owned_runtime", &self.runtime.is_some())
            .finish()
    }
}
