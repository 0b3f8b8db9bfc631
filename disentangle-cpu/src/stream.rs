//! FIFO execution stream backed by one worker thread.
//!
//! Jobs run in submission order. A failing job records a sticky error: the
//! remaining queued jobs are skipped and new submissions are refused until
//! [`CpuStream::synchronize`] reports and clears it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use disentangle::{Error, Result};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Default)]
struct Shared {
    pending: Mutex<usize>,
    idle: Condvar,
    error: Mutex<Option<Error>>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error(&self) -> MutexGuard<'_, Option<Error>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, e: Error) {
        log::error!("stream job failed: {e}");
        let mut slot = self.error();
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    fn finish_one(&self) {
        let mut pending = self.pending();
        *pending -= 1;
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn run(&self, job: Job) {
        if self.error().is_some() {
            log::debug!("skipping queued job after earlier failure");
            return;
        }
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.record(e),
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.record(Error::Stream(format!("job panicked: {msg}")));
            }
        }
    }
}

/// Ordered queue of host kernel launches.
pub struct CpuStream {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl CpuStream {
    /// Start the worker thread.
    ///
    /// # Errors
    /// Returns `Stream` if the thread cannot be spawned.
    pub fn new() -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("disentangle-cpu-stream".to_string())
            .spawn(move || {
                for job in receiver {
                    worker_shared.run(job);
                    worker_shared.finish_one();
                }
            })
            .map_err(|e| Error::Stream(format!("failed to spawn stream worker: {e}")))?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            shared,
        })
    }

    /// Queue `job` behind everything already submitted. Returns without
    /// waiting for it to run.
    ///
    /// # Errors
    /// Returns `Stream` if an earlier job failed and the error has not been
    /// collected by [`synchronize`](Self::synchronize), or if the worker is gone.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if let Some(e) = &*self.shared.error() {
            return Err(Error::Stream(format!("stream has a pending error: {e}")));
        }
        let Some(sender) = &self.sender else {
            return Err(Error::Stream("stream is shut down".to_string()));
        };
        *self.shared.pending() += 1;
        if sender.send(Box::new(job)).is_err() {
            self.shared.finish_one();
            return Err(Error::Stream("stream worker exited".to_string()));
        }
        Ok(())
    }

    /// Block until every submitted job has finished, then return and clear
    /// the first error any of them raised.
    ///
    /// # Errors
    /// Returns the first failure recorded since the last call.
    pub fn synchronize(&self) -> Result<()> {
        let mut pending = self.shared.pending();
        while *pending > 0 {
            pending = self
                .shared
                .idle
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(pending);
        match self.shared.error().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Message of the recorded failure, if any, without clearing it
    #[must_use]
    pub fn peek_error(&self) -> Option<String> {
        self.shared.error().as_ref().map(ToString::to_string)
    }
}

impl Drop for CpuStream {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("stream worker panicked during shutdown");
            }
        }
    }
}
