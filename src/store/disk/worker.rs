//! Disk Tier Worker
//!
//! One background thread per disk tier. It wakes on a fixed tick to drain
//! the spool, runs an expiry sweep at a coarser interval, and answers
//! `Flush`/`Stop` commands sent over its channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use super::DiskInner;
use crate::error::{Error, Result};

/// Default bound on how long shutdown waits for the worker
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Requests a foreground thread can make of the worker
#[derive(Debug)]
pub enum Command {
    /// Drain the spool, persist the index if dirty, then acknowledge
    Flush(Sender<Result<()>>),
    /// Exit the loop
    Stop,
}

/// Signals the owner when the worker thread exits, even by panic
struct ExitSignal {
    alive: Arc<AtomicBool>,
    done: Sender<()>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.done.send(());
    }
}

/// Owner's side of a running worker
#[derive(Debug)]
pub struct WorkerHandle {
    store: String,
    commands: Sender<Command>,
    done: Receiver<()>,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start the worker thread for `inner`
    pub(crate) fn spawn(inner: Arc<DiskInner>) -> Result<Self> {
        let store = inner.name().to_string();
        let (commands_tx, commands_rx) = channel::unbounded();
        let (done_tx, done_rx) = channel::bounded(1);
        let alive = Arc::new(AtomicBool::new(true));

        let signal = ExitSignal {
            alive: alive.clone(),
            done: done_tx,
        };

        let thread = thread::Builder::new()
            .name(format!("{} disk worker", store))
            .spawn(move || {
                let _signal = signal;
                run(inner, commands_rx);
            })
            .map_err(|e| Error::Construction {
                store: store.clone(),
                reason: format!("cannot start disk worker: {}", e),
            })?;

        Ok(Self {
            store,
            commands: commands_tx,
            done: done_rx,
            alive,
            thread: Some(thread),
        })
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Ask the worker to flush and wait for its answer
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::WorkerUnavailable(self.store.clone()));
        }

        let (ack_tx, ack_rx) = channel::bounded(1);
        self.commands
            .send(Command::Flush(ack_tx))
            .map_err(|_| Error::WorkerUnavailable(self.store.clone()))?;

        match ack_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::WorkerTimeout {
                store: self.store.clone(),
                millis: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::WorkerUnavailable(self.store.clone()))
            }
        }
    }

    /// Stop the worker, waiting at most `timeout` for it to exit
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        let _ = self.commands.send(Command::Stop);

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!(store = %self.store, "Disk worker exited by panic");
                    }
                }
                debug!(store = %self.store, "Disk worker stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                // Leave the thread detached; joining could block forever
                self.thread.take();
                Err(Error::WorkerTimeout {
                    store: self.store.clone(),
                    millis: timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn run(inner: Arc<DiskInner>, commands: Receiver<Command>) {
    let ticker = channel::tick(inner.spool_interval());
    let expiry_interval = inner.expiry_interval();
    let mut last_expiry = Instant::now();

    info!(store = %inner.name(), "Disk worker started");

    loop {
        channel::select! {
            recv(commands) -> command => match command {
                Ok(Command::Flush(ack)) => {
                    let result = guarded(&inner, "flush", || inner.flush_now());
                    let _ = ack.send(result);
                }
                Ok(Command::Stop) | Err(_) => break,
            },
            recv(ticker) -> _ => {
                let _ = guarded(&inner, "spool drain", || {
                    inner.drain_spool();
                    Ok(())
                });

                if let Some(interval) = expiry_interval {
                    if last_expiry.elapsed() >= interval {
                        let _ = guarded(&inner, "expiry sweep", || {
                            inner.expire_now();
                            Ok(())
                        });
                        last_expiry = Instant::now();
                    }
                }
            }
        }
    }

    info!(store = %inner.name(), "Disk worker exiting");
}

/// Run one unit of work, keeping the loop alive if it panics
#[instrument(level = "trace", skip(inner, work), fields(store = %inner.name()))]
fn guarded<F>(inner: &DiskInner, task: &str, work: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(_) => {
            error!(store = %inner.name(), task, "Disk worker task panicked");
            Err(Error::WorkerUnavailable(inner.name().to_string()))
        }
    }
}
