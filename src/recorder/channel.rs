//! Sampling channels
//!
//! Every registered source runs on its own thread. The thread ticks the
//! source at its nominal period, timestamps each payload against the session
//! clock and appends it to the source's buffer. Stop is cooperative: the flag
//! is checked before each tick and wakes the inter-tick wait.

use super::buffer::{BufferError, SharedBuffer};
use super::state::SourceConfig;
use crate::capture::{Source, SourceError};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;

/// Rejections at registration time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("source '{0}' is already registered")]
    DuplicateName(String),

    #[error("source '{name}' has invalid frequency {frequency} Hz (must be > 0 with a representable period)")]
    InvalidFrequency { name: String, frequency: f64 },

    #[error("source name must not be empty")]
    EmptyName,

    #[error("cannot register '{0}': session is no longer accepting sources")]
    SessionClosed(String),

    #[error("failed to spawn sampler for '{name}': {message}")]
    Spawn { name: String, message: String },
}

/// Lifecycle misuse and I/O failures of the session itself
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session is not running")]
    NotRunning,

    #[error("Session already saved; create a new session for another run")]
    AlreadySaved,

    #[error("Output directory {0:?} already holds a saved session")]
    OutputExists(PathBuf),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Stop flag shared by the supervisor and all samplers
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiting sampler
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep until `deadline` or until stop is triggered.
    ///
    /// Returns `true` when stop was triggered.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock();
        while !*stopped {
            if cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Counters reported by a sampler when it exits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerExit {
    pub ticks: u64,
    pub failed_polls: u64,
    pub last_failure: Option<String>,
}

/// Supervisor-side handle of a running sampler
pub struct SamplerHandle {
    pub(crate) name: String,
    pub(crate) done: oneshot::Receiver<WorkerExit>,
    // Never joined directly; dropping it detaches stragglers.
    pub(crate) _thread: JoinHandle<()>,
}

/// Spawn the sampling loop for one source
pub(crate) fn spawn_sampler(
    config: &SourceConfig,
    mut source: Box<dyn Source>,
    buffer: SharedBuffer,
    clock: Instant,
    stop: StopSignal,
) -> Result<SamplerHandle, RegistrationError> {
    let (done_tx, done) = oneshot::channel();
    let name = config.name.clone();
    let frequency = config.frequency;
    let period = config.period().ok_or_else(|| RegistrationError::InvalidFrequency {
        name: name.clone(),
        frequency,
    })?;

    let thread_name = name.clone();
    let thread = std::thread::Builder::new()
        .name(format!("sampler-{}", name))
        .spawn(move || {
            tracing::info!("Sampling '{}' @ {} Hz", thread_name, frequency);
            let mut exit = WorkerExit::default();

            while !stop.is_triggered() {
                let tick_start = Instant::now();
                exit.ticks += 1;

                let rejection = match source.poll() {
                    Ok(payload) => {
                        let timestamp = clock.elapsed();
                        match buffer.lock().push(timestamp, payload) {
                            Ok(()) => None,
                            // Flush already happened; nothing may be added now.
                            Err(BufferError::Sealed) => break,
                            Err(e @ (BufferError::KindMismatch { .. } | BufferError::ShapeMismatch(_))) => {
                                Some(SourceError::UnexpectedPayload(e.to_string()).to_string())
                            }
                            Err(e) => Some(e.to_string()),
                        }
                    }
                    Err(e) => Some(e.to_string()),
                };

                if let Some(message) = rejection {
                    exit.failed_polls += 1;
                    if exit.failed_polls == 1 || exit.failed_polls % 100 == 0 {
                        tracing::warn!(
                            "'{}' tick {} skipped ({} failures so far): {}",
                            thread_name,
                            exit.ticks,
                            exit.failed_polls,
                            message
                        );
                    }
                    exit.last_failure = Some(message);
                }

                if exit.ticks % 500 == 0 {
                    tracing::debug!(
                        "'{}' completed {} ticks ({:.1}s)",
                        thread_name,
                        exit.ticks,
                        clock.elapsed().as_secs_f64()
                    );
                }

                // An overrun leaves the deadline in the past: the next tick
                // starts right away and missed ticks are not replayed.
                if stop.wait_until(tick_start + period) {
                    break;
                }
            }

            tracing::info!(
                "'{}' sampler stopped after {} ticks ({} failed)",
                thread_name,
                exit.ticks,
                exit.failed_polls
            );
            let _ = done_tx.send(exit);
        })
        .map_err(|e| RegistrationError::Spawn {
            name: name.clone(),
            message: e.to_string(),
        })?;

    Ok(SamplerHandle {
        name,
        done,
        _thread: thread,
    })
}
