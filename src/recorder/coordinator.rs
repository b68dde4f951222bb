//! Collection session
//!
//! Owns the registered sources, their samplers and buffers, and drives the
//! lifecycle Idle -> Running -> Stopping -> Saved. Every way of ending a run
//! (explicit call, Ctrl-C, [`StopHandle`], fixed duration) goes through
//! [`Session::stop`].

use super::buffer::{SealedBuffer, SharedBuffer, SourceBuffer};
use super::channel::{
    spawn_sampler, RegistrationError, SamplerHandle, SessionError, SessionResult, StopSignal,
    WorkerExit,
};
use super::state::{
    codes, CollectorConfig, ReportedError, SessionReport, SessionState, SourceConfig, SourceReport,
};
use crate::capture::{Source, SourceKind};
use crate::export::{EncodeJob, EncodedStream, VideoPipeline};
use crate::store::{
    is_valid_session, write_group, write_metadata, GroupMeta, PersistenceError, SessionLayout,
    SessionMetadata, SourceEntry, VideoParams, SESSION_VERSION,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};

/// Events emitted during a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started,
    SourceRegistered(String),
    Stopping,
    Saved,
    /// A source or stage reported an error while stopping
    Error(String),
}

/// Requests a stop from any thread or task
#[derive(Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested
    pub async fn requested(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

struct SealedGroup {
    name: String,
    kind: SourceKind,
    frequency: f64,
    buffer: SealedBuffer,
}

struct SourceSlot {
    config: SourceConfig,
    /// `None` for disabled sources
    buffer: Option<SharedBuffer>,
    /// Registered while Idle, waiting for `start`
    pending: Option<Box<dyn Source>>,
    handle: Option<SamplerHandle>,
    exit: WorkerExit,
    /// Retained samples, fixed when the buffer is sealed
    sample_count: usize,
    errors: Vec<ReportedError>,
}

/// A single collection run
pub struct Session {
    id: String,
    config: CollectorConfig,
    layout: SessionLayout,
    state: Arc<RwLock<SessionState>>,
    sources: BTreeMap<String, SourceSlot>,
    stop_signal: StopSignal,
    stop_handle: StopHandle,
    clock: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    report: Option<SessionReport>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(config: CollectorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let layout = SessionLayout::new(config.output_dir.clone());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            layout,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            sources: BTreeMap::new(),
            stop_signal: StopSignal::new(),
            stop_handle: StopHandle::default(),
            clock: None,
            started_at: None,
            report: None,
            event_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    /// Final report, once the session is saved
    pub fn report(&self) -> Option<&SessionReport> {
        self.report.as_ref()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Handle that makes [`Session::run_until_interrupted`] stop the session
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Register an enabled source
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: SourceKind,
        frequency: f64,
        poll: impl Source,
    ) -> Result<(), RegistrationError> {
        self.register_source(SourceConfig::new(name, kind, frequency), poll)
    }

    /// Register a source from its configuration.
    ///
    /// While Idle the sampler starts with the session; while Running it
    /// starts immediately.
    pub fn register_source(
        &mut self,
        config: SourceConfig,
        poll: impl Source,
    ) -> Result<(), RegistrationError> {
        let state = self.state();
        if matches!(state, SessionState::Stopping | SessionState::Saved) {
            return Err(RegistrationError::SessionClosed(config.name));
        }
        if config.name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if !config.frequency.is_finite() || config.frequency <= 0.0 || config.period().is_none() {
            return Err(RegistrationError::InvalidFrequency {
                name: config.name,
                frequency: config.frequency,
            });
        }
        if self.sources.contains_key(&config.name) {
            return Err(RegistrationError::DuplicateName(config.name));
        }

        let name = config.name.clone();
        let mut slot = SourceSlot {
            buffer: None,
            pending: None,
            handle: None,
            exit: WorkerExit::default(),
            sample_count: 0,
            errors: Vec::new(),
            config,
        };

        if !slot.config.enabled {
            tracing::info!("Registered disabled source '{}'", name);
            self.sources.insert(name.clone(), slot);
            let _ = self.event_tx.send(SessionEvent::SourceRegistered(name));
            return Ok(());
        }

        let buffer =
            SourceBuffer::new(&name, slot.config.kind, self.layout.frames_dir(&name)).shared();
        slot.buffer = Some(buffer.clone());

        match (state, self.clock) {
            (SessionState::Running, Some(clock)) => {
                let handle = spawn_sampler(
                    &slot.config,
                    Box::new(poll),
                    buffer,
                    clock,
                    self.stop_signal.clone(),
                )?;
                slot.handle = Some(handle);
            }
            _ => slot.pending = Some(Box::new(poll)),
        }

        tracing::info!(
            "Registered {} source '{}' @ {} Hz",
            slot.config.kind,
            name,
            slot.config.frequency
        );
        self.sources.insert(name.clone(), slot);
        let _ = self.event_tx.send(SessionEvent::SourceRegistered(name));
        Ok(())
    }

    /// Start sampling every registered source
    pub fn start(&mut self) -> SessionResult<()> {
        match self.state() {
            SessionState::Idle => {}
            SessionState::Saved => return Err(SessionError::AlreadySaved),
            _ => return Err(SessionError::AlreadyStarted),
        }

        let output_dir = self.layout.root().to_path_buf();
        if is_valid_session(&output_dir) {
            return Err(SessionError::OutputExists(output_dir));
        }
        std::fs::create_dir_all(&output_dir)?;

        tracing::info!(
            "Starting session {} with {} sources in {:?}",
            self.id,
            self.sources.len(),
            output_dir
        );

        let clock = Instant::now();
        self.clock = Some(clock);
        self.started_at = Some(Utc::now());

        for (name, slot) in self.sources.iter_mut() {
            let (Some(source), Some(buffer)) = (slot.pending.take(), slot.buffer.clone()) else {
                continue;
            };
            match spawn_sampler(&slot.config, source, buffer, clock, self.stop_signal.clone()) {
                Ok(handle) => slot.handle = Some(handle),
                Err(e) => {
                    tracing::error!("Source '{}' could not start: {}", name, e);
                    slot.errors
                        .push(ReportedError::new(codes::SOURCE_FAILURE, e.to_string()));
                }
            }
        }

        *self.state.write() = SessionState::Running;
        let _ = self.event_tx.send(SessionEvent::Started);
        tracing::info!("Session {} running", self.id);
        Ok(())
    }

    /// Live sample counts per enabled source
    pub fn stats(&self) -> BTreeMap<String, usize> {
        self.sources
            .iter()
            .filter_map(|(name, slot)| {
                slot.buffer
                    .as_ref()
                    .map(|buffer| (name.clone(), buffer.lock().len()))
            })
            .collect()
    }

    /// Time since start, zero while Idle
    pub fn elapsed(&self) -> Duration {
        self.clock.map(|c| c.elapsed()).unwrap_or_default()
    }

    /// Stop sampling, flush every buffer and write the session to disk.
    ///
    /// Per-source failures never abort the flush; they are listed in the
    /// returned report and in `session.json`. A failure to write
    /// `session.json` itself is attached to the report as a session-level
    /// `METADATA_ERROR`.
    pub async fn stop(&mut self) -> SessionResult<SessionReport> {
        match self.state() {
            SessionState::Running => {}
            SessionState::Saved => return Err(SessionError::AlreadySaved),
            _ => return Err(SessionError::NotRunning),
        }

        *self.state.write() = SessionState::Stopping;
        let _ = self.event_tx.send(SessionEvent::Stopping);

        self.stop_signal.trigger();
        let duration = self.elapsed();
        tracing::info!(
            "Stopping session {} after {:.2}s",
            self.id,
            duration.as_secs_f64()
        );

        self.join_samplers().await;
        let sealed = self.seal_buffers();
        let jobs = self.encode_jobs(&sealed);
        self.persist(sealed).await;
        let encoded = self.encode(jobs).await;

        *self.state.write() = SessionState::Saved;

        let mut report = self.build_report(duration, encoded);
        if let Err(e) = write_metadata(&self.build_metadata(&report), self.layout.root()) {
            tracing::error!("Failed to write metadata for session {}: {}", self.id, e);
            report
                .errors
                .push(ReportedError::new(codes::METADATA_ERROR, e.to_string()));
        }

        for error in &report.errors {
            let _ = self
                .event_tx
                .send(SessionEvent::Error(format!("session [{}]: {}", error.code, error.message)));
        }
        for source in &report.sources {
            for error in &source.errors {
                let _ = self.event_tx.send(SessionEvent::Error(format!(
                    "{} [{}]: {}",
                    source.name, error.code, error.message
                )));
            }
        }
        let _ = self.event_tx.send(SessionEvent::Saved);

        tracing::info!(
            "Session {} saved: {} samples across {} sources, {} videos",
            self.id,
            report.total_samples(),
            report.sources.len(),
            report.encoded.len()
        );
        self.report = Some(report.clone());
        Ok(report)
    }

    /// Start if needed, then run until Ctrl-C or a [`StopHandle`] request
    pub async fn run_until_interrupted(&mut self) -> SessionResult<SessionReport> {
        if self.state() == SessionState::Idle {
            self.start()?;
        }

        let handle = self.stop_handle();
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::info!("Interrupt received"),
                Err(e) => {
                    tracing::warn!("Unable to listen for Ctrl-C: {}", e);
                    handle.requested().await;
                    tracing::info!("Stop requested");
                }
            },
            _ = handle.requested() => tracing::info!("Stop requested"),
        }

        self.stop().await
    }

    /// Start if needed, run for `duration` (or until a stop request), then stop
    pub async fn run_for(&mut self, duration: Duration) -> SessionResult<SessionReport> {
        if self.state() == SessionState::Idle {
            self.start()?;
        }

        let handle = self.stop_handle();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = handle.requested() => tracing::info!("Stop requested before {:?} elapsed", duration),
        }

        self.stop().await
    }

    /// Wait for every sampler against one shared deadline
    async fn join_samplers(&mut self) {
        let deadline = tokio::time::Instant::now() + self.config.join_timeout();

        for (name, slot) in self.sources.iter_mut() {
            let Some(handle) = slot.handle.take() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, handle.done).await {
                Ok(Ok(exit)) => slot.exit = exit,
                Ok(Err(_)) => {
                    tracing::error!("Sampler '{}' panicked", handle.name);
                    slot.errors.push(ReportedError::new(
                        codes::WORKER_PANICKED,
                        format!("sampler for '{}' panicked; buffered samples kept", name),
                    ));
                }
                Err(_) => {
                    tracing::warn!(
                        "Sampler '{}' did not exit within {:?}; abandoning it",
                        handle.name,
                        self.config.join_timeout()
                    );
                    slot.errors.push(ReportedError::new(
                        codes::SHUTDOWN_TIMEOUT,
                        format!(
                            "sampler did not exit within {} ms",
                            self.config.join_timeout_ms
                        ),
                    ));
                }
            }

            if let Some(message) = &slot.exit.last_failure {
                slot.errors.push(ReportedError::new(
                    codes::SOURCE_FAILURE,
                    format!(
                        "{} of {} polls failed; last: {}",
                        slot.exit.failed_polls, slot.exit.ticks, message
                    ),
                ));
            }
        }
    }

    /// Close every buffer; stragglers can no longer append
    fn seal_buffers(&mut self) -> Vec<SealedGroup> {
        self.sources
            .iter_mut()
            .filter_map(|(name, slot)| {
                let buffer = slot.buffer.as_ref()?.lock().seal();
                slot.sample_count = buffer.len();
                Some(SealedGroup {
                    name: name.clone(),
                    kind: slot.config.kind,
                    frequency: slot.config.frequency,
                    buffer,
                })
            })
            .collect()
    }

    fn encode_jobs(&self, sealed: &[SealedGroup]) -> Vec<EncodeJob> {
        let extension = self.config.video.codec.extension();
        sealed
            .iter()
            .filter_map(|group| match &group.buffer {
                SealedBuffer::Frames { dir, timestamps } => Some(EncodeJob {
                    source: group.name.clone(),
                    frame_dir: dir.clone(),
                    frame_count: timestamps.len() as u64,
                    output_path: self.layout.video_path(&group.name, extension),
                }),
                SealedBuffer::Samples { .. } => None,
            })
            .collect()
    }

    /// Write every sealed buffer to the store, one group per source
    async fn persist(&mut self, sealed: Vec<SealedGroup>) {
        let layout = self.layout.clone();
        let names: Vec<String> = sealed.iter().map(|g| g.name.clone()).collect();

        let joined = tokio::task::spawn_blocking(move || {
            sealed
                .iter()
                .map(|group| {
                    let result =
                        write_group(&layout, &group.name, group.kind, group.frequency, &group.buffer);
                    (group.name.clone(), result)
                })
                .collect::<Vec<(String, Result<GroupMeta, PersistenceError>)>>()
        })
        .await;

        match joined {
            Ok(results) => {
                for (name, result) in results {
                    if let Err(e) = result {
                        self.report_error(&name, codes::PERSISTENCE_ERROR, e.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::error!("Persistence task failed: {}", e);
                for name in names {
                    self.report_error(&name, codes::PERSISTENCE_ERROR, format!("persistence task failed: {}", e));
                }
            }
        }
    }

    async fn encode(&mut self, jobs: Vec<EncodeJob>) -> Vec<EncodedStream> {
        if !self.config.video.enabled {
            if !jobs.is_empty() {
                tracing::info!(
                    "Video encoding disabled; keeping staged frames for {} camera(s)",
                    jobs.len()
                );
            }
            return Vec::new();
        }

        let outcomes = VideoPipeline::new(self.config.video.clone()).run(jobs).await;

        let mut encoded = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(stream) => encoded.push(stream),
                Err(e) => self.report_error(&outcome.source, codes::ENCODING_ERROR, e.to_string()),
            }
        }
        encoded
    }

    fn report_error(&mut self, name: &str, code: &str, message: String) {
        if let Some(slot) = self.sources.get_mut(name) {
            slot.errors.push(ReportedError::new(code, message));
        }
    }

    fn build_report(&self, duration: Duration, encoded: Vec<EncodedStream>) -> SessionReport {
        let sources = self
            .sources
            .iter()
            .map(|(name, slot)| SourceReport {
                name: name.clone(),
                kind: slot.config.kind,
                nominal_frequency: slot.config.frequency,
                enabled: slot.config.enabled,
                sample_count: slot.sample_count,
                ticks: slot.exit.ticks,
                failed_polls: slot.exit.failed_polls,
                errors: slot.errors.clone(),
            })
            .collect();

        SessionReport {
            session_id: self.id.clone(),
            output_dir: self.layout.root().to_path_buf(),
            started_at: self.started_at.unwrap_or_else(Utc::now),
            duration_secs: duration.as_secs_f64(),
            sources,
            encoded,
            errors: Vec::new(),
        }
    }

    fn build_metadata(&self, report: &SessionReport) -> SessionMetadata {
        let started_at = report.started_at;
        let sources = report
            .sources
            .iter()
            .map(|source| {
                let video = report
                    .encoded
                    .iter()
                    .find(|stream| stream.source == source.name)
                    .cloned();
                (
                    source.name.clone(),
                    SourceEntry {
                        kind: source.kind,
                        nominal_frequency: source.nominal_frequency,
                        enabled: source.enabled,
                        sample_count: source.sample_count,
                        failed_polls: source.failed_polls,
                        group: SessionLayout::group_relative(&source.name),
                        video,
                        errors: source.errors.clone(),
                    },
                )
            })
            .collect();

        SessionMetadata {
            version: SESSION_VERSION,
            session_id: self.id.clone(),
            status: SessionState::Saved,
            started_at,
            started_at_unix_ms: started_at.timestamp_millis(),
            duration_secs: report.duration_secs,
            sources,
            video: VideoParams::from(&self.config.video),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Samplers of a session dropped while running must not outlive it
        self.stop_signal.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::{MockCamera, MockSensor};
    use crate::capture::{Payload, SourceError};
    use crate::store::{read_group, read_metadata};
    use tempfile::tempdir;

    fn session_in(dir: &std::path::Path) -> Session {
        Session::new(CollectorConfig::new(dir.join("session")))
    }

    #[test]
    fn test_registration_validation() {
        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path());

        session
            .register("imu", SourceKind::Sensor, 100.0, MockSensor::new(6))
            .unwrap();
        assert_eq!(
            session.register("imu", SourceKind::Sensor, 50.0, MockSensor::new(6)),
            Err(RegistrationError::DuplicateName("imu".to_string()))
        );
        assert!(matches!(
            session.register("zero", SourceKind::Sensor, 0.0, MockSensor::new(1)),
            Err(RegistrationError::InvalidFrequency { .. })
        ));
        assert!(matches!(
            session.register("nan", SourceKind::Sensor, f64::NAN, MockSensor::new(1)),
            Err(RegistrationError::InvalidFrequency { .. })
        ));
        assert_eq!(
            session.register("", SourceKind::Sensor, 10.0, MockSensor::new(1)),
            Err(RegistrationError::EmptyName)
        );
        assert!(matches!(
            session.register("glacial", SourceKind::Sensor, 1e-30, MockSensor::new(1)),
            Err(RegistrationError::InvalidFrequency { .. })
        ));
        assert!(matches!(
            session.register("blur", SourceKind::Sensor, 1e300, MockSensor::new(1)),
            Err(RegistrationError::InvalidFrequency { .. })
        ));

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.stats().len(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_misuse_is_rejected() {
        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path());

        assert!(matches!(session.stop().await, Err(SessionError::NotRunning)));

        session.start().unwrap();
        assert!(matches!(session.start(), Err(SessionError::AlreadyStarted)));

        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Saved);
        assert!(matches!(session.start(), Err(SessionError::AlreadySaved)));
        assert!(matches!(session.stop().await, Err(SessionError::AlreadySaved)));
        assert!(matches!(
            session.register("late", SourceKind::Sensor, 10.0, MockSensor::new(1)),
            Err(RegistrationError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_saved_output_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let mut first = session_in(dir.path());
        first.run_for(Duration::from_millis(10)).await.unwrap();

        let mut second = session_in(dir.path());
        assert!(matches!(second.start(), Err(SessionError::OutputExists(_))));
    }

    #[tokio::test]
    async fn test_register_while_running_and_disabled_sources() {
        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path());
        session
            .register_source(
                SourceConfig::new("spare", SourceKind::Sensor, 10.0).disabled(),
                MockSensor::new(2),
            )
            .unwrap();

        session.start().unwrap();
        session
            .register("late_joiner", SourceKind::Controller, 100.0, || -> Result<Payload, SourceError> {
                Ok(Payload::Scalar(1.0))
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(session.stats()["late_joiner"] > 0);
        assert!(!session.stats().contains_key("spare"));

        let report = session.stop().await.unwrap();
        let spare = report.source("spare").unwrap();
        assert!(!spare.enabled);
        assert_eq!(spare.sample_count, 0);
        assert!(report.source("late_joiner").unwrap().sample_count > 0);

        let metadata = read_metadata(session.layout().root()).unwrap();
        assert_eq!(metadata.status, SessionState::Saved);
        assert!(!metadata.sources["spare"].enabled);
    }

    #[tokio::test]
    async fn test_stop_handle_ends_run() {
        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path());
        session
            .register("joint_pos", SourceKind::Sensor, 50.0, MockSensor::new(7))
            .unwrap();

        let handle = session.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            handle.request();
        });

        let report = session.run_until_interrupted().await.unwrap();
        assert!(report.duration() < Duration::from_secs(5));

        let group = read_group(&session.layout().group_dir("joint_pos")).unwrap();
        assert_eq!(group.len(), report.source("joint_pos").unwrap().sample_count);
        assert_eq!(group.meta.shape, vec![7]);
    }

    #[tokio::test]
    async fn test_failed_polls_are_reported() {
        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path());
        session
            .register("broken", SourceKind::Sensor, 100.0, || -> Result<Payload, SourceError> {
                Err(SourceError::NotReady("warming up".to_string()))
            })
            .unwrap();

        let mut events = session.subscribe();
        let report = session.run_for(Duration::from_millis(50)).await.unwrap();

        let broken = report.source("broken").unwrap();
        assert_eq!(broken.sample_count, 0);
        assert_eq!(broken.failed_polls, broken.ticks);
        assert_eq!(broken.errors[0].code, codes::SOURCE_FAILURE);
        assert!(!report.is_clean());

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::Error(_)) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_straggler_is_abandoned() {
        let dir = tempdir().unwrap();
        let mut config = CollectorConfig::new(dir.path().join("session"));
        config.join_timeout_ms = 50;
        let mut session = Session::new(config);

        let mut first = true;
        session
            .register("slow", SourceKind::Sensor, 100.0, move || -> Result<Payload, SourceError> {
                if !first {
                    std::thread::sleep(Duration::from_millis(500));
                }
                first = false;
                Ok(Payload::Scalar(0.0))
            })
            .unwrap();

        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let report = session.stop().await.unwrap();

        let slow = report.source("slow").unwrap();
        assert_eq!(slow.errors[0].code, codes::SHUTDOWN_TIMEOUT);
        assert_eq!(slow.sample_count, 1);
        assert_eq!(session.state(), SessionState::Saved);
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_report() {
        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path());
        session
            .register("joint_pos", SourceKind::Sensor, 100.0, MockSensor::new(7))
            .unwrap();

        session.start().unwrap();
        // A directory where the temporary metadata file must go
        let blocker = session.layout().metadata_path().with_extension("json.tmp");
        std::fs::create_dir_all(&blocker).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let report = session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Saved);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, codes::METADATA_ERROR);
        assert!(!report.is_clean());
        assert!(report.source("joint_pos").unwrap().sample_count > 0);

        let kept = session.report().unwrap();
        assert_eq!(kept.session_id, report.session_id);
        assert_eq!(kept.errors, report.errors);
        assert!(matches!(session.stop().await, Err(SessionError::AlreadySaved)));
    }

    #[tokio::test]
    async fn test_disabled_video_keeps_frames() {
        let dir = tempdir().unwrap();
        let mut config = CollectorConfig::new(dir.path().join("session"));
        config.video.enabled = false;
        config.video.ffmpeg_path = std::path::PathBuf::from("/nonexistent/ffmpeg");
        let mut session = Session::new(config);
        session
            .register("wrist", SourceKind::Camera, 50.0, MockCamera::new(16, 12))
            .unwrap();

        let report = session.run_for(Duration::from_millis(60)).await.unwrap();
        let wrist = report.source("wrist").unwrap();
        assert!(wrist.sample_count > 0);
        assert!(wrist.errors.is_empty());
        assert!(report.encoded.is_empty());

        let layout = session.layout();
        assert!(layout.frames_dir("wrist").join("frame_000000.png").exists());
        assert!(!layout.video_path("wrist", "mp4").exists());

        let metadata = read_metadata(layout.root()).unwrap();
        assert!(!metadata.video.enabled);
        assert!(metadata.sources["wrist"].video.is_none());
        assert!(session.report().unwrap().is_clean());
    }
}
