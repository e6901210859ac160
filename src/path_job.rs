// src/path_job.rs - Teach-and-replay jobs: recording and playback, one at a time
use crate::config::{Config, ManualConfig, MotionConfig, RecordingConfig};
use crate::file_manager::{validate_name, PathStore, PathStoreError};
use crate::motion::{
    ArmPosition, Axis, LiveReading, MotionController, MotionError, MoveRequest, StopSignal,
};
use crate::path::{Path, PathSummary};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant, MissedTickBehavior};

const EVENT_CAPACITY: usize = 64;
/// Name of the single-waypoint job created by direct moves.
const DIRECT_MOVE_NAME: &str = "direct_move";
const JOG_NAME: &str = "jog";
const TEST_SEQUENCE_NAME: &str = "test_sequence";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Operation conflict: {0}")]
    Conflict(String),
    #[error("No recording in progress")]
    NotRecording,
    #[error("No playback in progress")]
    NotPlaying,
    #[error("Path store error: {0}")]
    Store(#[from] PathStoreError),
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("Job worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackOptions {
    pub speed_multiplier: f64,
    pub manual_step: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            manual_step: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlaybackOutcome {
    Completed {
        name: String,
        reached: usize,
        skipped: usize,
        elapsed_secs: f64,
    },
    Stopped {
        name: String,
        at_waypoint: usize,
    },
    Failed {
        name: String,
        at_waypoint: usize,
        error: String,
    },
}

impl PlaybackOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PlaybackOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordingOutcome {
    Saved(PathSummary),
    Empty { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    RecordingStarted {
        job_id: String,
        name: String,
    },
    RecordingProgress {
        job_id: String,
        waypoints: usize,
        position: ArmPosition,
    },
    RecordingFinished {
        job_id: String,
        outcome: RecordingOutcome,
    },
    RecordingFailed {
        job_id: String,
        name: String,
        error: String,
    },
    PlaybackStarted {
        job_id: String,
        name: String,
        waypoints: usize,
    },
    WaypointReached {
        job_id: String,
        index: usize,
        total: usize,
        position: ArmPosition,
    },
    WaypointSkipped {
        job_id: String,
        index: usize,
        total: usize,
    },
    AwaitingStep {
        job_id: String,
        index: usize,
        total: usize,
    },
    PlaybackFinished {
        job_id: String,
        outcome: PlaybackOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Recording {
        job_id: String,
        name: String,
        waypoints: usize,
        elapsed_secs: f64,
    },
    Playing {
        job_id: String,
        name: String,
        waypoint: usize,
        total: usize,
        awaiting_step: bool,
    },
}

struct RecordingJob {
    id: String,
    name: String,
    started: Instant,
    stop_tx: watch::Sender<bool>,
    waypoints: Arc<AtomicUsize>,
    handle: JoinHandle<Path>,
}

struct PlaybackJob {
    id: String,
    name: String,
    total: usize,
    stop_tx: watch::Sender<bool>,
    progress: Arc<AtomicUsize>,
    awaiting_step: Arc<AtomicBool>,
    step: Arc<Notify>,
    done_rx: watch::Receiver<Option<PlaybackOutcome>>,
    handle: JoinHandle<()>,
}

enum JobSlot {
    Idle,
    Recording(RecordingJob),
    Playing(PlaybackJob),
}

impl JobSlot {
    /// Playback workers end on their own; forget them once they have.
    fn reap(&mut self) {
        let finished = match self {
            JobSlot::Idle => false,
            JobSlot::Recording(job) => job.handle.is_finished(),
            JobSlot::Playing(job) => job.handle.is_finished(),
        };
        if finished {
            *self = JobSlot::Idle;
        }
    }

    fn busy_reason(&self) -> Option<String> {
        match self {
            JobSlot::Idle => None,
            JobSlot::Recording(job) => Some(format!("recording '{}' in progress", job.name)),
            JobSlot::Playing(job) => Some(format!("playback of '{}' in progress", job.name)),
        }
    }
}

/// Runs record and playback workers against the shared arm. The job slot makes
/// them mutually exclusive.
#[derive(Clone)]
pub struct PathJobManager {
    controller: Arc<Mutex<MotionController>>,
    store: PathStore,
    recording: RecordingConfig,
    motion: MotionConfig,
    manual: ManualConfig,
    jog_step: Arc<Mutex<f64>>,
    slot: Arc<Mutex<JobSlot>>,
    events: broadcast::Sender<JobEvent>,
    position_rx: watch::Receiver<ArmPosition>,
}

impl PathJobManager {
    pub async fn new(controller: Arc<Mutex<MotionController>>, store: PathStore, config: &Config) -> Self {
        let position_rx = controller.lock().await.subscribe_position();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            controller,
            store,
            recording: config.recording.clone(),
            motion: config.motion.clone(),
            manual: config.manual.clone(),
            jog_step: Arc::new(Mutex::new(config.manual.jog_step)),
            slot: Arc::new(Mutex::new(JobSlot::Idle)),
            events,
            position_rx,
        }
    }

    pub fn controller(&self) -> Arc<Mutex<MotionController>> {
        self.controller.clone()
    }

    pub fn store(&self) -> &PathStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Fresh read when the arm is free, otherwise the last published position.
    pub async fn current_position(&self) -> ArmPosition {
        match self.controller.try_lock() {
            Ok(mut controller) => controller.read_position().await,
            Err(_) => *self.position_rx.borrow(),
        }
    }

    pub async fn status(&self) -> JobStatus {
        let mut slot = self.slot.lock().await;
        slot.reap();
        match &*slot {
            JobSlot::Idle => JobStatus::Idle,
            JobSlot::Recording(job) => JobStatus::Recording {
                job_id: job.id.clone(),
                name: job.name.clone(),
                waypoints: job.waypoints.load(Ordering::Relaxed),
                elapsed_secs: job.started.elapsed().as_secs_f64(),
            },
            JobSlot::Playing(job) => JobStatus::Playing {
                job_id: job.id.clone(),
                name: job.name.clone(),
                waypoint: job.progress.load(Ordering::Relaxed),
                total: job.total,
                awaiting_step: job.awaiting_step.load(Ordering::Relaxed),
            },
        }
    }

    pub async fn is_recording(&self) -> bool {
        let mut slot = self.slot.lock().await;
        slot.reap();
        matches!(*slot, JobSlot::Recording(_))
    }

    pub async fn is_playing(&self) -> bool {
        let mut slot = self.slot.lock().await;
        slot.reap();
        matches!(*slot, JobSlot::Playing(_))
    }

    /// Start sampling the arm position in the background. Returns the path name.
    pub async fn start_recording(&self, name: Option<String>) -> Result<String, JobError> {
        let mut slot = self.slot.lock().await;
        slot.reap();
        if let Some(reason) = slot.busy_reason() {
            tracing::warn!("Cannot start recording: {}", reason);
            return Err(JobError::Conflict(reason));
        }

        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("path_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        validate_name(&name)?;

        let id = uuid::Uuid::new_v4().to_string();
        let (stop_tx, stop) = StopSignal::channel();
        let waypoints = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run_recording(RecordingContext {
            job_id: id.clone(),
            name: name.clone(),
            controller: self.controller.clone(),
            settings: self.recording.clone(),
            stop,
            waypoints: waypoints.clone(),
            events: self.events.clone(),
        }));

        tracing::info!("Recording '{}' started (job {})", name, id);
        self.emit(JobEvent::RecordingStarted {
            job_id: id.clone(),
            name: name.clone(),
        });
        *slot = JobSlot::Recording(RecordingJob {
            id,
            name: name.clone(),
            started: Instant::now(),
            stop_tx,
            waypoints,
            handle,
        });
        Ok(name)
    }

    /// Stop the recording worker and persist what it captured.
    pub async fn stop_recording(&self) -> Result<RecordingOutcome, JobError> {
        let mut slot = self.slot.lock().await;
        let job = match std::mem::replace(&mut *slot, JobSlot::Idle) {
            JobSlot::Recording(job) => job,
            other => {
                *slot = other;
                return Err(JobError::NotRecording);
            }
        };

        let _ = job.stop_tx.send(true);
        let path = job.handle.await?;

        if path.is_empty() {
            tracing::info!("Recording '{}' captured no waypoints; nothing saved", job.name);
            let outcome = RecordingOutcome::Empty { name: job.name };
            self.emit(JobEvent::RecordingFinished {
                job_id: job.id,
                outcome: outcome.clone(),
            });
            return Ok(outcome);
        }

        match self.store.save(&path).await {
            Ok(_) => {
                let outcome = RecordingOutcome::Saved(path.summary());
                tracing::info!(
                    "Recording '{}' saved: {} waypoints over {:.1}s",
                    path.name,
                    path.len(),
                    path.total_duration().as_secs_f64()
                );
                self.emit(JobEvent::RecordingFinished {
                    job_id: job.id,
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Failed to save recording '{}': {}", path.name, e);
                self.emit(JobEvent::RecordingFailed {
                    job_id: job.id,
                    name: path.name.clone(),
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Load a stored path and replay it in the background. Returns the job id.
    pub async fn play_path(&self, name: &str, options: PlaybackOptions) -> Result<String, JobError> {
        let mut slot = self.slot.lock().await;
        slot.reap();
        if let Some(reason) = slot.busy_reason() {
            tracing::warn!("Cannot play '{}': {}", name, reason);
            return Err(JobError::Conflict(reason));
        }
        let path = self.store.load(name).await?;
        Ok(self.spawn_playback(&mut slot, path, options))
    }

    /// Move straight to a position as a one-waypoint playback job.
    pub async fn move_to(&self, x: f64, y: f64) -> Result<String, JobError> {
        self.spawn_direct(DIRECT_MOVE_NAME, x, y).await
    }

    async fn spawn_direct(&self, name: &str, x: f64, y: f64) -> Result<String, JobError> {
        let mut slot = self.slot.lock().await;
        slot.reap();
        if let Some(reason) = slot.busy_reason() {
            tracing::warn!("Cannot move to X={:.1}%, Y={:.1}%: {}", x, y, reason);
            return Err(JobError::Conflict(reason));
        }
        let mut path = Path::new(name, Utc::now());
        path.push(x, y, Duration::ZERO);
        Ok(self.spawn_playback(&mut slot, path, PlaybackOptions::default()))
    }

    pub async fn jog_step(&self) -> f64 {
        *self.jog_step.lock().await
    }

    /// Set the jog step, clamped to the configured range. Returns the new step.
    pub async fn set_jog_step(&self, step: f64) -> f64 {
        let step = self.manual.clamp_jog_step(step);
        *self.jog_step.lock().await = step;
        tracing::info!("Jog step {:.1}%", step);
        step
    }

    /// Grow or shrink the jog step by whole increments.
    pub async fn adjust_jog_step(&self, increments: i32) -> f64 {
        let mut current = self.jog_step.lock().await;
        let step = self
            .manual
            .clamp_jog_step(*current + increments as f64 * self.manual.jog_step_increment);
        *current = step;
        tracing::info!("Jog step {:.1}%", step);
        step
    }

    /// Nudge one axis by `steps` jog steps from where it is now; the other axis
    /// holds. Runs as a one-waypoint job. Returns the job id.
    pub async fn jog(&self, axis: Axis, steps: i32) -> Result<String, JobError> {
        if let Some(reason) = self.busy_reason().await {
            tracing::warn!("Cannot jog {}: {}", axis, reason);
            return Err(JobError::Conflict(reason));
        }
        let delta = self.jog_step().await * steps as f64;
        let current = self.current_position().await;
        let (x, y) = match axis {
            Axis::X => ((current.x + delta).clamp(0.0, 100.0), current.y),
            Axis::Y => (current.x, (current.y + delta).clamp(0.0, 100.0)),
        };
        tracing::info!("Jog {} by {:+.1}% from {}", axis, delta, current);
        self.spawn_direct(JOG_NAME, x, y).await
    }

    /// Visit the configured test positions in order. Returns the job id.
    pub async fn run_test_sequence(&self) -> Result<String, JobError> {
        let mut slot = self.slot.lock().await;
        slot.reap();
        if let Some(reason) = slot.busy_reason() {
            tracing::warn!("Cannot run test sequence: {}", reason);
            return Err(JobError::Conflict(reason));
        }
        let mut path = Path::new(TEST_SEQUENCE_NAME, Utc::now());
        let pause = self.motion.waypoint_pause();
        for (i, [x, y]) in self.manual.test_positions.iter().enumerate() {
            path.push(*x, *y, pause * i as u32);
        }
        Ok(self.spawn_playback(&mut slot, path, PlaybackOptions::default()))
    }

    /// Voltage-level sensor view, or `None` while a job holds the arm.
    pub async fn live_reading(&self) -> Option<LiveReading> {
        match self.controller.try_lock() {
            Ok(mut controller) => Some(controller.read_live().await),
            Err(_) => None,
        }
    }

    async fn busy_reason(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;
        slot.reap();
        slot.busy_reason()
    }

    fn spawn_playback(&self, slot: &mut JobSlot, path: Path, options: PlaybackOptions) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let (stop_tx, stop) = StopSignal::channel();
        let (done_tx, done_rx) = watch::channel(None);
        let progress = Arc::new(AtomicUsize::new(0));
        let awaiting_step = Arc::new(AtomicBool::new(false));
        let step = Arc::new(Notify::new());
        let name = path.name.clone();
        let total = path.len();

        tracing::info!(
            "Playback of '{}' started: {} waypoints, speed x{:.2}{} (job {})",
            name,
            total,
            options.speed_multiplier,
            if options.manual_step { ", manual step" } else { "" },
            id
        );
        self.emit(JobEvent::PlaybackStarted {
            job_id: id.clone(),
            name: name.clone(),
            waypoints: total,
        });

        let handle = tokio::spawn(run_playback(PlaybackContext {
            job_id: id.clone(),
            path,
            options,
            controller: self.controller.clone(),
            motion: self.motion.clone(),
            stop,
            step: step.clone(),
            progress: progress.clone(),
            awaiting_step: awaiting_step.clone(),
            events: self.events.clone(),
            done_tx,
        }));

        *slot = JobSlot::Playing(PlaybackJob {
            id: id.clone(),
            name,
            total,
            stop_tx,
            progress,
            awaiting_step,
            step,
            done_rx,
            handle,
        });
        id
    }

    /// Wait until the given playback job finishes. `None` if it is not the
    /// current job.
    pub async fn wait_for_playback(&self, job_id: &str) -> Option<PlaybackOutcome> {
        let mut done_rx = {
            let slot = self.slot.lock().await;
            match &*slot {
                JobSlot::Playing(job) if job.id == job_id => job.done_rx.clone(),
                _ => return None,
            }
        };
        let outcome = done_rx.wait_for(Option::is_some).await.ok()?.clone();
        outcome
    }

    /// Signal the playback worker and wait for it to stop the motors.
    pub async fn stop_playback(&self) -> Result<(), JobError> {
        let mut slot = self.slot.lock().await;
        slot.reap();
        let job = match std::mem::replace(&mut *slot, JobSlot::Idle) {
            JobSlot::Playing(job) => job,
            other => {
                *slot = other;
                return Err(JobError::NotPlaying);
            }
        };
        tracing::info!("Stopping playback of '{}'", job.name);
        let _ = job.stop_tx.send(true);
        job.handle.await?;
        Ok(())
    }

    /// Release a playback paused in manual step mode.
    pub async fn confirm_step(&self) -> Result<(), JobError> {
        let mut slot = self.slot.lock().await;
        slot.reap();
        match &*slot {
            JobSlot::Playing(job) => {
                job.step.notify_one();
                Ok(())
            }
            _ => Err(JobError::NotPlaying),
        }
    }

    pub async fn list_paths(&self) -> Result<Vec<PathSummary>, JobError> {
        Ok(self.store.list().await?)
    }

    pub async fn delete_path(&self, name: &str) -> Result<(), JobError> {
        Ok(self.store.delete(name).await?)
    }

    /// Stop whatever is running and leave both motors stopped.
    pub async fn shutdown(&self) {
        if self.is_playing().await {
            if let Err(e) = self.stop_playback().await {
                tracing::warn!("Stopping playback during shutdown failed: {}", e);
            }
        }
        if self.is_recording().await {
            match self.stop_recording().await {
                Ok(outcome) => tracing::info!("Recording closed during shutdown: {:?}", outcome),
                Err(e) => tracing::warn!("Closing recording during shutdown failed: {}", e),
            }
        }
        self.controller.lock().await.emergency_stop();
    }
}

struct RecordingContext {
    job_id: String,
    name: String,
    controller: Arc<Mutex<MotionController>>,
    settings: RecordingConfig,
    stop: StopSignal,
    waypoints: Arc<AtomicUsize>,
    events: broadcast::Sender<JobEvent>,
}

async fn run_recording(ctx: RecordingContext) -> Path {
    let RecordingContext {
        job_id,
        name,
        controller,
        settings,
        mut stop,
        waypoints,
        events,
    } = ctx;
    let started = Instant::now();
    let mut path = Path::new(name, Utc::now());
    let mut last_recorded: Option<ArmPosition> = None;
    let mut ticker = tokio::time::interval(settings.recording_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.raised() => break,
            _ = ticker.tick() => {
                let position = controller.lock().await.read_position().await;
                let moved = last_recorded
                    .is_none_or(|last| last.max_delta(&position) > settings.position_tolerance);
                if moved {
                    path.push(position.x, position.y, started.elapsed());
                    last_recorded = Some(position);
                    waypoints.store(path.len(), Ordering::Relaxed);
                    tracing::debug!("Recorded waypoint {} at {}", path.len(), position);
                    let _ = events.send(JobEvent::RecordingProgress {
                        job_id: job_id.clone(),
                        waypoints: path.len(),
                        position,
                    });
                }
            }
        }
    }

    if let Err(e) = controller.lock().await.stop_all() {
        tracing::error!("Failed to stop motors after recording: {}", e);
    }
    path
}

struct PlaybackContext {
    job_id: String,
    path: Path,
    options: PlaybackOptions,
    controller: Arc<Mutex<MotionController>>,
    motion: MotionConfig,
    stop: StopSignal,
    step: Arc<Notify>,
    progress: Arc<AtomicUsize>,
    awaiting_step: Arc<AtomicBool>,
    events: broadcast::Sender<JobEvent>,
    done_tx: watch::Sender<Option<PlaybackOutcome>>,
}

async fn run_playback(ctx: PlaybackContext) {
    let started = Instant::now();
    let path = &ctx.path;
    let profile = path.profile();
    let total = path.len();
    let mut stop = ctx.stop.clone();
    let (mut reached, mut skipped) = (0usize, 0usize);
    let mut outcome = None;

    for (index, waypoint) in path.waypoints().iter().enumerate() {
        let number = index + 1;
        let is_last = number == total;
        ctx.progress.store(number, Ordering::Relaxed);
        if stop.is_raised() {
            outcome = Some(PlaybackOutcome::Stopped {
                name: path.name.clone(),
                at_waypoint: number,
            });
            break;
        }

        let mut controller = ctx.controller.lock().await;
        if !is_last {
            let current = controller.read_position().await;
            if profile.should_skip(waypoint, current) {
                tracing::debug!(
                    "Skipping waypoint {}/{}: already past ({} vs target {})",
                    number,
                    total,
                    current,
                    waypoint.position()
                );
                skipped += 1;
                let _ = ctx.events.send(JobEvent::WaypointSkipped {
                    job_id: ctx.job_id.clone(),
                    index: number,
                    total,
                });
                continue;
            }
        }

        let request = MoveRequest::new(waypoint.x_percent, waypoint.y_percent, &ctx.motion)
            .with_profile(profile)
            .with_speed_scale(ctx.options.speed_multiplier);
        let result = controller.move_to(&request, &stop).await;
        drop(controller);

        match result {
            Ok(report) => {
                reached += 1;
                tracing::info!(
                    "Waypoint {}/{} reached at {}",
                    number,
                    total,
                    report.final_position
                );
                let _ = ctx.events.send(JobEvent::WaypointReached {
                    job_id: ctx.job_id.clone(),
                    index: number,
                    total,
                    position: report.final_position,
                });
            }
            Err(MotionError::Cancelled) => {
                outcome = Some(PlaybackOutcome::Stopped {
                    name: path.name.clone(),
                    at_waypoint: number,
                });
                break;
            }
            Err(e) => {
                tracing::error!(
                    "Playback of '{}' aborted at waypoint {}/{}: {}",
                    path.name,
                    number,
                    total,
                    e
                );
                outcome = Some(PlaybackOutcome::Failed {
                    name: path.name.clone(),
                    at_waypoint: number,
                    error: e.to_string(),
                });
                break;
            }
        }

        if is_last {
            continue;
        }
        if ctx.options.manual_step {
            ctx.awaiting_step.store(true, Ordering::Relaxed);
            tracing::info!("Waypoint {}/{} reached; waiting for step confirmation", number, total);
            let _ = ctx.events.send(JobEvent::AwaitingStep {
                job_id: ctx.job_id.clone(),
                index: number,
                total,
            });
            tokio::select! {
                _ = ctx.step.notified() => {}
                _ = stop.raised() => {}
            }
            ctx.awaiting_step.store(false, Ordering::Relaxed);
        } else if !ctx.motion.waypoint_pause().is_zero() {
            tokio::select! {
                _ = sleep(ctx.motion.waypoint_pause()) => {}
                _ = stop.raised() => {}
            }
        }
    }

    if let Err(e) = ctx.controller.lock().await.stop_all() {
        tracing::error!("Failed to stop motors after playback: {}", e);
    }

    let outcome = outcome.unwrap_or_else(|| PlaybackOutcome::Completed {
        name: path.name.clone(),
        reached,
        skipped,
        elapsed_secs: started.elapsed().as_secs_f64(),
    });
    match &outcome {
        PlaybackOutcome::Completed { .. } => {
            tracing::info!("Playback of '{}' complete: {} reached, {} skipped", path.name, reached, skipped)
        }
        PlaybackOutcome::Stopped { at_waypoint, .. } => {
            tracing::info!("Playback of '{}' stopped at waypoint {}", path.name, at_waypoint)
        }
        PlaybackOutcome::Failed { .. } => {}
    }
    let _ = ctx.events.send(JobEvent::PlaybackFinished {
        job_id: ctx.job_id.clone(),
        outcome: outcome.clone(),
    });
    ctx.done_tx.send_replace(Some(outcome));
}
