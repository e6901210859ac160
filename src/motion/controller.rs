// src/motion/controller.rs - Dual-axis settling loop over potentiometer feedback
use crate::config::{AxisConfig, MotionConfig};
use crate::hardware::{
    AnalogInput, AxisMotor, Direction, HardwareError, MotorDriver, PositionSensor, ReadQuality,
    SensorStats,
};
use crate::motion::{consensus, ArmPosition, Axis, StopSignal};
use crate::path::PathProfile;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};

/// Raw reads averaged per extreme during a calibration sweep.
const CALIBRATION_SAMPLES: usize = 5;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("{axis} axis sensor unavailable for {iterations} consecutive checks")]
    SensorUnavailable { axis: Axis, iterations: u32 },
    #[error("{axis} axis stopped at safety limit ({voltage:.3}V)")]
    SafetyLimit { axis: Axis, voltage: f64 },
    #[error("Timed out after {waited:?} moving to {target} (last {last})")]
    Timeout {
        waited: Duration,
        target: ArmPosition,
        last: ArmPosition,
    },
    #[error("{axis} axis ran {overshoot:.1}% past its target of {target:.1}%")]
    Overshoot {
        axis: Axis,
        target: f64,
        overshoot: f64,
    },
    #[error("{axis} axis moving against commanded {direction} direction")]
    DirectionReversal { axis: Axis, direction: Direction },
    #[error("Move cancelled")]
    Cancelled,
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

/// One waypoint move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRequest {
    pub target_x: f64,
    pub target_y: f64,
    pub x_tolerance: f64,
    pub y_tolerance: f64,
    pub max_wait: Duration,
    pub profile: Option<PathProfile>,
    pub speed_scale: f64,
}

impl MoveRequest {
    pub fn new(target_x: f64, target_y: f64, settings: &MotionConfig) -> Self {
        Self {
            target_x: target_x.clamp(0.0, 100.0),
            target_y: target_y.clamp(0.0, 100.0),
            x_tolerance: settings.x_tolerance,
            y_tolerance: settings.y_tolerance,
            max_wait: settings.max_wait(),
            profile: None,
            speed_scale: 1.0,
        }
    }

    pub fn with_tolerance(mut self, x_tolerance: f64, y_tolerance: f64) -> Self {
        self.x_tolerance = x_tolerance;
        self.y_tolerance = y_tolerance;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_profile(mut self, profile: PathProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_speed_scale(mut self, scale: f64) -> Self {
        self.speed_scale = scale.clamp(0.1, 2.0);
        self
    }

    pub fn target(&self) -> ArmPosition {
        ArmPosition::new(self.target_x, self.target_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveReport {
    pub final_position: ArmPosition,
    pub elapsed: Duration,
    pub iterations: u32,
    /// Distance past the target, when an axis settled beyond its tolerance.
    pub x_overshoot: Option<f64>,
    pub y_overshoot: Option<f64>,
}

impl MoveReport {
    pub fn overshoot(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x_overshoot,
            Axis::Y => self.y_overshoot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisVoltageRange {
    pub min_voltage: f64,
    pub max_voltage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub x_axis: AxisVoltageRange,
    pub y_axis: AxisVoltageRange,
}

/// One filtered voltage read and where it maps to, for the live monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisReading {
    pub voltage: f64,
    pub percent: f64,
    pub quality: ReadQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveReading {
    pub x: AxisReading,
    pub y: AxisReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisPhase {
    Approaching,
    Settled,
}

/// Per-axis bookkeeping for a single `move_to` call.
#[derive(Debug)]
struct AxisRuntimeState {
    direction: Direction,
    /// Direction came from a path profile rather than from the start position.
    hinted: bool,
    phase: AxisPhase,
    target: f64,
    tolerance: f64,
    /// `None` while the motor is stopped; direction must be applied before speed.
    commanded_speed: Option<f64>,
    last_position: Option<f64>,
    last_valid_position: Option<f64>,
    dropouts: u32,
    backward_checks: u32,
    backward_travel: f64,
}

impl AxisRuntimeState {
    fn new(direction: Direction, hinted: bool, start: f64, target: f64, tolerance: f64) -> Self {
        Self {
            direction,
            hinted,
            phase: AxisPhase::Approaching,
            target,
            tolerance,
            commanded_speed: None,
            last_position: Some(start),
            last_valid_position: Some(start),
            dropouts: 0,
            backward_checks: 0,
            backward_travel: 0.0,
        }
    }

    fn is_settled(&self) -> bool {
        self.phase == AxisPhase::Settled
    }

    /// Strictly inside the tolerance band around the target.
    fn within_tolerance(&self, position: f64) -> bool {
        (position - self.target).abs() < self.tolerance
    }

    /// Travel past the target beyond tolerance at `position`, if any.
    fn overshoot_at(&self, position: f64) -> Option<f64> {
        let past = (position - self.target) * self.direction.sign();
        (past >= self.tolerance).then_some(past)
    }
}

/// Sensor, motor and identity of one axis.
pub struct ArmAxis {
    axis: Axis,
    pub sensor: PositionSensor,
    pub motor: AxisMotor,
}

impl ArmAxis {
    pub fn new(
        axis: Axis,
        config: &AxisConfig,
        input: Box<dyn AnalogInput>,
        driver: Box<dyn MotorDriver>,
    ) -> Self {
        let label = axis.to_string();
        Self {
            axis,
            sensor: PositionSensor::new(
                label.clone(),
                input,
                config.calibration.clone(),
                config.sensor.clone(),
            ),
            motor: AxisMotor::new(label, driver, config.motor.clone()),
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    async fn read_live(&mut self) -> AxisReading {
        let reading = self.sensor.read_voltage_detailed().await;
        AxisReading {
            voltage: reading.voltage,
            percent: self.sensor.voltage_to_percent(reading.voltage),
            quality: reading.quality,
        }
    }

    async fn sample_consensus(&mut self, settings: &MotionConfig) -> Option<f64> {
        let mut samples = Vec::with_capacity(settings.consensus_samples);
        for i in 0..settings.consensus_samples {
            if i > 0 {
                sleep(settings.consensus_spacing()).await;
            }
            if let Some(position) = self.sensor.read_position_sample().await {
                samples.push(position);
            }
        }
        let result = consensus(&samples)?;
        if result.outlier_delta() > settings.outlier_log_threshold {
            tracing::debug!(
                "{} axis: outlier {:.1}% rejected (consensus {:.1}%)",
                self.axis,
                result.outlier.unwrap_or_default(),
                result.value
            );
        }
        Some(result.value)
    }

    fn settle(&mut self, state: &mut AxisRuntimeState, position: f64, reason: &str) -> Result<(), MotionError> {
        self.motor.stop()?;
        state.phase = AxisPhase::Settled;
        state.commanded_speed = None;
        tracing::debug!(
            "{} axis settled at {:.1}% (target {:.1}%, {})",
            self.axis,
            position,
            state.target,
            reason
        );
        Ok(())
    }

    /// One iteration of the per-axis control law.
    fn step(
        &mut self,
        state: &mut AxisRuntimeState,
        reading: Option<f64>,
        settings: &MotionConfig,
        speed_scale: f64,
    ) -> Result<(), MotionError> {
        state.last_position = reading;
        let Some(position) = reading else {
            state.dropouts += 1;
            tracing::warn!(
                "{} axis: no usable position ({}/{})",
                self.axis,
                state.dropouts,
                settings.max_sensor_dropouts
            );
            if state.dropouts >= settings.max_sensor_dropouts {
                return Err(MotionError::SensorUnavailable {
                    axis: self.axis,
                    iterations: state.dropouts,
                });
            }
            return Ok(());
        };
        state.dropouts = 0;

        if state.phase == AxisPhase::Approaching && state.commanded_speed.is_some() {
            if let Some(previous) = state.last_valid_position {
                let progress = (position - previous) * state.direction.sign();
                if progress < 0.0 {
                    state.backward_checks += 1;
                    state.backward_travel -= progress;
                    if state.backward_checks >= settings.reversal_checks
                        && state.backward_travel > settings.reversal_threshold
                    {
                        tracing::error!(
                            "{} axis moved {:.1}% against commanded {} direction",
                            self.axis,
                            state.backward_travel,
                            state.direction
                        );
                        return Err(MotionError::DirectionReversal {
                            axis: self.axis,
                            direction: state.direction,
                        });
                    }
                } else if progress > 0.0 {
                    state.backward_checks = 0;
                    state.backward_travel = 0.0;
                }
            }
        }
        state.last_valid_position = Some(position);

        let remaining = (state.target - position) * state.direction.sign();

        if state.phase == AxisPhase::Settled {
            if remaining <= state.tolerance {
                return Ok(());
            }
            tracing::debug!(
                "{} axis fell short of {:.1}% at {:.1}%, resuming",
                self.axis,
                state.target,
                position
            );
            state.phase = AxisPhase::Approaching;
            state.backward_checks = 0;
            state.backward_travel = 0.0;
        }

        if state.within_tolerance(position) {
            return self.settle(state, position, "within tolerance");
        }
        if remaining < 0.0 {
            // Without a path hint the direction was chosen towards the target, so
            // ending far beyond it means the start reading or the arm is wrong.
            if !state.hinted && -remaining > settings.max_overshoot {
                self.motor.stop()?;
                state.commanded_speed = None;
                tracing::error!(
                    "{} axis at {:.1}% ran {:.1}% past target {:.1}%",
                    self.axis,
                    position,
                    -remaining,
                    state.target
                );
                return Err(MotionError::Overshoot {
                    axis: self.axis,
                    target: state.target,
                    overshoot: -remaining,
                });
            }
            return self.settle(state, position, "passed target");
        }

        let voltage = self.sensor.last_voltage();
        let safety = self
            .motor
            .check_safety_limits(voltage, self.sensor.calibration(), state.direction);
        if safety.should_stop {
            return Err(MotionError::SafetyLimit {
                axis: self.axis,
                voltage,
            });
        }

        let speed = (settings.speed_for_error(remaining) * speed_scale)
            .min(safety.max_allowed_speed)
            .clamp(0.0, 100.0);
        match state.commanded_speed {
            None => {
                self.motor.set_direction(state.direction)?;
                self.motor.set_speed(speed)?;
                state.commanded_speed = Some(speed);
            }
            Some(current) if (current - speed).abs() > f64::EPSILON => {
                self.motor.set_speed(speed)?;
                state.commanded_speed = Some(speed);
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Open-loop drive to both physical stops, reading the voltage at each.
    async fn sweep(&mut self, speed: f64, drive_time: Duration) -> Result<AxisVoltageRange, MotionError> {
        let mut measured = [0.0; 2];
        for (slot, direction) in [Direction::Reverse, Direction::Forward].into_iter().enumerate() {
            tracing::info!("Calibrating {} axis: driving {} for {:?}", self.axis, direction, drive_time);
            self.motor.set_direction(direction)?;
            self.motor.set_speed(speed)?;
            sleep(drive_time).await;
            self.motor.stop()?;
            sleep(Duration::from_millis(200)).await;
            measured[slot] = self
                .sensor
                .sample_raw(CALIBRATION_SAMPLES)
                .await
                .ok_or(MotionError::SensorUnavailable {
                    axis: self.axis,
                    iterations: 1,
                })?;
            tracing::info!("{} axis {} extreme: {:.3}V", self.axis, direction, measured[slot]);
        }
        Ok(AxisVoltageRange {
            min_voltage: measured[0].min(measured[1]),
            max_voltage: measured[0].max(measured[1]),
        })
    }
}

/// Owns both axes. Callers share it as `Arc<tokio::sync::Mutex<MotionController>>`.
pub struct MotionController {
    x: ArmAxis,
    y: ArmAxis,
    settings: MotionConfig,
    position_tx: watch::Sender<ArmPosition>,
}

impl MotionController {
    pub fn new(x: ArmAxis, y: ArmAxis, settings: MotionConfig) -> Self {
        let (position_tx, _) = watch::channel(ArmPosition::default());
        Self {
            x,
            y,
            settings,
            position_tx,
        }
    }

    pub fn settings(&self) -> &MotionConfig {
        &self.settings
    }

    pub fn axis(&self, axis: Axis) -> &ArmAxis {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    pub fn subscribe_position(&self) -> watch::Receiver<ArmPosition> {
        self.position_tx.subscribe()
    }

    /// Most recently published position, without touching the sensors.
    pub fn last_position(&self) -> ArmPosition {
        *self.position_tx.borrow()
    }

    pub fn sensor_stats(&self) -> (SensorStats, SensorStats) {
        (self.x.sensor.stats(), self.y.sensor.stats())
    }

    /// Single filtered read of both axes; publishes the result.
    pub async fn read_position(&mut self) -> ArmPosition {
        let x = self.x.sensor.read_position_percent().await;
        let y = self.y.sensor.read_position_percent().await;
        let position = ArmPosition::new(x, y);
        self.position_tx.send_replace(position);
        position
    }

    /// Voltage-level view of both sensors. Does not publish a position.
    pub async fn read_live(&mut self) -> LiveReading {
        LiveReading {
            x: self.x.read_live().await,
            y: self.y.read_live().await,
        }
    }

    /// Stop both motors. Both are attempted even if the first fails.
    pub fn stop_all(&mut self) -> Result<(), HardwareError> {
        let x = self.x.motor.stop();
        let y = self.y.motor.stop();
        x.and(y)
    }

    pub fn emergency_stop(&mut self) {
        tracing::warn!("Emergency stop: both motors");
        if let Err(e) = self.stop_all() {
            tracing::error!("Emergency stop failed: {}", e);
        }
    }

    pub fn is_moving(&self) -> bool {
        self.x.motor.is_running() || self.y.motor.is_running()
    }

    /// Drive both axes simultaneously to the requested target.
    ///
    /// Each axis moves in one fixed direction for the whole call and locks once it
    /// is within tolerance or has passed the target. Every failure path leaves
    /// both motors stopped.
    pub async fn move_to(
        &mut self,
        request: &MoveRequest,
        stop: &StopSignal,
    ) -> Result<MoveReport, MotionError> {
        let started = Instant::now();
        let target = request.target();
        let x_tolerance = self
            .settings
            .adjusted_tolerance(target.x, request.x_tolerance);
        let y_tolerance = self
            .settings
            .adjusted_tolerance(target.y, request.y_tolerance);

        self.x.motor.reset_safety();
        self.y.motor.reset_safety();

        let start = match self.sample_start().await {
            Ok(start) => start,
            Err(e) => {
                tracing::warn!("Move to {} aborted before starting: {}", target, e);
                self.emergency_stop();
                return Err(e);
            }
        };
        let direction_for = |axis: Axis, current: f64, goal: f64| {
            match request.profile.as_ref().and_then(|p| p.direction_hint(axis)) {
                Some(direction) => (direction, true),
                None => (Direction::towards(current, goal), false),
            }
        };
        let (x_direction, x_hinted) = direction_for(Axis::X, start.x, target.x);
        let (y_direction, y_hinted) = direction_for(Axis::Y, start.y, target.y);
        let mut x_state =
            AxisRuntimeState::new(x_direction, x_hinted, start.x, target.x, x_tolerance);
        let mut y_state =
            AxisRuntimeState::new(y_direction, y_hinted, start.y, target.y, y_tolerance);
        tracing::info!(
            "Moving from {} to {} (X {} ±{:.2}%, Y {} ±{:.2}%)",
            start,
            target,
            x_state.direction,
            x_tolerance,
            y_state.direction,
            y_tolerance
        );

        let result = self
            .settle_loop(&mut x_state, &mut y_state, request, stop, started)
            .await;
        if let Err(e) = &result {
            tracing::warn!("Move to {} aborted: {}", target, e);
            self.emergency_stop();
        }
        result
    }

    /// Start position from the same consensus sampling the settle loop uses.
    ///
    /// A single filtered read can still be holding a pre-jump position, so an axis
    /// without consensus is sampled again, up to `max_sensor_dropouts` bursts.
    async fn sample_start(&mut self) -> Result<ArmPosition, MotionError> {
        let attempts = self.settings.max_sensor_dropouts.max(1);
        let mut x = None;
        let mut y = None;
        for attempt in 1..=attempts {
            if x.is_none() {
                x = self.x.sample_consensus(&self.settings).await;
            }
            if y.is_none() {
                y = self.y.sample_consensus(&self.settings).await;
            }
            if let (Some(x), Some(y)) = (x, y) {
                let position = ArmPosition::new(x, y);
                self.position_tx.send_replace(position);
                return Ok(position);
            }
            tracing::debug!("No start consensus yet ({}/{})", attempt, attempts);
            if attempt < attempts {
                sleep(self.settings.settle_interval()).await;
            }
        }
        Err(MotionError::SensorUnavailable {
            axis: if x.is_none() { Axis::X } else { Axis::Y },
            iterations: attempts,
        })
    }

    async fn settle_loop(
        &mut self,
        x_state: &mut AxisRuntimeState,
        y_state: &mut AxisRuntimeState,
        request: &MoveRequest,
        stop: &StopSignal,
        started: Instant,
    ) -> Result<MoveReport, MotionError> {
        let deadline = started + request.max_wait;
        let mut stop = stop.clone();
        let mut iterations = 0u32;
        let mut confirmations = 0u32;

        loop {
            if stop.is_raised() {
                return Err(MotionError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(MotionError::Timeout {
                    waited: started.elapsed(),
                    target: request.target(),
                    last: self.last_position(),
                });
            }
            iterations += 1;

            let x_reading = self.x.sample_consensus(&self.settings).await;
            let y_reading = self.y.sample_consensus(&self.settings).await;
            let position = ArmPosition::new(
                x_reading.or(x_state.last_valid_position).unwrap_or_default(),
                y_reading.or(y_state.last_valid_position).unwrap_or_default(),
            );
            self.position_tx.send_replace(position);

            self.x
                .step(x_state, x_reading, &self.settings, request.speed_scale)?;
            self.y
                .step(y_state, y_reading, &self.settings, request.speed_scale)?;

            if x_state.is_settled() && y_state.is_settled() {
                confirmations += 1;
                if confirmations >= self.settings.settle_confirmations {
                    self.stop_all()?;
                    let elapsed = started.elapsed();
                    tracing::info!(
                        "Reached {} at {} in {:.2}s ({} checks)",
                        request.target(),
                        position,
                        elapsed.as_secs_f64(),
                        iterations
                    );
                    let x_overshoot = Self::report_overshoot(Axis::X, x_state, position.x);
                    let y_overshoot = Self::report_overshoot(Axis::Y, y_state, position.y);
                    return Ok(MoveReport {
                        final_position: position,
                        elapsed,
                        iterations,
                        x_overshoot,
                        y_overshoot,
                    });
                }
            } else {
                confirmations = 0;
            }

            tokio::select! {
                _ = sleep(self.settings.settle_interval()) => {}
                _ = stop.raised() => {}
            }
        }
    }

    fn report_overshoot(axis: Axis, state: &AxisRuntimeState, position: f64) -> Option<f64> {
        let overshoot = state.overshoot_at(position)?;
        if state.hinted {
            tracing::debug!("{} axis settled {:.1}% past {:.1}% along the path", axis, overshoot, state.target);
        } else {
            tracing::warn!("{} axis settled {:.1}% past target {:.1}%", axis, overshoot, state.target);
        }
        Some(overshoot)
    }

    /// Sweep each axis to both physical stops at `calibration_speed` and report the
    /// voltages seen there.
    pub async fn calibrate(&mut self, drive_time: Duration) -> Result<CalibrationReport, MotionError> {
        let speed = self.settings.calibration_speed;
        let x_axis = match self.x.sweep(speed, drive_time).await {
            Ok(range) => range,
            Err(e) => {
                self.emergency_stop();
                return Err(e);
            }
        };
        let y_axis = match self.y.sweep(speed, drive_time).await {
            Ok(range) => range,
            Err(e) => {
                self.emergency_stop();
                return Err(e);
            }
        };
        Ok(CalibrationReport { x_axis, y_axis })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_request_defaults_from_config() {
        let settings = MotionConfig::default();
        let request = MoveRequest::new(120.0, -3.0, &settings);
        assert_eq!(request.target_x, 100.0);
        assert_eq!(request.target_y, 0.0);
        assert_eq!(request.x_tolerance, settings.x_tolerance);
        assert_eq!(request.max_wait, Duration::from_secs(15));
        assert_eq!(request.with_speed_scale(10.0).speed_scale, 2.0);
    }

    #[test]
    fn test_runtime_state_starts_approaching() {
        let state = AxisRuntimeState::new(Direction::Forward, false, 0.0, 50.0, 1.0);
        assert!(!state.is_settled());
        assert_eq!(state.commanded_speed, None);
        assert_eq!(state.last_valid_position, Some(0.0));
    }

    #[test]
    fn test_overshoot_measured_along_direction() {
        let forward = AxisRuntimeState::new(Direction::Forward, false, 0.0, 50.0, 1.0);
        assert_eq!(forward.overshoot_at(50.5), None);
        assert_eq!(forward.overshoot_at(48.0), None);
        assert_eq!(forward.overshoot_at(53.0), Some(3.0));

        let reverse = AxisRuntimeState::new(Direction::Reverse, true, 80.0, 50.0, 1.0);
        assert_eq!(reverse.overshoot_at(53.0), None);
        assert_eq!(reverse.overshoot_at(46.0), Some(4.0));
        // Exactly one tolerance away is no longer inside it.
        assert_eq!(reverse.overshoot_at(49.0), Some(1.0));
    }

    #[test]
    fn test_tolerance_band_is_open() {
        let state = AxisRuntimeState::new(Direction::Forward, false, 0.0, 50.0, 0.5);
        assert!(state.within_tolerance(50.0));
        assert!(state.within_tolerance(49.75));
        assert!(!state.within_tolerance(50.5));
        assert!(!state.within_tolerance(49.5));
    }
}
