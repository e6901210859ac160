// src/simulator/mod.rs - Simulated arm implementing the motor and ADC seams
//
// Each axis integrates position over tokio time, so tests running with a paused
// clock see deterministic motion.
use crate::config::{AxisCalibration, Config, SimulatorConfig};
use crate::hardware::{AnalogInput, HardwareError, MotorDriver};
use crate::motion::{ArmAxis, ArmPosition, Axis, MotionController};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

struct SimAxisState {
    label: String,
    position: f64,
    lines: (bool, bool),
    duty: f64,
    updated: Instant,
    min_voltage: f64,
    max_voltage: f64,
    saturation_voltage: f64,
    travel_rate: f64,
    noise_voltage: f64,
    glitch_probability: f64,
    rng: StdRng,
    read_failure: bool,
    reversed_wiring: bool,
    stop_commands: u64,
}

impl SimAxisState {
    /// Integrate motion since the last update.
    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.saturating_duration_since(self.updated).as_secs_f64();
        self.updated = now;
        let sign = match self.lines {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        };
        let sign = if self.reversed_wiring { -sign } else { sign };
        self.position =
            (self.position + sign * self.travel_rate * self.duty / 100.0 * dt).clamp(0.0, 100.0);
    }

    fn voltage(&mut self) -> f64 {
        if self.glitch_probability > 0.0 && self.rng.random_bool(self.glitch_probability.min(1.0)) {
            return if self.rng.random_bool(0.5) {
                0.0
            } else {
                self.saturation_voltage
            };
        }
        let span = self.max_voltage - self.min_voltage;
        let mut voltage = self.min_voltage + self.position / 100.0 * span;
        if self.noise_voltage > 0.0 {
            voltage += self.rng.random_range(-self.noise_voltage..=self.noise_voltage);
        }
        voltage
    }
}

/// Shared handle to one simulated axis. Clones observe the same state.
#[derive(Clone)]
pub struct SimAxis {
    state: Arc<Mutex<SimAxisState>>,
}

impl SimAxis {
    pub fn new(
        label: impl Into<String>,
        calibration: &AxisCalibration,
        saturation_voltage: f64,
        start: f64,
        settings: &SimulatorConfig,
        seed: u64,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimAxisState {
                label: label.into(),
                position: start.clamp(0.0, 100.0),
                lines: (false, false),
                duty: 0.0,
                updated: Instant::now(),
                min_voltage: calibration.min_voltage,
                max_voltage: calibration.max_voltage,
                saturation_voltage,
                travel_rate: settings.travel_rate,
                noise_voltage: settings.noise_voltage,
                glitch_probability: settings.glitch_probability,
                rng: StdRng::seed_from_u64(seed),
                read_failure: false,
                reversed_wiring: false,
                stop_commands: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimAxisState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn motor(&self) -> SimMotor {
        SimMotor { axis: self.clone() }
    }

    pub fn potentiometer(&self) -> SimPotentiometer {
        SimPotentiometer { axis: self.clone() }
    }

    /// True position in percent.
    pub fn position(&self) -> f64 {
        let mut state = self.lock();
        state.advance();
        state.position
    }

    /// Move the axis by hand, as during teach mode.
    pub fn set_position(&self, position: f64) {
        let mut state = self.lock();
        state.advance();
        state.position = position.clamp(0.0, 100.0);
    }

    pub fn is_stopped(&self) -> bool {
        let state = self.lock();
        state.duty == 0.0 || state.lines == (false, false)
    }

    pub fn duty(&self) -> f64 {
        self.lock().duty
    }

    pub fn stop_commands(&self) -> u64 {
        self.lock().stop_commands
    }

    /// Make every ADC read fail.
    pub fn set_read_failure(&self, failing: bool) {
        self.lock().read_failure = failing;
    }

    /// Motor physically wired backwards relative to the sensor.
    pub fn set_reversed_wiring(&self, reversed: bool) {
        let mut state = self.lock();
        state.advance();
        state.reversed_wiring = reversed;
    }

    pub fn set_glitch_probability(&self, probability: f64) {
        self.lock().glitch_probability = probability.clamp(0.0, 1.0);
    }
}

pub struct SimMotor {
    axis: SimAxis,
}

impl MotorDriver for SimMotor {
    fn set_direction_lines(&mut self, in1: bool, in2: bool) -> Result<(), HardwareError> {
        let mut state = self.axis.lock();
        state.advance();
        if in1 && in2 {
            return Err(HardwareError::Driver {
                motor: state.label.clone(),
                reason: "both direction lines high (brake short)".to_string(),
            });
        }
        state.lines = (in1, in2);
        Ok(())
    }

    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), HardwareError> {
        let mut state = self.axis.lock();
        state.advance();
        state.duty = duty.clamp(0.0, 100.0);
        Ok(())
    }

    fn coast(&mut self) -> Result<(), HardwareError> {
        let mut state = self.axis.lock();
        state.advance();
        state.duty = 0.0;
        state.lines = (false, false);
        state.stop_commands += 1;
        Ok(())
    }
}

pub struct SimPotentiometer {
    axis: SimAxis,
}

impl AnalogInput for SimPotentiometer {
    fn read_raw_voltage(&mut self) -> Result<f64, HardwareError> {
        let mut state = self.axis.lock();
        if state.read_failure {
            return Err(HardwareError::AnalogRead {
                channel: state.label.clone(),
                reason: "simulated bus error".to_string(),
            });
        }
        state.advance();
        Ok(state.voltage())
    }
}

/// Handles to both simulated axes.
#[derive(Clone)]
pub struct SimulatedArm {
    pub x: SimAxis,
    pub y: SimAxis,
}

impl SimulatedArm {
    pub fn new(config: &Config) -> Self {
        let sim = &config.simulator;
        Self {
            x: SimAxis::new(
                "X",
                &config.x_axis.calibration,
                config.x_axis.sensor.saturation_voltage,
                sim.start_x,
                sim,
                sim.seed,
            ),
            y: SimAxis::new(
                "Y",
                &config.y_axis.calibration,
                config.y_axis.sensor.saturation_voltage,
                sim.start_y,
                sim,
                sim.seed.wrapping_add(1),
            ),
        }
    }

    pub fn position(&self) -> ArmPosition {
        ArmPosition::new(self.x.position(), self.y.position())
    }

    pub fn set_position(&self, x: f64, y: f64) {
        self.x.set_position(x);
        self.y.set_position(y);
    }

    pub fn is_stopped(&self) -> bool {
        self.x.is_stopped() && self.y.is_stopped()
    }

    pub fn axis(&self, axis: Axis) -> &SimAxis {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    /// A controller wired to this simulated arm.
    pub fn controller(&self, config: &Config) -> MotionController {
        let x = ArmAxis::new(
            Axis::X,
            &config.x_axis,
            Box::new(self.x.potentiometer()),
            Box::new(self.x.motor()),
        );
        let y = ArmAxis::new(
            Axis::Y,
            &config.y_axis,
            Box::new(self.y.potentiometer()),
            Box::new(self.y.motor()),
        );
        MotionController::new(x, y, config.motion.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn test_axis_moves_with_duty() {
        let config = Config::default();
        let axis = SimAxis::new("X", &config.x_axis.calibration, 4.096, 0.0, &config.simulator, 1);
        let mut motor = axis.motor();
        motor.set_direction_lines(true, false).unwrap();
        motor.set_duty_cycle(50.0).unwrap();
        advance(Duration::from_secs(2)).await;
        // 20%/s at full duty, half duty for two seconds.
        assert!((axis.position() - 20.0).abs() < 1e-6);
        motor.coast().unwrap();
        advance(Duration::from_secs(2)).await;
        assert!((axis.position() - 20.0).abs() < 1e-6);
        assert!(axis.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_potentiometer_maps_position() {
        let config = Config::default();
        let axis = SimAxis::new("Y", &config.y_axis.calibration, 4.096, 50.0, &config.simulator, 1);
        let voltage = axis.potentiometer().read_raw_voltage().unwrap();
        assert!((voltage - config.y_axis.calibration.midpoint()).abs() < 1e-9);
        axis.set_read_failure(true);
        assert!(axis.potentiometer().read_raw_voltage().is_err());
    }

    #[test]
    fn test_brake_short_rejected() {
        let config = Config::default();
        let axis = SimAxis::new("X", &config.x_axis.calibration, 4.096, 0.0, &config.simulator, 1);
        assert!(axis.motor().set_direction_lines(true, true).is_err());
    }
}
