// src/hardware/motor.rs - One DC motor behind an H-bridge, with calibrated safety limits
use crate::config::{AxisCalibration, MotorConfig};
use crate::hardware::{Direction, HardwareError, MotorDriver};

/// Consecutive readings at or past the safety margin before a stop is forced.
const SAFETY_VIOLATIONS_TO_STOP: u32 = 3;

/// Result of a safety limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyCheck {
    pub should_stop: bool,
    pub max_allowed_speed: f64,
}

pub struct AxisMotor {
    label: String,
    driver: Box<dyn MotorDriver>,
    settings: MotorConfig,
    direction: Option<Direction>,
    speed: f64,
    limit_violations: u32,
}

impl AxisMotor {
    pub fn new(label: impl Into<String>, driver: Box<dyn MotorDriver>, settings: MotorConfig) -> Self {
        Self {
            label: label.into(),
            driver,
            settings,
            direction: None,
            speed: 0.0,
            limit_violations: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Last commanded logical direction, `None` after a stop.
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Last commanded duty cycle, after the speed multiplier.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_running(&self) -> bool {
        self.direction.is_some() && self.speed > 0.0
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<(), HardwareError> {
        let physical = if self.settings.inverted {
            direction.opposite()
        } else {
            direction
        };
        let (in1, in2) = match physical {
            Direction::Forward => (true, false),
            Direction::Reverse => (false, true),
        };
        self.driver.set_direction_lines(in1, in2).inspect_err(|e| {
            tracing::error!("{} motor: failed to set direction {}: {}", self.label, direction, e);
        })?;
        if self.direction != Some(direction) {
            tracing::debug!("{} motor direction: {}", self.label, direction);
        }
        self.direction = Some(direction);
        Ok(())
    }

    /// Speed in percent; scaled by the per-axis multiplier and clamped to 0-100.
    pub fn set_speed(&mut self, percent: f64) -> Result<(), HardwareError> {
        let duty = (percent.abs() * self.settings.speed_multiplier).clamp(0.0, 100.0);
        self.driver.set_duty_cycle(duty).inspect_err(|e| {
            tracing::error!("{} motor: failed to set speed {:.1}%: {}", self.label, duty, e);
        })?;
        self.speed = duty;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), HardwareError> {
        self.driver.coast().inspect_err(|e| {
            tracing::error!("{} motor: failed to stop: {}", self.label, e);
        })?;
        if self.direction.is_some() {
            tracing::debug!("{} motor stopped", self.label);
        }
        self.direction = None;
        self.speed = 0.0;
        Ok(())
    }

    pub fn reset_safety(&mut self) {
        self.limit_violations = 0;
    }

    /// Check the calibrated limit in the direction of travel.
    ///
    /// Inside the slow zone the speed is capped; at or past the safety margin a stop
    /// is requested only after several consecutive violating readings.
    pub fn check_safety_limits(
        &mut self,
        voltage: f64,
        calibration: &AxisCalibration,
        direction: Direction,
    ) -> SafetyCheck {
        let (violating, in_slow_zone) = match direction {
            Direction::Forward => (
                voltage >= calibration.max_voltage - calibration.safety_margin,
                voltage >= calibration.max_voltage - calibration.slow_zone_margin,
            ),
            Direction::Reverse => (
                voltage <= calibration.min_voltage + calibration.safety_margin,
                voltage <= calibration.min_voltage + calibration.slow_zone_margin,
            ),
        };

        if violating {
            self.limit_violations += 1;
            if self.limit_violations >= SAFETY_VIOLATIONS_TO_STOP {
                tracing::warn!(
                    "{} motor: safety limit reached at {:.3}V moving {} ({} consecutive readings)",
                    self.label,
                    voltage,
                    direction,
                    self.limit_violations
                );
                return SafetyCheck {
                    should_stop: true,
                    max_allowed_speed: 0.0,
                };
            }
            tracing::debug!(
                "{} motor: near safety limit at {:.3}V ({}/{})",
                self.label,
                voltage,
                self.limit_violations,
                SAFETY_VIOLATIONS_TO_STOP
            );
            return SafetyCheck {
                should_stop: false,
                max_allowed_speed: calibration.safety_slow_speed,
            };
        }

        self.limit_violations = 0;
        SafetyCheck {
            should_stop: false,
            max_allowed_speed: if in_slow_zone {
                calibration.safety_slow_speed
            } else {
                100.0
            },
        }
    }
}
