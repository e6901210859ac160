// src/hardware/mod.rs - Hardware seams for the arm: H-bridge motor drivers and analog inputs
pub mod motor;
pub mod sensor;

pub use motor::{AxisMotor, SafetyCheck};
pub use sensor::{PositionSensor, ReadQuality, SensorStats, VoltageReading};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Analog read failed on {channel}: {reason}")]
    AnalogRead { channel: String, reason: String },
    #[error("Motor driver error on {motor}: {reason}")]
    Driver { motor: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Direction of travel. `Forward` moves towards `max_voltage`, i.e. increasing percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// Direction needed to get from `current` to `target`.
    pub fn towards(current: f64, target: f64) -> Self {
        if target > current {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Low-level H-bridge channel for one DC motor.
///
/// Implementations talk to GPIO/PWM directly; they know nothing about axes or
/// calibration. `in1`/`in2` are the two direction lines.
pub trait MotorDriver: Send {
    fn set_direction_lines(&mut self, in1: bool, in2: bool) -> Result<(), HardwareError>;

    /// Duty cycle in percent, 0-100.
    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), HardwareError>;

    /// Zero duty and both direction lines low; the motor coasts.
    fn coast(&mut self) -> Result<(), HardwareError> {
        self.set_duty_cycle(0.0)?;
        self.set_direction_lines(false, false)
    }
}

/// Single-ended ADC channel wired to a potentiometer wiper.
pub trait AnalogInput: Send {
    fn read_raw_voltage(&mut self) -> Result<f64, HardwareError>;
}
