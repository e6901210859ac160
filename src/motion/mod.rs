// src/motion/mod.rs - Dual-axis closed-loop motion
pub mod consensus;
pub mod controller;

pub use consensus::{consensus, Consensus};
pub use controller::{
    ArmAxis, AxisReading, AxisVoltageRange, CalibrationReport, LiveReading, MotionController,
    MotionError, MoveReport, MoveRequest,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Arm position in percent of calibrated travel per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ArmPosition {
    pub x: f64,
    pub y: f64,
}

impl ArmPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// Largest per-axis difference.
    pub fn max_delta(&self, other: &ArmPosition) -> f64 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

impl fmt::Display for ArmPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={:.1}%, Y={:.1}%", self.x, self.y)
    }
}

/// Cooperative cancellation observed by long-running motion.
#[derive(Debug, Clone)]
pub struct StopSignal(Option<watch::Receiver<bool>>);

impl StopSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        Self(None)
    }

    /// A raise handle and the signal it controls.
    pub fn channel() -> (watch::Sender<bool>, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, StopSignal(Some(rx)))
    }

    pub fn is_raised(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the signal is raised, or never if the sender is gone
    /// without raising it.
    pub async fn raised(&mut self) {
        match self.0.as_mut() {
            Some(rx) => {
                let closed = rx.wait_for(|raised| *raised).await.is_err();
                if closed {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_signal() {
        let (tx, mut signal) = StopSignal::channel();
        assert!(!signal.is_raised());
        tx.send(true).unwrap();
        assert!(signal.is_raised());
        tokio_test::assert_ready!(tokio_test::task::spawn(signal.raised()).poll());
        assert!(!StopSignal::never().is_raised());
    }

    #[test]
    fn test_position_delta() {
        let a = ArmPosition::new(10.0, 50.0);
        let b = ArmPosition::new(12.0, 45.0);
        assert_eq!(a.max_delta(&b), 5.0);
        assert_eq!(a.get(Axis::Y), 50.0);
    }
}
