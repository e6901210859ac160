// src/lib.rs - Dual-axis TV arm controller with teach-and-replay
pub mod arm_channel;
pub mod config;
pub mod file_manager;
pub mod hardware;
pub mod motion;
pub mod path;
pub mod path_job;
pub mod simulator;
pub mod telemetry;

// Re-exports for the binary and integration tests
pub use crate::arm_channel::{ArmCommand, ArmHandle, ArmRequest, ArmResponse};
pub use crate::config::{load_config, Config, ConfigError};
pub use crate::file_manager::{PathStore, PathStoreError};
pub use crate::hardware::{AnalogInput, Direction, HardwareError, MotorDriver};
pub use crate::motion::{ArmPosition, MotionController, MotionError, MoveRequest, StopSignal};
pub use crate::path::{Path, PathKind, Waypoint};
pub use crate::path_job::{JobError, JobEvent, JobStatus, PathJobManager, PlaybackOptions};
pub use crate::simulator::SimulatedArm;
