//! # Arm Configuration
//!
//! All empirically tuned constants of the arm live here: voltage calibration per
//! axis, sensor filtering, the settling loop, recording and the simulator.
//! Values differ between hardware units, so treat them as calibration data.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [system]
//! log_level = "debug"
//!
//! [x_axis.calibration]
//! min_voltage = 1.670
//! max_voltage = 2.884
//!
//! [y_axis.calibration]
//! min_voltage = 0.821
//! max_voltage = 3.017
//! max_drift_percent = 15.0
//!
//! [motion]
//! x_tolerance = 0.3
//! max_wait_secs = 20.0
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use tv_arm_rs::config::Config;
//! let toml_str = r#"
//! [x_axis.calibration]
//! min_voltage = 1.670
//! max_voltage = 2.884
//! "#;
//! let config: Config = toml::from_str(toml_str).unwrap();
//! assert_eq!(config.x_axis.calibration.max_voltage, 2.884);
//! assert!(config.validate().is_ok());
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the arm, its two axes, motion control and recording.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub x_axis: AxisConfig,
    #[serde(default)]
    pub y_axis: AxisConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub presets: PresetConfig,
    #[serde(default)]
    pub manual: ManualConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_position_update_interval_ms")]
    pub position_update_interval_ms: u64,
    #[serde(default)]
    pub restore_position_on_startup: bool,
    #[serde(default = "default_center")]
    pub default_x_position: f64,
    #[serde(default = "default_center")]
    pub default_y_position: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            position_update_interval_ms: default_position_update_interval_ms(),
            restore_position_on_startup: false,
            default_x_position: default_center(),
            default_y_position: default_center(),
        }
    }
}

impl SystemConfig {
    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_interval_ms)
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

/// Everything that belongs to one axis: its potentiometer calibration,
/// its motor and its sensor filter.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AxisConfig {
    #[serde(default)]
    pub calibration: AxisCalibration,
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
}

/// Voltage calibration of one axis. Read-only after load.
///
/// `safety_margin` and `slow_zone_margin` are measured in volts inward from the
/// calibrated extremes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AxisCalibration {
    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default = "default_slow_zone_margin")]
    pub slow_zone_margin: f64,
    #[serde(default = "default_safety_slow_speed")]
    pub safety_slow_speed: f64,
    #[serde(default = "default_max_drift_percent")]
    pub max_drift_percent: f64,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self {
            min_voltage: default_min_voltage(),
            max_voltage: default_max_voltage(),
            safety_margin: default_safety_margin(),
            slow_zone_margin: default_slow_zone_margin(),
            safety_slow_speed: default_safety_slow_speed(),
            max_drift_percent: default_max_drift_percent(),
        }
    }
}

impl AxisCalibration {
    pub fn span(&self) -> f64 {
        self.max_voltage - self.min_voltage
    }

    pub fn midpoint(&self) -> f64 {
        (self.min_voltage + self.max_voltage) / 2.0
    }

    pub fn validate(&self, axis: &str) -> Result<(), String> {
        if self.min_voltage < 0.0 || self.max_voltage <= self.min_voltage {
            return Err(format!(
                "{} axis: max_voltage ({:.3}) must be greater than min_voltage ({:.3}) and both non-negative",
                axis, self.max_voltage, self.min_voltage
            ));
        }
        if self.safety_margin < 0.0 || self.slow_zone_margin < self.safety_margin {
            return Err(format!(
                "{} axis: slow_zone_margin must be >= safety_margin >= 0",
                axis
            ));
        }
        if self.slow_zone_margin * 2.0 >= self.span() {
            return Err(format!("{} axis: slow zones overlap the whole travel", axis));
        }
        if !(0.0..=100.0).contains(&self.safety_slow_speed) {
            return Err(format!("{} axis: safety_slow_speed must be within 0-100", axis));
        }
        if self.max_drift_percent <= 0.0 {
            return Err(format!("{} axis: max_drift_percent must be > 0", axis));
        }
        Ok(())
    }
}

/// DC motor settings for one axis.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorConfig {
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f64,
    /// Swap the direction lines when the motor is wired backwards.
    #[serde(default)]
    pub inverted: bool,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            speed_multiplier: default_speed_multiplier(),
            inverted: false,
        }
    }
}

/// Potentiometer filter settings for one axis.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    #[serde(default = "default_samples_per_read")]
    pub samples_per_read: usize,
    #[serde(default = "default_sample_spacing_ms")]
    pub sample_spacing_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Full-scale voltage of the ADC; readings pinned here are treated as faults.
    #[serde(default = "default_saturation_voltage")]
    pub saturation_voltage: f64,
    #[serde(default = "default_true")]
    pub enable_filtering: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            samples_per_read: default_samples_per_read(),
            sample_spacing_ms: default_sample_spacing_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            saturation_voltage: default_saturation_voltage(),
            enable_filtering: true,
        }
    }
}

impl SensorConfig {
    pub fn sample_spacing(&self) -> Duration {
        Duration::from_millis(self.sample_spacing_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Settling loop constants shared by both axes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionConfig {
    #[serde(default = "default_tolerance")]
    pub x_tolerance: f64,
    #[serde(default = "default_tolerance")]
    pub y_tolerance: f64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: f64,
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,
    #[serde(default = "default_consensus_samples")]
    pub consensus_samples: usize,
    #[serde(default = "default_consensus_spacing_ms")]
    pub consensus_spacing_ms: u64,
    #[serde(default = "default_outlier_log_threshold")]
    pub outlier_log_threshold: f64,
    #[serde(default = "default_settle_confirmations")]
    pub settle_confirmations: u32,
    #[serde(default = "default_max_sensor_dropouts")]
    pub max_sensor_dropouts: u32,
    #[serde(default = "default_cruise_speed")]
    pub cruise_speed: f64,
    #[serde(default = "default_approach_speed")]
    pub approach_speed: f64,
    #[serde(default = "default_precision_speed")]
    pub precision_speed: f64,
    #[serde(default = "default_slow_band")]
    pub slow_band: f64,
    #[serde(default = "default_precision_band")]
    pub precision_band: f64,
    #[serde(default = "default_near_zero_threshold")]
    pub near_zero_threshold: f64,
    #[serde(default = "default_near_zero_fraction")]
    pub near_zero_fraction: f64,
    #[serde(default = "default_near_zero_floor")]
    pub near_zero_floor: f64,
    /// How far an axis may run past a target it was driven towards before the
    /// move fails instead of settling.
    #[serde(default = "default_max_overshoot")]
    pub max_overshoot: f64,
    #[serde(default = "default_reversal_threshold")]
    pub reversal_threshold: f64,
    #[serde(default = "default_reversal_checks")]
    pub reversal_checks: u32,
    #[serde(default = "default_waypoint_pause_ms")]
    pub waypoint_pause_ms: u64,
    #[serde(default = "default_calibration_speed")]
    pub calibration_speed: f64,
    #[serde(default = "default_calibration_drive_secs")]
    pub calibration_drive_secs: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            x_tolerance: default_tolerance(),
            y_tolerance: default_tolerance(),
            max_wait_secs: default_max_wait_secs(),
            settle_interval_ms: default_settle_interval_ms(),
            consensus_samples: default_consensus_samples(),
            consensus_spacing_ms: default_consensus_spacing_ms(),
            outlier_log_threshold: default_outlier_log_threshold(),
            settle_confirmations: default_settle_confirmations(),
            max_sensor_dropouts: default_max_sensor_dropouts(),
            cruise_speed: default_cruise_speed(),
            approach_speed: default_approach_speed(),
            precision_speed: default_precision_speed(),
            slow_band: default_slow_band(),
            precision_band: default_precision_band(),
            near_zero_threshold: default_near_zero_threshold(),
            near_zero_fraction: default_near_zero_fraction(),
            near_zero_floor: default_near_zero_floor(),
            max_overshoot: default_max_overshoot(),
            reversal_threshold: default_reversal_threshold(),
            reversal_checks: default_reversal_checks(),
            waypoint_pause_ms: default_waypoint_pause_ms(),
            calibration_speed: default_calibration_speed(),
            calibration_drive_secs: default_calibration_drive_secs(),
        }
    }
}

impl MotionConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.max_wait_secs.max(0.0))
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn consensus_spacing(&self) -> Duration {
        Duration::from_millis(self.consensus_spacing_ms)
    }

    pub fn waypoint_pause(&self) -> Duration {
        Duration::from_millis(self.waypoint_pause_ms)
    }

    pub fn calibration_drive(&self) -> Duration {
        Duration::from_secs_f64(self.calibration_drive_secs.max(0.0))
    }

    /// Damped approach: full cruise far away, slower inside the bands near the target.
    pub fn speed_for_error(&self, error: f64) -> f64 {
        let error = error.abs();
        if error <= self.precision_band {
            self.precision_speed
        } else if error <= self.slow_band {
            self.approach_speed
        } else {
            self.cruise_speed
        }
    }

    /// Targets close to the physical stop get a tighter tolerance, a fraction of
    /// the target value bounded below by `near_zero_floor`.
    pub fn adjusted_tolerance(&self, target: f64, nominal: f64) -> f64 {
        if target < self.near_zero_threshold {
            (target * self.near_zero_fraction)
                .max(self.near_zero_floor)
                .min(nominal)
        } else {
            nominal
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.x_tolerance <= 0.0 || self.y_tolerance <= 0.0 {
            return Err("Tolerances must be > 0".to_string());
        }
        if self.max_wait_secs <= 0.0 {
            return Err("max_wait_secs must be > 0".to_string());
        }
        if self.consensus_samples == 0 {
            return Err("consensus_samples must be at least 1".to_string());
        }
        if self.settle_confirmations == 0 {
            return Err("settle_confirmations must be at least 1".to_string());
        }
        for (label, speed) in [
            ("cruise_speed", self.cruise_speed),
            ("approach_speed", self.approach_speed),
            ("precision_speed", self.precision_speed),
            ("calibration_speed", self.calibration_speed),
        ] {
            if !(0.0..=100.0).contains(&speed) {
                return Err(format!("{} must be within 0-100", label));
            }
        }
        if self.precision_band > self.slow_band {
            return Err("precision_band must not exceed slow_band".to_string());
        }
        if self.max_overshoot <= 0.0 {
            return Err("max_overshoot must be > 0".to_string());
        }
        if self.near_zero_floor <= 0.0 {
            return Err("near_zero_floor must be > 0".to_string());
        }
        Ok(())
    }
}

/// Teach-mode recording settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    #[serde(default = "default_recording_interval_ms")]
    pub recording_interval_ms: u64,
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,
    #[serde(default = "default_paths_directory")]
    pub paths_directory: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            recording_interval_ms: default_recording_interval_ms(),
            position_tolerance: default_position_tolerance(),
            paths_directory: default_paths_directory(),
        }
    }
}

impl RecordingConfig {
    pub fn recording_interval(&self) -> Duration {
        Duration::from_millis(self.recording_interval_ms.max(1))
    }
}

/// What the `Open` and `Close` commands do. A named path wins over the preset
/// position when it exists in the store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresetConfig {
    #[serde(default = "default_open_path")]
    pub open_path: Option<String>,
    #[serde(default = "default_close_path")]
    pub close_path: Option<String>,
    #[serde(default = "default_open_position")]
    pub open_position: [f64; 2],
    #[serde(default = "default_close_position")]
    pub close_position: [f64; 2],
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            open_path: default_open_path(),
            close_path: default_close_path(),
            open_position: default_open_position(),
            close_position: default_close_position(),
        }
    }
}

/// Jogging, the fixed test sequence and the live sensor monitor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManualConfig {
    /// Percent moved per jog step.
    #[serde(default = "default_jog_step")]
    pub jog_step: f64,
    #[serde(default = "default_min_jog_step")]
    pub min_jog_step: f64,
    #[serde(default = "default_max_jog_step")]
    pub max_jog_step: f64,
    /// Change applied by one `+`/`-` adjustment.
    #[serde(default = "default_jog_step_increment")]
    pub jog_step_increment: f64,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// Positions visited in order by the test sequence, as `[x, y]`.
    #[serde(default = "default_test_positions")]
    pub test_positions: Vec<[f64; 2]>,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self {
            jog_step: default_jog_step(),
            min_jog_step: default_min_jog_step(),
            max_jog_step: default_max_jog_step(),
            jog_step_increment: default_jog_step_increment(),
            monitor_interval_ms: default_monitor_interval_ms(),
            test_positions: default_test_positions(),
        }
    }
}

impl ManualConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    pub fn clamp_jog_step(&self, step: f64) -> f64 {
        step.clamp(self.min_jog_step, self.max_jog_step)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_jog_step <= 0.0 || self.max_jog_step < self.min_jog_step {
            return Err("manual: need 0 < min_jog_step <= max_jog_step".to_string());
        }
        if !(self.min_jog_step..=self.max_jog_step).contains(&self.jog_step) {
            return Err("manual: jog_step must be within min_jog_step..max_jog_step".to_string());
        }
        if self.test_positions.is_empty() {
            return Err("manual: test_positions must not be empty".to_string());
        }
        if self
            .test_positions
            .iter()
            .flatten()
            .any(|v| !(0.0..=100.0).contains(v))
        {
            return Err("manual: test_positions must be within 0-100".to_string());
        }
        Ok(())
    }
}

/// Simulated arm used when no hardware backend is attached.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    /// Travel in percent per second at 100% duty.
    #[serde(default = "default_travel_rate")]
    pub travel_rate: f64,
    #[serde(default = "default_center")]
    pub start_x: f64,
    #[serde(default = "default_center")]
    pub start_y: f64,
    #[serde(default)]
    pub noise_voltage: f64,
    #[serde(default)]
    pub glitch_probability: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            travel_rate: default_travel_rate(),
            start_x: default_center(),
            start_y: default_center(),
            noise_voltage: 0.0,
            glitch_probability: 0.0,
            seed: default_seed(),
        }
    }
}

impl Config {
    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.x_axis.calibration.validate("X").map_err(ConfigError::Invalid)?;
        self.y_axis.calibration.validate("Y").map_err(ConfigError::Invalid)?;
        for (axis, sensor) in [("X", &self.x_axis.sensor), ("Y", &self.y_axis.sensor)] {
            if sensor.samples_per_read == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} axis: samples_per_read must be at least 1",
                    axis
                )));
            }
        }
        for (axis, motor) in [("X", &self.x_axis.motor), ("Y", &self.y_axis.motor)] {
            if motor.speed_multiplier <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} axis: speed_multiplier must be > 0",
                    axis
                )));
            }
        }
        self.motion.validate().map_err(ConfigError::Invalid)?;
        self.manual.validate().map_err(ConfigError::Invalid)?;
        if self.recording.position_tolerance < 0.0 {
            return Err(ConfigError::Invalid(
                "recording.position_tolerance must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_position_update_interval_ms() -> u64 { 1000 }
fn default_center() -> f64 { 50.0 }
fn default_min_voltage() -> f64 { 0.1 }
fn default_max_voltage() -> f64 { 3.2 }
fn default_safety_margin() -> f64 { 0.05 }
fn default_slow_zone_margin() -> f64 { 0.15 }
fn default_safety_slow_speed() -> f64 { 30.0 }
fn default_max_drift_percent() -> f64 { 10.0 }
fn default_speed_multiplier() -> f64 { 1.0 }
fn default_samples_per_read() -> usize { 2 }
fn default_sample_spacing_ms() -> u64 { 10 }
fn default_max_retries() -> u32 { 5 }
fn default_retry_delay_ms() -> u64 { 10 }
fn default_max_consecutive_errors() -> u32 { 3 }
fn default_saturation_voltage() -> f64 { 4.096 }
fn default_true() -> bool { true }
fn default_tolerance() -> f64 { 0.5 }
fn default_max_wait_secs() -> f64 { 15.0 }
fn default_settle_interval_ms() -> u64 { 50 }
fn default_consensus_samples() -> usize { 3 }
fn default_consensus_spacing_ms() -> u64 { 10 }
fn default_outlier_log_threshold() -> f64 { 2.0 }
fn default_settle_confirmations() -> u32 { 2 }
fn default_max_sensor_dropouts() -> u32 { 3 }
fn default_cruise_speed() -> f64 { 100.0 }
fn default_approach_speed() -> f64 { 50.0 }
fn default_precision_speed() -> f64 { 30.0 }
fn default_slow_band() -> f64 { 10.0 }
fn default_precision_band() -> f64 { 3.0 }
fn default_near_zero_threshold() -> f64 { 5.0 }
fn default_near_zero_fraction() -> f64 { 0.1 }
fn default_near_zero_floor() -> f64 { 0.08 }
fn default_max_overshoot() -> f64 { 5.0 }
fn default_reversal_threshold() -> f64 { 2.0 }
fn default_reversal_checks() -> u32 { 5 }
fn default_waypoint_pause_ms() -> u64 { 500 }
fn default_calibration_speed() -> f64 { 60.0 }
fn default_calibration_drive_secs() -> f64 { 3.0 }
fn default_recording_interval_ms() -> u64 { 100 }
fn default_position_tolerance() -> f64 { 1.0 }
fn default_paths_directory() -> PathBuf { PathBuf::from("recorded_paths") }
fn default_open_path() -> Option<String> { Some("extend".to_string()) }
fn default_close_path() -> Option<String> { Some("retract".to_string()) }
fn default_open_position() -> [f64; 2] { [62.3, 88.7] }
fn default_close_position() -> [f64; 2] { [96.9, 23.1] }
fn default_jog_step() -> f64 { 2.0 }
fn default_min_jog_step() -> f64 { 0.5 }
fn default_max_jog_step() -> f64 { 10.0 }
fn default_jog_step_increment() -> f64 { 0.5 }
fn default_monitor_interval_ms() -> u64 { 200 }
// Corners inset from the physical stops, then the centre.
fn default_test_positions() -> Vec<[f64; 2]> {
    vec![[5.0, 5.0], [95.0, 5.0], [95.0, 95.0], [5.0, 95.0], [50.0, 50.0]]
}
fn default_travel_rate() -> f64 { 20.0 }
fn default_seed() -> u64 { 0x7a_a7 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.system.log_level, "info");
        assert_eq!(config.x_axis.calibration.min_voltage, 0.1);
        assert_eq!(config.x_axis.calibration.max_voltage, 3.2);
        assert_eq!(config.y_axis.calibration.max_drift_percent, 10.0);
        assert_eq!(config.x_axis.sensor.samples_per_read, 2);
        assert_eq!(config.motion.consensus_samples, 3);
        assert_eq!(config.recording.recording_interval_ms, 100);
        assert_eq!(config.presets.open_path.as_deref(), Some("extend"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("arm.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[x_axis.calibration]\nmin_voltage = 1.670\nmax_voltage = 2.884\n\n[motion]\nx_tolerance = 0.3"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.x_axis.calibration.min_voltage, 1.670);
        assert_eq!(config.motion.x_tolerance, 0.3);
        // Defaults for missing fields
        assert_eq!(config.motion.y_tolerance, 0.5);
        assert_eq!(config.y_axis.calibration.max_voltage, 3.2);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_inverted_calibration_rejected() {
        let toml = r#"
        [y_axis.calibration]
        min_voltage = 3.0
        max_voltage = 1.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_speed_for_error_bands() {
        let motion = MotionConfig::default();
        assert_eq!(motion.speed_for_error(40.0), 100.0);
        assert_eq!(motion.speed_for_error(-8.0), 50.0);
        assert_eq!(motion.speed_for_error(1.0), 30.0);
    }

    #[test]
    fn test_adjusted_tolerance_near_zero() {
        let motion = MotionConfig::default();
        // Far from zero the nominal tolerance applies.
        assert_eq!(motion.adjusted_tolerance(50.0, 0.5), 0.5);
        // Close to zero it shrinks to a fraction of the target...
        assert!((motion.adjusted_tolerance(3.0, 0.5) - 0.3).abs() < 1e-9);
        // ...but never below the floor.
        assert_eq!(motion.adjusted_tolerance(0.0, 0.5), 0.08);
        // And never looser than nominal.
        assert_eq!(motion.adjusted_tolerance(4.9, 0.2), 0.2);
    }

    #[test]
    fn test_manual_section() {
        let toml = r#"
        [manual]
        jog_step = 5.0
        test_positions = [[10.0, 10.0], [90.0, 90.0]]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.manual.jog_step, 5.0);
        assert_eq!(config.manual.max_jog_step, 10.0);
        assert_eq!(config.manual.test_positions.len(), 2);
        assert_eq!(config.manual.clamp_jog_step(0.1), 0.5);
        assert_eq!(config.manual.clamp_jog_step(25.0), 10.0);
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.manual.test_positions.clear();
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
        let mut bad = config;
        bad.manual.test_positions.push([50.0, 120.0]);
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }
}
