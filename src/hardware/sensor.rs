// src/hardware/sensor.rs - Potentiometer position sensor with glitch filtering
use crate::config::{AxisCalibration, SensorConfig};
use crate::hardware::AnalogInput;
use serde::Serialize;

/// Readings this close to 0 V or to the ADC rail are wiring faults, never positions.
const FAULT_BAND: f64 = 0.01;

/// How much trust a filtered reading deserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadQuality {
    /// Two or more samples agreed.
    Good,
    /// Only one sample survived validation.
    Degraded,
    /// No sample survived; the last accepted voltage was reused.
    LastValid,
    /// No sample survived and nothing was ever accepted.
    Midpoint,
}

impl ReadQuality {
    pub fn is_fallback(self) -> bool {
        matches!(self, ReadQuality::LastValid | ReadQuality::Midpoint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageReading {
    pub voltage: f64,
    pub quality: ReadQuality,
}

/// Diagnostics for one sensor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorStats {
    pub last_valid_voltage: Option<f64>,
    pub last_valid_position: Option<f64>,
    pub consecutive_low_confidence: u32,
    pub total_reads: u64,
    pub rejected_samples: u64,
    pub fallback_reads: u64,
    pub rebaselines: u64,
}

enum SampleVerdict {
    Accepted,
    Fault,
    OutOfRange,
    Drift,
}

pub struct PositionSensor {
    label: String,
    input: Box<dyn AnalogInput>,
    calibration: AxisCalibration,
    settings: SensorConfig,
    last_valid_voltage: Option<f64>,
    last_valid_position: Option<f64>,
    drift_streak: u32,
    position_drift_streak: u32,
    stats: SensorStats,
}

impl PositionSensor {
    pub fn new(
        label: impl Into<String>,
        input: Box<dyn AnalogInput>,
        calibration: AxisCalibration,
        settings: SensorConfig,
    ) -> Self {
        Self {
            label: label.into(),
            input,
            calibration,
            settings,
            last_valid_voltage: None,
            last_valid_position: None,
            drift_streak: 0,
            position_drift_streak: 0,
            stats: SensorStats::default(),
        }
    }

    pub fn calibration(&self) -> &AxisCalibration {
        &self.calibration
    }

    /// Last accepted voltage, or the calibrated midpoint before the first good read.
    pub fn last_voltage(&self) -> f64 {
        self.last_valid_voltage
            .unwrap_or_else(|| self.calibration.midpoint())
    }

    pub fn stats(&self) -> SensorStats {
        SensorStats {
            last_valid_voltage: self.last_valid_voltage,
            last_valid_position: self.last_valid_position,
            ..self.stats.clone()
        }
    }

    pub fn consecutive_low_confidence(&self) -> u32 {
        self.stats.consecutive_low_confidence
    }

    /// Linear map of the clamped voltage onto 0-100%.
    pub fn voltage_to_percent(&self, voltage: f64) -> f64 {
        let cal = &self.calibration;
        let clamped = voltage.clamp(cal.min_voltage, cal.max_voltage);
        ((clamped - cal.min_voltage) / cal.span() * 100.0).clamp(0.0, 100.0)
    }

    pub async fn read_voltage(&mut self) -> f64 {
        self.read_voltage_detailed().await.voltage
    }

    pub async fn read_position_percent(&mut self) -> f64 {
        self.read_position_detailed().await.0
    }

    /// Filtered position, or `None` when no raw sample at all could be trusted.
    pub async fn read_position_sample(&mut self) -> Option<f64> {
        let (position, quality) = self.read_position_detailed().await;
        if quality.is_fallback() {
            None
        } else {
            Some(position)
        }
    }

    /// Unfiltered average of `count` raw reads, used by the calibration sweep.
    pub async fn sample_raw(&mut self, count: usize) -> Option<f64> {
        let mut total = 0.0;
        let mut taken = 0usize;
        for i in 0..count {
            if i > 0 {
                tokio::time::sleep(self.settings.sample_spacing()).await;
            }
            match self.input.read_raw_voltage() {
                Ok(v) => {
                    total += v;
                    taken += 1;
                }
                Err(e) => tracing::debug!("{} sensor raw read failed: {}", self.label, e),
            }
        }
        (taken > 0).then(|| total / taken as f64)
    }

    pub async fn read_voltage_detailed(&mut self) -> VoltageReading {
        self.stats.total_reads += 1;

        if !self.settings.enable_filtering {
            return match self.input.read_raw_voltage() {
                Ok(v) => self.accept_voltage(v, ReadQuality::Good),
                Err(e) => {
                    tracing::warn!("{} sensor read failed: {}", self.label, e);
                    self.fallback_voltage()
                }
            };
        }

        let attempts = self.settings.max_retries.max(1);
        let mut drifted = Vec::new();
        for attempt in 0..attempts {
            let mut valid = Vec::with_capacity(self.settings.samples_per_read);
            drifted.clear();

            for i in 0..self.settings.samples_per_read {
                if i > 0 {
                    tokio::time::sleep(self.settings.sample_spacing()).await;
                }
                match self.input.read_raw_voltage() {
                    Ok(v) => match self.classify(v) {
                        SampleVerdict::Accepted => valid.push(v),
                        SampleVerdict::Drift => {
                            self.stats.rejected_samples += 1;
                            drifted.push(v);
                        }
                        SampleVerdict::Fault => {
                            self.stats.rejected_samples += 1;
                            tracing::debug!("{} sensor: fault voltage {:.3}V rejected", self.label, v);
                        }
                        SampleVerdict::OutOfRange => {
                            self.stats.rejected_samples += 1;
                            tracing::debug!("{} sensor: {:.3}V out of range", self.label, v);
                        }
                    },
                    Err(e) => tracing::debug!("{} sensor read failed: {}", self.label, e),
                }
            }

            match valid.len() {
                0 => {}
                1 => return self.accept_voltage(valid[0], ReadQuality::Degraded),
                n => {
                    let average = valid.iter().sum::<f64>() / n as f64;
                    return self.accept_voltage(average, ReadQuality::Good);
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.settings.retry_delay()).await;
            }
        }

        // Every sample of the last attempt was a plausible voltage rejected only for
        // drift. If that keeps happening at a consistent level the arm really moved.
        if drifted.len() == self.settings.samples_per_read && self.samples_agree(&drifted) {
            self.drift_streak += 1;
            if self.drift_streak > self.settings.max_consecutive_errors {
                let level = drifted.iter().sum::<f64>() / drifted.len() as f64;
                tracing::warn!(
                    "{} sensor: re-baselining at {:.3}V after {} consistent drift rejections",
                    self.label,
                    level,
                    self.drift_streak
                );
                self.stats.rebaselines += 1;
                self.last_valid_position = None;
                return self.accept_voltage(level, ReadQuality::Degraded);
            }
        } else {
            self.drift_streak = 0;
        }

        self.fallback_voltage()
    }

    async fn read_position_detailed(&mut self) -> (f64, ReadQuality) {
        let reading = self.read_voltage_detailed().await;
        let position = self.voltage_to_percent(reading.voltage);

        if reading.quality.is_fallback() {
            return (self.last_valid_position.unwrap_or(position), reading.quality);
        }

        if self.settings.enable_filtering {
            if let Some(previous) = self.last_valid_position {
                if (position - previous).abs() > self.calibration.max_drift_percent {
                    self.position_drift_streak += 1;
                    if self.position_drift_streak <= self.settings.max_consecutive_errors {
                        tracing::warn!(
                            "{} sensor: position jump {:.1}% -> {:.1}% ignored",
                            self.label,
                            previous,
                            position
                        );
                        return (previous, ReadQuality::Degraded);
                    }
                    tracing::warn!(
                        "{} sensor: accepting new position {:.1}% after {} jumps",
                        self.label,
                        position,
                        self.position_drift_streak
                    );
                    self.stats.rebaselines += 1;
                }
            }
        }

        self.position_drift_streak = 0;
        self.last_valid_position = Some(position);
        (position, reading.quality)
    }

    fn classify(&self, voltage: f64) -> SampleVerdict {
        if voltage.abs() < FAULT_BAND
            || (voltage - self.settings.saturation_voltage).abs() < FAULT_BAND
        {
            return SampleVerdict::Fault;
        }

        let cal = &self.calibration;
        match self.last_valid_voltage {
            None => {
                if voltage >= cal.min_voltage * 0.2 && voltage <= cal.max_voltage * 2.0 {
                    SampleVerdict::Accepted
                } else {
                    SampleVerdict::OutOfRange
                }
            }
            Some(last) => {
                if voltage < cal.min_voltage * 0.5 || voltage > cal.max_voltage * 1.5 {
                    return SampleVerdict::OutOfRange;
                }
                let drift_percent = (voltage - last).abs() / cal.span() * 100.0;
                if drift_percent > cal.max_drift_percent {
                    SampleVerdict::Drift
                } else {
                    SampleVerdict::Accepted
                }
            }
        }
    }

    fn samples_agree(&self, samples: &[f64]) -> bool {
        let (lo, hi) = samples
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        (hi - lo) / self.calibration.span() * 100.0 <= self.calibration.max_drift_percent
    }

    fn accept_voltage(&mut self, voltage: f64, quality: ReadQuality) -> VoltageReading {
        self.last_valid_voltage = Some(voltage);
        self.drift_streak = 0;
        if quality == ReadQuality::Good {
            self.stats.consecutive_low_confidence = 0;
        } else {
            self.stats.consecutive_low_confidence += 1;
        }
        VoltageReading { voltage, quality }
    }

    fn fallback_voltage(&mut self) -> VoltageReading {
        self.stats.fallback_reads += 1;
        self.stats.consecutive_low_confidence += 1;
        match self.last_valid_voltage {
            Some(voltage) => {
                tracing::warn!(
                    "{} sensor: no valid reading, reusing last valid {:.3}V",
                    self.label,
                    voltage
                );
                VoltageReading {
                    voltage,
                    quality: ReadQuality::LastValid,
                }
            }
            None => {
                let voltage = self.calibration.midpoint();
                tracing::warn!(
                    "{} sensor: no valid reading yet, using calibrated midpoint {:.3}V",
                    self.label,
                    voltage
                );
                VoltageReading {
                    voltage,
                    quality: ReadQuality::Midpoint,
                }
            }
        }
    }
}
