//! ADXL345 accelerometer with fall detection and step counting

use super::AccelSource;
use crate::error::SensorError;
use std::time::Duration;
use tokio::time::Instant;

/// Thresholds and calibration for motion processing
#[derive(Debug, Clone, Copy)]
pub struct MotionParams {
    /// Impact magnitude in g
    pub acc_threshold: f32,
    /// Tilt in degrees after the impact
    pub angle_threshold: f32,
    pub max_time_between: Duration,
    /// Magnitude in g counted as a step peak
    pub step_threshold: f32,
    pub step_debounce: Duration,
    /// Subtracted from the raw x, y, z readings
    pub offsets: [f32; 3],
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            acc_threshold: 2.0,
            angle_threshold: 60.0,
            max_time_between: Duration::from_millis(2000),
            step_threshold: 1.2,
            step_debounce: Duration::from_millis(300),
            offsets: [0.0737, -0.6132, -0.9986],
        }
    }
}

/// Tilt from vertical in degrees, 0 when the vector is null
pub fn tilt_degrees(z: f32, total: f32) -> f32 {
    if total <= f32::EPSILON {
        return 0.0;
    }
    (z / total).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Impact followed by a large tilt within a short window
#[derive(Debug, Clone)]
pub struct FallDetector {
    acc_threshold: f32,
    angle_threshold: f32,
    window: Duration,
    impact_at: Option<Instant>,
    detected: bool,
}

impl FallDetector {
    pub fn new(params: &MotionParams) -> Self {
        Self {
            acc_threshold: params.acc_threshold,
            angle_threshold: params.angle_threshold,
            window: params.max_time_between,
            impact_at: None,
            detected: false,
        }
    }

    /// Feed one sample; returns true when this sample completes a fall
    pub fn update(&mut self, total: f32, tilt: f32, now: Instant) -> bool {
        if let Some(impact) = self.impact_at {
            if now.duration_since(impact) > self.window {
                self.impact_at = None;
            } else if now > impact && tilt > self.angle_threshold {
                self.impact_at = None;
                if !self.detected {
                    self.detected = true;
                    return true;
                }
                return false;
            }
        }

        if total > self.acc_threshold {
            self.impact_at = Some(now);
        }
        false
    }

    /// Latched until [`FallDetector::clear`]
    pub fn detected(&self) -> bool {
        self.detected
    }

    pub fn clear(&mut self) {
        self.detected = false;
        self.impact_at = None;
    }
}

/// Counts rising edges of the magnitude across a threshold
#[derive(Debug, Clone)]
pub struct StepCounter {
    threshold: f32,
    debounce: Duration,
    above: bool,
    last_step: Option<Instant>,
    steps: u32,
}

impl StepCounter {
    pub fn new(params: &MotionParams) -> Self {
        Self {
            threshold: params.step_threshold,
            debounce: params.step_debounce,
            above: false,
            last_step: None,
            steps: 0,
        }
    }

    pub fn update(&mut self, total: f32, now: Instant) {
        if total <= self.threshold {
            self.above = false;
            return;
        }
        if self.above {
            return;
        }
        self.above = true;

        let debounced = self
            .last_step
            .map_or(true, |last| now.duration_since(last) >= self.debounce);
        if debounced {
            self.steps = self.steps.saturating_add(1);
            self.last_step = Some(now);
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }
}

pub struct SensorAccelerometer {
    source: Box<dyn AccelSource>,
    offsets: [f32; 3],
    x: f32,
    y: f32,
    z: f32,
    total: f32,
    fall: FallDetector,
    steps: StepCounter,
}

impl SensorAccelerometer {
    pub fn new(source: Box<dyn AccelSource>, params: MotionParams) -> Self {
        Self {
            source,
            offsets: params.offsets,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            total: 0.0,
            fall: FallDetector::new(&params),
            steps: StepCounter::new(&params),
        }
    }

    pub async fn begin(&mut self) -> Result<(), SensorError> {
        self.source.begin().await
    }

    /// Read one sample and run it through the detectors
    pub async fn update(&mut self) -> Result<(), SensorError> {
        let raw = self.source.read_g().await?;
        self.ingest(raw, Instant::now());
        Ok(())
    }

    pub(crate) fn ingest(&mut self, raw: [f32; 3], now: Instant) {
        self.x = raw[0] - self.offsets[0];
        self.y = raw[1] - self.offsets[1];
        self.z = raw[2] - self.offsets[2];
        self.total = (self.x * self.x + self.y * self.y + self.z * self.z).sqrt();

        let tilt = tilt_degrees(self.z, self.total);
        if self.fall.update(self.total, tilt, now) {
            tracing::warn!(
                "Fall detected (magnitude {:.2} g, tilt {:.0}°)",
                self.total,
                tilt
            );
        }
        self.steps.update(self.total, now);
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn z(&self) -> f32 {
        self.z
    }

    pub fn total(&self) -> f32 {
        self.total
    }

    pub fn fall_detected(&self) -> bool {
        self.fall.detected()
    }

    pub fn clear_fall(&mut self) {
        self.fall.clear();
    }

    pub fn steps(&self) -> u32 {
        self.steps.steps()
    }
}
