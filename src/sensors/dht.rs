//! DHT22 temperature/humidity sensor and its reporting filter

use super::DhtSource;
use crate::error::SensorError;

pub const DHT_MIN_TEMP: f32 = -40.0;
pub const DHT_MAX_TEMP: f32 = 80.0;
pub const DHT_MIN_HUM: f32 = 0.0;
pub const DHT_MAX_HUM: f32 = 100.0;

/// A zero after a reading further than this from zero is treated as a glitch
const ZERO_GLITCH_MIN_PREVIOUS: f32 = 2.0;

/// DHT22 driver keeping the last reading; failed reads leave NaN
pub struct SensorDht {
    source: Box<dyn DhtSource>,
    temperature: f32,
    humidity: f32,
}

impl SensorDht {
    pub fn new(source: Box<dyn DhtSource>) -> Self {
        Self {
            source,
            temperature: f32::NAN,
            humidity: f32::NAN,
        }
    }

    pub async fn begin(&mut self) -> Result<(), SensorError> {
        self.source.begin().await
    }

    pub async fn update(&mut self) {
        match self.source.read().await {
            Ok((temperature, humidity)) => {
                self.temperature = temperature;
                self.humidity = humidity;
            }
            Err(e) => {
                tracing::debug!("DHT read failed: {}", e);
                self.temperature = f32::NAN;
                self.humidity = f32::NAN;
            }
        }
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn humidity(&self) -> f32 {
        self.humidity
    }
}

/// Check that a reading lies within the DHT22's range
pub fn is_valid_reading(temperature: f32, humidity: f32) -> bool {
    !temperature.is_nan()
        && !humidity.is_nan()
        && (DHT_MIN_TEMP..=DHT_MAX_TEMP).contains(&temperature)
        && (DHT_MIN_HUM..=DHT_MAX_HUM).contains(&humidity)
}

/// What to do with a fresh reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DhtDecision {
    /// Report it; `first` is set for the very first valid reading
    Send { first: bool, delta_temp: f32, delta_hum: f32 },
    /// Within thresholds of the last reported value
    Unchanged,
    /// Isolated 0.0 °C reading, dropped
    SkipGlitch,
    /// Out of range or NaN
    Invalid,
}

/// Change-based reporting for temperature/humidity
#[derive(Debug, Clone)]
pub struct DhtFilter {
    temp_threshold: f32,
    hum_threshold: f32,
    last_sent: Option<(f32, f32)>,
    last_was_zero: bool,
}

impl DhtFilter {
    pub fn new(temp_threshold: f32, hum_threshold: f32) -> Self {
        Self {
            temp_threshold,
            hum_threshold,
            last_sent: None,
            last_was_zero: false,
        }
    }

    /// The last reading that was reported
    pub fn last_sent(&self) -> Option<(f32, f32)> {
        self.last_sent
    }

    pub fn offer(&mut self, temperature: f32, humidity: f32) -> DhtDecision {
        if !is_valid_reading(temperature, humidity) {
            return DhtDecision::Invalid;
        }

        let current_is_zero = temperature == 0.0;
        let skip_zero = current_is_zero
            && !self.last_was_zero
            && self
                .last_sent
                .is_some_and(|(t, _)| t.abs() > ZERO_GLITCH_MIN_PREVIOUS);
        self.last_was_zero = current_is_zero;

        let decision = match self.last_sent {
            None => DhtDecision::Send {
                first: true,
                delta_temp: 0.0,
                delta_hum: 0.0,
            },
            Some((old_t, old_h)) => {
                let delta_temp = (temperature - old_t).abs();
                let delta_hum = (humidity - old_h).abs();
                if delta_temp > self.temp_threshold || delta_hum > self.hum_threshold {
                    DhtDecision::Send {
                        first: false,
                        delta_temp,
                        delta_hum,
                    }
                } else {
                    DhtDecision::Unchanged
                }
            }
        };

        if skip_zero {
            return DhtDecision::SkipGlitch;
        }
        if matches!(decision, DhtDecision::Send { .. }) {
            self.last_sent = Some((temperature, humidity));
        }
        decision
    }
}
