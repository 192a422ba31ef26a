//! MQ-2 combustible gas sensor on an analog input

use super::AnalogSource;
use crate::error::SensorError;

/// Supply voltage of the sensor board
pub const MQ2_VCC: f32 = 3.3;
/// Load resistance in kΩ
pub const MQ2_RL: f32 = 10.0;
/// Samples averaged during calibration
pub const MQ2_CALIBRATION_SAMPLES: usize = 10;
/// Upper bound of a plausible concentration, ppm
pub const MQ2_MAX_PPM: f32 = 10_000.0;

/// Regression curve ppm = a * (Rs/R0)^b and clean-air ratio
#[derive(Debug, Clone, Copy)]
pub struct Mq2Curve {
    pub a: f32,
    pub b: f32,
    pub ratio_clean_air: f32,
}

impl Default for Mq2Curve {
    fn default() -> Self {
        Self {
            a: 658.71,
            b: -2.168,
            ratio_clean_air: 9.83,
        }
    }
}

pub struct Mq2Sensor {
    source: Box<dyn AnalogSource>,
    curve: Mq2Curve,
    r0: Option<f32>,
    rs: f32,
}

impl Mq2Sensor {
    pub fn new(source: Box<dyn AnalogSource>, curve: Mq2Curve) -> Self {
        Self {
            source,
            curve,
            r0: None,
            rs: f32::NAN,
        }
    }

    pub async fn begin(&mut self) -> Result<(), SensorError> {
        self.source.begin().await
    }

    /// Sensor resistance in kΩ for a load-resistor voltage in volts
    pub fn resistance(vrl: f32) -> f32 {
        if vrl <= 0.0 {
            return f32::INFINITY;
        }
        ((MQ2_VCC * MQ2_RL) / vrl - MQ2_RL).max(0.0)
    }

    async fn read_resistance(&mut self) -> Result<f32, SensorError> {
        let millivolts = self.source.read_millivolts().await?;
        Ok(Self::resistance(millivolts / 1000.0))
    }

    /// Estimate R0 assuming the sensor sits in clean air; returns R0 in kΩ
    pub async fn calibrate(&mut self) -> Result<f32, SensorError> {
        let mut sum = 0.0;
        for _ in 0..MQ2_CALIBRATION_SAMPLES {
            sum += self.read_resistance().await? / self.curve.ratio_clean_air;
        }
        let r0 = sum / MQ2_CALIBRATION_SAMPLES as f32;

        if !r0.is_finite() || r0 <= 0.0 {
            return Err(SensorError::Unavailable(format!(
                "MQ-2 calibration produced R0 = {}",
                r0
            )));
        }
        tracing::info!("MQ-2 calibrated, R0 = {:.2} kΩ", r0);
        self.r0 = Some(r0);
        Ok(r0)
    }

    pub async fn update(&mut self) {
        self.rs = match self.read_resistance().await {
            Ok(rs) => rs,
            Err(e) => {
                tracing::debug!("MQ-2 read failed: {}", e);
                f32::NAN
            }
        };
    }

    /// Concentration for the last update, NaN before calibration
    pub fn ppm(&self) -> f32 {
        match self.r0 {
            Some(r0) => self.curve.a * (self.rs / r0).powf(self.curve.b),
            None => f32::NAN,
        }
    }

    /// Last reading rounded to whole ppm, if plausible
    pub fn value(&self) -> Option<f32> {
        let ppm = self.ppm();
        if !ppm.is_finite() || !(0.0..=MQ2_MAX_PPM).contains(&ppm) {
            return None;
        }
        Some(ppm.round())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::sim::ScriptedAnalog;

    #[test]
    fn test_resistance() {
        // half the supply across RL means Rs == RL
        assert!((Mq2Sensor::resistance(1.65) - 10.0).abs() < 1e-4);
        assert_eq!(Mq2Sensor::resistance(0.0), f32::INFINITY);
        assert_eq!(Mq2Sensor::resistance(5.0), 0.0);
    }

    #[tokio::test]
    async fn test_calibrate_averages_samples() {
        let mut sensor = Mq2Sensor::new(
            Box::new(ScriptedAnalog::constant(1650.0)),
            Mq2Curve::default(),
        );
        let r0 = sensor.calibrate().await.unwrap();
        assert!((r0 - 10.0 / 9.83).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_clean_air_reads_low() {
        let mut sensor = Mq2Sensor::new(
            Box::new(ScriptedAnalog::constant(600.0)),
            Mq2Curve::default(),
        );
        sensor.calibrate().await.unwrap();
        sensor.update().await;

        // 658.71 * 9.83^-2.168
        let ppm = sensor.ppm();
        assert!((ppm - 4.64).abs() < 0.05, "ppm = {}", ppm);
        assert_eq!(sensor.value(), Some(5.0));
    }

    #[tokio::test]
    async fn test_value_before_calibration_is_none() {
        let mut sensor = Mq2Sensor::new(
            Box::new(ScriptedAnalog::constant(600.0)),
            Mq2Curve::default(),
        );
        sensor.update().await;
        assert_eq!(sensor.value(), None);
    }

    #[tokio::test]
    async fn test_saturated_output_is_rejected() {
        // Rs clamps to 0 above Vcc, which sends ppm to infinity
        let mut sensor = Mq2Sensor::new(
            Box::new(ScriptedAnalog::new(
                (0..10).map(|_| Ok(600.0)).chain([Ok(3400.0)]).collect(),
            )),
            Mq2Curve::default(),
        );
        sensor.calibrate().await.unwrap();
        sensor.update().await;
        assert_eq!(sensor.value(), None);
    }

    #[tokio::test]
    async fn test_calibration_fails_on_dead_input() {
        let mut sensor = Mq2Sensor::new(
            Box::new(ScriptedAnalog::constant(0.0)),
            Mq2Curve::default(),
        );
        assert!(sensor.calibrate().await.is_err());
        sensor.update().await;
        assert!(sensor.ppm().is_nan());
    }
}
