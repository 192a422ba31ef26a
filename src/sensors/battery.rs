//! Hub battery monitoring

use super::{AnalogSource, BatterySource};
use crate::error::SensorError;
use async_trait::async_trait;

pub const BATTERY_CRITICAL_THRESHOLD: f32 = 3.0;
pub const BATTERY_LOW_THRESHOLD: f32 = 3.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Critical,
    Low,
    Normal,
}

impl BatteryStatus {
    pub fn for_voltage(volts: f32) -> Self {
        if volts < BATTERY_CRITICAL_THRESHOLD {
            BatteryStatus::Critical
        } else if volts < BATTERY_LOW_THRESHOLD {
            BatteryStatus::Low
        } else {
            BatteryStatus::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryStatus::Critical => "critical",
            BatteryStatus::Low => "low",
            BatteryStatus::Normal => "normal",
        }
    }
}

/// One battery reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySample {
    pub percent: u8,
    /// Cell voltage in volts, when the source measures it
    pub voltage: Option<f32>,
    pub status: BatteryStatus,
    pub charging: Option<bool>,
}

/// Battery cell read through a voltage divider on an ADC channel
pub struct BatteryMonitor {
    adc: Box<dyn AnalogSource>,
    vmax: f32,
    vmin: f32,
    divider: f32,
}

impl BatteryMonitor {
    pub fn new(adc: Box<dyn AnalogSource>, vmax: f32, vmin: f32, divider: f32) -> Self {
        Self {
            adc,
            vmax,
            vmin,
            divider,
        }
    }

    /// Cell voltage in millivolts
    pub async fn read_voltage(&mut self) -> Result<f32, SensorError> {
        Ok(self.adc.read_millivolts().await? * self.divider)
    }

    /// Linear charge estimate between `vmin` and `vmax`
    pub fn percentage(&self, millivolts: f32) -> u8 {
        let volts = millivolts / 1000.0;
        let ratio = (volts - self.vmin) / (self.vmax - self.vmin);
        (ratio * 100.0).clamp(0.0, 100.0).round() as u8
    }

}

#[async_trait]
impl BatterySource for BatteryMonitor {
    async fn sample(&mut self) -> Result<BatterySample, SensorError> {
        let mv = self.read_voltage().await?;
        Ok(BatterySample {
            percent: self.percentage(mv),
            voltage: Some(mv / 1000.0),
            status: BatteryStatus::for_voltage(mv / 1000.0),
            charging: None,
        })
    }
}

/// Battery of the machine the hub runs on
#[cfg(feature = "host")]
#[derive(Debug, Default)]
pub struct HostBattery;

#[cfg(feature = "host")]
impl HostBattery {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "host")]
fn is_charging(state: battery::State) -> Option<bool> {
    match state {
        battery::State::Charging | battery::State::Full => Some(true),
        battery::State::Discharging | battery::State::Empty => Some(false),
        _ => None,
    }
}

#[cfg(feature = "host")]
fn read_host_battery() -> Result<BatterySample, SensorError> {
    let unavailable = |e: battery::Error| SensorError::Unavailable(e.to_string());

    let manager = battery::Manager::new().map_err(unavailable)?;
    let battery = manager
        .batteries()
        .map_err(unavailable)?
        .filter_map(|b| b.ok())
        .next()
        .ok_or_else(|| SensorError::Unavailable("no batteries detected".to_string()))?;

    let percent = battery
        .state_of_charge()
        .get::<battery::units::ratio::percent>();
    let voltage = battery
        .voltage()
        .get::<battery::units::electric_potential::volt>();

    // the host reports its own charge; voltage is informational only
    let status = if percent < 5.0 {
        BatteryStatus::Critical
    } else if percent < 15.0 {
        BatteryStatus::Low
    } else {
        BatteryStatus::Normal
    };

    Ok(BatterySample {
        percent: percent.clamp(0.0, 100.0).round() as u8,
        voltage: Some(voltage),
        status,
        charging: is_charging(battery.state()),
    })
}

#[cfg(feature = "host")]
#[async_trait]
impl BatterySource for HostBattery {
    async fn sample(&mut self) -> Result<BatterySample, SensorError> {
        tokio::task::spawn_blocking(read_host_battery)
            .await
            .map_err(|e| SensorError::Unavailable(format!("battery task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::sim::ScriptedAnalog;

    fn monitor(adc_mv: f32) -> BatteryMonitor {
        BatteryMonitor::new(Box::new(ScriptedAnalog::constant(adc_mv)), 4.2, 3.3, 2.0)
    }

    #[test]
    fn test_percentage_is_linear_and_clamped() {
        let m = monitor(0.0);
        assert_eq!(m.percentage(4200.0), 100);
        assert_eq!(m.percentage(3300.0), 0);
        assert_eq!(m.percentage(3750.0), 50);
        assert_eq!(m.percentage(4500.0), 100);
        assert_eq!(m.percentage(2900.0), 0);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(BatteryStatus::for_voltage(2.9), BatteryStatus::Critical);
        assert_eq!(BatteryStatus::for_voltage(3.0), BatteryStatus::Low);
        assert_eq!(BatteryStatus::for_voltage(3.29), BatteryStatus::Low);
        assert_eq!(BatteryStatus::for_voltage(3.3), BatteryStatus::Normal);
    }

    #[tokio::test]
    async fn test_divider_is_applied() {
        let mut m = monitor(1900.0);
        assert_eq!(m.read_voltage().await.unwrap(), 3800.0);

        let sample = m.sample().await.unwrap();
        assert_eq!(sample.percent, 56);
        assert_eq!(sample.status, BatteryStatus::Normal);
        assert_eq!(sample.voltage, Some(3.8));
    }

    #[tokio::test]
    async fn test_critical_cell() {
        let mut m = monitor(1450.0);
        let sample = m.sample().await.unwrap();
        assert_eq!(sample.status, BatteryStatus::Critical);
        assert_eq!(sample.percent, 0);
    }
}
