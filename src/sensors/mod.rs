//! Sensors module - drivers for the hub's on-board sensors
//!
//! Each driver sits on top of a small source trait so the same logic runs
//! against Linux IIO devices, the host battery or simulated hardware.

pub mod accelerometer;
pub mod battery;
pub mod dht;
pub mod iio;
pub mod mq2;
pub mod sim;

use crate::config::{BatterySourceConfig, Config, SourceConfig};
use crate::error::SensorError;
use async_trait::async_trait;

pub use accelerometer::SensorAccelerometer;
pub use battery::{BatteryMonitor, BatterySample, BatteryStatus};
pub use dht::SensorDht;
pub use mq2::Mq2Sensor;

/// Temperature (°C) and relative humidity (%) source
#[async_trait]
pub trait DhtSource: Send {
    async fn begin(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<(f32, f32), SensorError>;
}

/// Single ADC channel, in millivolts
#[async_trait]
pub trait AnalogSource: Send {
    async fn begin(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn read_millivolts(&mut self) -> Result<f32, SensorError>;
}

/// Three-axis accelerometer, uncalibrated, in g
#[async_trait]
pub trait AccelSource: Send {
    async fn begin(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn read_g(&mut self) -> Result<[f32; 3], SensorError>;
}

/// Anything that can report the hub's own charge level
#[async_trait]
pub trait BatterySource: Send {
    async fn sample(&mut self) -> Result<BatterySample, SensorError>;
}

/// Whether a configured source should be built, and how
fn resolve(source: &SourceConfig, simulate: bool) -> SourceConfig {
    match source {
        SourceConfig::Disabled if simulate => SourceConfig::Simulated,
        other => other.clone(),
    }
}

pub fn build_dht(config: &Config) -> Option<Box<dyn DhtSource>> {
    match resolve(&config.sensors.dht, config.simulate) {
        SourceConfig::Disabled => None,
        SourceConfig::Simulated => Some(Box::new(sim::SimDht::new())),
        SourceConfig::Iio { device } => Some(Box::new(iio::IioDht::new(device))),
    }
}

pub fn build_gas(config: &Config) -> Option<Box<dyn AnalogSource>> {
    match resolve(&config.sensors.gas, config.simulate) {
        SourceConfig::Disabled => None,
        SourceConfig::Simulated => Some(Box::new(sim::SimGas::new())),
        SourceConfig::Iio { device } => Some(Box::new(iio::IioAdc::new(
            device,
            config.sensors.gas_channel,
        ))),
    }
}

pub fn build_accelerometer(config: &Config) -> Option<Box<dyn AccelSource>> {
    let s = &config.sensors;
    match resolve(&s.accelerometer, config.simulate) {
        SourceConfig::Disabled => None,
        SourceConfig::Simulated => Some(Box::new(sim::SimAccel::new([
            s.x_offset, s.y_offset, s.z_offset,
        ]))),
        SourceConfig::Iio { device } => Some(Box::new(iio::IioAccel::new(device))),
    }
}

pub fn build_battery(config: &Config) -> Option<Box<dyn BatterySource>> {
    let s = &config.sensors;
    let monitor = |adc: Box<dyn AnalogSource>| -> Box<dyn BatterySource> {
        Box::new(BatteryMonitor::new(adc, s.battery_vmax, s.battery_vmin, s.battery_divider))
    };

    match &s.battery {
        BatterySourceConfig::Disabled if config.simulate => {
            Some(monitor(Box::new(sim::SimBatteryAdc::new(s.battery_divider))))
        }
        BatterySourceConfig::Disabled => None,
        BatterySourceConfig::Simulated => {
            Some(monitor(Box::new(sim::SimBatteryAdc::new(s.battery_divider))))
        }
        BatterySourceConfig::Iio { device, channel } => {
            Some(monitor(Box::new(iio::IioAdc::new(device.clone(), *channel))))
        }
        #[cfg(feature = "host")]
        BatterySourceConfig::Host => Some(Box::new(battery::HostBattery::new())),
        #[cfg(not(feature = "host"))]
        BatterySourceConfig::Host => {
            tracing::warn!("Host battery support not compiled in (feature \"host\")");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_fills_disabled_sources() {
        let mut config = Config::default();
        assert!(build_dht(&config).is_none());
        assert!(build_gas(&config).is_none());

        config.simulate = true;
        assert!(build_dht(&config).is_some());
        assert!(build_gas(&config).is_some());
        assert!(build_accelerometer(&config).is_some());
    }

    #[test]
    fn test_battery_is_off_unless_configured() {
        let mut config = Config::default();
        assert!(build_battery(&config).is_none());

        config.simulate = true;
        assert!(build_battery(&config).is_some());
    }

    #[test]
    fn test_iio_source_is_kept_when_simulating() {
        let mut config = Config::default();
        config.simulate = true;
        config.sensors.dht = SourceConfig::Iio {
            device: "/nonexistent".into(),
        };
        assert_eq!(
            resolve(&config.sensors.dht, config.simulate),
            config.sensors.dht
        );
    }
}
