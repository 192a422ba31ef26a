//! Simulated sensor sources for running the hub without hardware

use super::{AccelSource, AnalogSource, DhtSource};
use crate::error::SensorError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Temperature and humidity drifting slowly around room conditions
pub struct SimDht {
    rng: StdRng,
    temperature: f32,
    humidity: f32,
}

impl SimDht {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            temperature: 22.0,
            humidity: 45.0,
        }
    }
}

#[async_trait]
impl DhtSource for SimDht {
    async fn read(&mut self) -> Result<(f32, f32), SensorError> {
        self.temperature = (self.temperature + self.rng.gen_range(-0.3..0.3)).clamp(15.0, 30.0);
        self.humidity = (self.humidity + self.rng.gen_range(-1.5..1.5)).clamp(20.0, 80.0);
        Ok((self.temperature, self.humidity))
    }
}

/// MQ-2 output near clean air with occasional smoke puffs
pub struct SimGas {
    rng: StdRng,
    puff: u32,
}

impl SimGas {
    /// Load-resistor voltage in clean air, mV
    const CLEAN_AIR_MV: f32 = 600.0;

    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            puff: 0,
        }
    }
}

#[async_trait]
impl AnalogSource for SimGas {
    async fn read_millivolts(&mut self) -> Result<f32, SensorError> {
        if self.puff == 0 && self.rng.gen_bool(0.02) {
            self.puff = self.rng.gen_range(3..8);
        }
        let base = if self.puff > 0 {
            self.puff -= 1;
            Self::CLEAN_AIR_MV * self.rng.gen_range(1.5..2.5)
        } else {
            Self::CLEAN_AIR_MV
        };
        Ok(base + self.rng.gen_range(-15.0..15.0))
    }
}

/// Wearer walking upright; raw readings include the calibration offsets
pub struct SimAccel {
    rng: StdRng,
    offsets: [f32; 3],
    phase: u32,
}

impl SimAccel {
    pub fn new(offsets: [f32; 3]) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            offsets,
            phase: 0,
        }
    }
}

#[async_trait]
impl AccelSource for SimAccel {
    async fn read_g(&mut self) -> Result<[f32; 3], SensorError> {
        // a stride every 12 samples, i.e. about 600 ms at the default rate
        self.phase = (self.phase + 1) % 12;
        let bounce = if self.phase == 0 { 0.35 } else { 0.0 };

        let mut noise = || self.rng.gen_range(-0.02..0.02);
        let calibrated = [noise(), noise(), 1.0 + bounce + noise()];
        Ok([
            calibrated[0] + self.offsets[0],
            calibrated[1] + self.offsets[1],
            calibrated[2] + self.offsets[2],
        ])
    }
}

/// Battery divider output of a slowly discharging cell
pub struct SimBatteryAdc {
    divider: f32,
    cell_mv: f32,
}

impl SimBatteryAdc {
    pub fn new(divider: f32) -> Self {
        Self {
            divider,
            cell_mv: 4150.0,
        }
    }
}

#[async_trait]
impl AnalogSource for SimBatteryAdc {
    async fn read_millivolts(&mut self) -> Result<f32, SensorError> {
        self.cell_mv = (self.cell_mv - 0.5).max(3400.0);
        Ok(self.cell_mv / self.divider)
    }
}

#[cfg(test)]
pub(crate) use scripted::*;
