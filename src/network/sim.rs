//! Simulated WiFi link and modem

use super::modem::GnssFix;
use super::{CellularModem, GnssReceiver, WifiLink};
use crate::error::ModemError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// WiFi whose access point can be switched on and off
pub struct SimWifi {
    in_range: Arc<AtomicBool>,
    connected: bool,
}

impl SimWifi {
    pub fn new(in_range: bool) -> Self {
        Self {
            in_range: Arc::new(AtomicBool::new(in_range)),
            connected: false,
        }
    }

    /// Handle to move the access point in or out of range
    pub fn in_range(&self) -> Arc<AtomicBool> {
        self.in_range.clone()
    }
}

#[async_trait]
impl WifiLink for SimWifi {
    async fn scan(&mut self, _ssid: &str) -> bool {
        self.in_range.load(Ordering::Relaxed)
    }

    async fn connect(&mut self, _ssid: &str, _password: &str) -> bool {
        self.connected = self.in_range.load(Ordering::Relaxed);
        self.connected
    }

    async fn is_connected(&mut self) -> bool {
        if !self.in_range.load(Ordering::Relaxed) {
            self.connected = false;
        }
        self.connected
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Modem with an always-available network and a wandering GNSS fix
pub struct SimModem {
    rng: StdRng,
    enabled: bool,
    data: bool,
    gnss: bool,
    fail_connect: bool,
    connects: u32,
    position: (f32, f32),
}

impl SimModem {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            enabled: false,
            data: false,
            gnss: false,
            fail_connect: false,
            connects: 0,
            position: (59.329_323, 18.068_581),
        }
    }

    /// Modem whose registration is always denied
    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }
}

impl Default for SimModem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CellularModem for SimModem {
    async fn enable(&mut self) -> Result<(), ModemError> {
        self.enabled = true;
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), ModemError> {
        self.data = false;
        self.gnss = false;
        self.enabled = false;
        Ok(())
    }

    async fn connect(&mut self, _apn: &str) -> Result<(), ModemError> {
        self.connects += 1;
        self.enable().await?;
        if self.fail_connect {
            self.disable().await?;
            return Err(ModemError::RegistrationDenied);
        }
        self.data = true;
        Ok(())
    }

    async fn is_data_connected(&mut self) -> bool {
        self.enabled && self.data
    }

    async fn disconnect(&mut self) -> Result<(), ModemError> {
        self.data = false;
        Ok(())
    }
}

#[async_trait]
impl GnssReceiver for SimModem {
    async fn enable_gnss(&mut self) -> Result<(), ModemError> {
        self.gnss = true;
        Ok(())
    }

    async fn disable_gnss(&mut self) -> Result<(), ModemError> {
        self.gnss = false;
        Ok(())
    }

    async fn is_gnss_enabled(&mut self) -> bool {
        self.gnss
    }

    async fn gnss_info(&mut self) -> Result<Option<GnssFix>, ModemError> {
        if !self.gnss {
            return Ok(None);
        }
        self.position.0 += self.rng.gen_range(-0.0001..0.0001);
        self.position.1 += self.rng.gen_range(-0.0001..0.0001);
        Ok(Some(GnssFix {
            mode: 3,
            latitude: self.position.0,
            longitude: self.position.1,
            altitude: 28.0 + self.rng.gen_range(-2.0..2.0),
            speed: self.rng.gen_range(0.0..1.5),
            accuracy: self.rng.gen_range(0.7..1.5),
            satellites: self.rng.gen_range(6..12),
        }))
    }
}
