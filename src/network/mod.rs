//! Uplink management - WiFi first, LTE modem as fallback, GNSS on the modem

pub mod gps;
pub mod manager;
pub mod modem;
pub mod sim;
#[cfg(feature = "host")]
pub mod wifi;

use crate::error::ModemError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

pub use gps::{Gps, GpsLocation};
pub use manager::Network;
pub use modem::{GnssFix, Modem, RegistrationStatus};

/// A WiFi station interface
#[async_trait]
pub trait WifiLink: Send {
    /// Whether `ssid` is in range
    async fn scan(&mut self, ssid: &str) -> bool;
    /// Join `ssid`, giving up after the connect timeout
    async fn connect(&mut self, ssid: &str, password: &str) -> bool;
    async fn is_connected(&mut self) -> bool;
    async fn disconnect(&mut self);
}

/// LTE data side of the modem
#[async_trait]
pub trait CellularModem: Send {
    async fn enable(&mut self) -> Result<(), ModemError>;
    /// Detach and power the modem down
    async fn disable(&mut self) -> Result<(), ModemError>;
    async fn connect(&mut self, apn: &str) -> Result<(), ModemError>;
    async fn is_data_connected(&mut self) -> bool;
    async fn disconnect(&mut self) -> Result<(), ModemError>;
}

/// GNSS side of the modem
#[async_trait]
pub trait GnssReceiver: Send {
    async fn enable_gnss(&mut self) -> Result<(), ModemError>;
    async fn disable_gnss(&mut self) -> Result<(), ModemError>;
    async fn is_gnss_enabled(&mut self) -> bool;
    async fn gnss_info(&mut self) -> Result<Option<GnssFix>, ModemError>;
}

/// A modem providing both LTE data and GNSS
pub trait ModemDevice: CellularModem + GnssReceiver {}

impl<T: CellularModem + GnssReceiver> ModemDevice for T {}

/// The modem shared between the network manager and the GPS
pub type SharedModem = Arc<Mutex<dyn ModemDevice>>;

pub fn share<M: ModemDevice + 'static>(modem: M) -> SharedModem {
    Arc::new(Mutex::new(modem))
}

/// Lock the modem, giving up after `limit`
pub async fn lock_modem(
    modem: &SharedModem,
    limit: Duration,
) -> Result<MutexGuard<'_, dyn ModemDevice>, ModemError> {
    tokio::time::timeout(limit, modem.lock())
        .await
        .map_err(|_| ModemError::Busy)
}
