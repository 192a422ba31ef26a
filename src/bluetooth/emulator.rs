//! Emulated heart-rate strap
//!
//! [`StrapEmulator`] holds the values a strap would publish. It backs the
//! BlueZ GATT server (`emulate-strap`) and [`EmulatedTransport`], which
//! stands in for a radio when the hub runs simulated.

use super::client::{BleEvent, BleTransport};
use crate::error::BleError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Period between value updates
pub const EMULATOR_UPDATE_INTERVAL: Duration = Duration::from_secs(3);

/// Battery, heart rate and step values of a strap
pub struct StrapEmulator {
    rng: StdRng,
    battery_level: u8,
    heart_rate: u8,
    steps: u32,
}

impl StrapEmulator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            battery_level: 100,
            heart_rate: 70,
            steps: 0,
        }
    }

    /// Advance one update period
    pub fn step(&mut self) {
        self.battery_level = self.battery_level.saturating_sub(1);
        self.heart_rate = self.rng.gen_range(60..100);
        self.steps += self.rng.gen_range(1..5);
    }

    pub fn battery_level(&self) -> u8 {
        self.battery_level
    }

    pub fn heart_rate(&self) -> u8 {
        self.heart_rate
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Heart Rate Measurement value, u8 format without extra fields
    pub fn heart_rate_frame(&self) -> Vec<u8> {
        vec![0x00, self.heart_rate]
    }

    /// Step count as ASCII decimal
    pub fn steps_frame(&self) -> Vec<u8> {
        self.steps.to_string().into_bytes()
    }
}

impl Default for StrapEmulator {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process strap reached without a radio
pub struct EmulatedTransport {
    address: String,
    events: mpsc::Sender<BleEvent>,
    interval: Duration,
    scanning: bool,
    connected: bool,
    notifier: Option<JoinHandle<()>>,
}

impl EmulatedTransport {
    /// Returns the transport and the receiver for its events
    pub fn new(address: &str) -> (Self, mpsc::Receiver<BleEvent>) {
        Self::with_interval(address, EMULATOR_UPDATE_INTERVAL)
    }

    pub fn with_interval(address: &str, interval: Duration) -> (Self, mpsc::Receiver<BleEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let transport = Self {
            address: address.to_string(),
            events: tx,
            interval,
            scanning: false,
            connected: false,
            notifier: None,
        };
        (transport, rx)
    }

    fn stop_notifier(&mut self) {
        if let Some(handle) = self.notifier.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BleTransport for EmulatedTransport {
    async fn start_scan(&mut self) -> Result<(), BleError> {
        self.scanning = true;
        // the strap is always in range
        let _ = self
            .events
            .try_send(BleEvent::Discovered {
                address: self.address.clone(),
                name: None,
            });
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), BleError> {
        self.scanning = false;
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.scanning
    }

    async fn connect(&mut self, address: &str) -> Result<(), BleError> {
        if !address.eq_ignore_ascii_case(&self.address) {
            return Err(BleError::UnknownPeripheral(address.to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn discover_services(&mut self) -> Result<bool, BleError> {
        if !self.connected {
            return Err(BleError::NotConnected);
        }
        Ok(true)
    }

    async fn subscribe_heart_rate(&mut self) -> Result<bool, BleError> {
        if !self.connected {
            return Err(BleError::NotConnected);
        }
        self.stop_notifier();

        let events = self.events.clone();
        let interval = self.interval;
        self.notifier = Some(tokio::spawn(async move {
            let mut strap = StrapEmulator::new();
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                strap.step();
                if events
                    .send(BleEvent::Notification(strap.heart_rate_frame()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
        Ok(true)
    }

    async fn disconnect(&mut self) -> Result<(), BleError> {
        self.stop_notifier();
        self.connected = false;
        Ok(())
    }
}

impl Drop for EmulatedTransport {
    fn drop(&mut self) {
        self.stop_notifier();
    }
}
