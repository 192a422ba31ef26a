//! Heart-rate strap over Bluetooth Low Energy
//!
//! [`client::BluetoothClient`] drives the connection through a
//! [`client::BleTransport`]: btleplug on real adapters, or an emulated strap.

#[cfg(feature = "ble")]
pub mod btle;
pub mod client;
pub mod emulator;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod gatt_server;
pub mod heart_rate;

pub use client::{BleEvent, BleTransport, BluetoothClient, ClientState, ScanCallbacks};
pub use heart_rate::parse_heart_rate;

/// Heart Rate service
pub const HEARTRATE_SERVICE_UUID: u16 = 0x180D;
/// Heart Rate Measurement characteristic
pub const HEARTRATE_CHAR_UUID: u16 = 0x2A37;
/// Battery service
pub const BATTERY_SERVICE_UUID: u16 = 0x180F;
/// Battery Level characteristic
pub const BATTERY_LEVEL_CHAR_UUID: u16 = 0x2A19;
/// Step counter service of the emulated strap
pub const STEP_SERVICE_UUID: uuid::Uuid = uuid::uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");
pub const STEP_COUNT_CHAR_UUID: uuid::Uuid = uuid::uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Full 128-bit form of a 16-bit SIG-assigned UUID
pub fn uuid_from_u16(short: u16) -> uuid::Uuid {
    uuid::Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            uuid_from_u16(HEARTRATE_SERVICE_UUID).to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
    }
}
