//! Reading types passed between the sensor tasks and the uplink
//!
//! Every producer fills a [`SensorMessage`] with just the fields it measured.
//! The processing task renders each message into a bounded JSON document
//! ([`ProcessedData`]) for the communication task.

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum rendered document size, terminator included
pub const PROCESSED_DATA_CAPACITY: usize = 256;

/// Turns a field value into JSON, rounding floats to a fixed number of decimals
trait Render {
    fn render(self, decimals: i32) -> Value;
}

impl Render for f32 {
    fn render(self, decimals: i32) -> Value {
        if !self.is_finite() {
            return Value::Null;
        }
        let scale = 10f64.powi(decimals);
        let rounded = (f64::from(self) * scale).round() / scale;
        serde_json::Number::from_f64(rounded)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl Render for u8 {
    fn render(self, _: i32) -> Value {
        Value::from(self)
    }
}

impl Render for u32 {
    fn render(self, _: i32) -> Value {
        Value::from(self)
    }
}

impl Render for bool {
    fn render(self, _: i32) -> Value {
        Value::Bool(self)
    }
}

macro_rules! sensor_fields {
    ($($(#[$doc:meta])* $field:ident: $ty:ty = $decimals:literal => $setter:ident),* $(,)?) => {
        /// One snapshot of everything the hub can measure
        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
        pub struct SensorData {
            $($(#[$doc])* pub $field: $ty,)*
        }

        /// Validity flag per [`SensorData`] field
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct SensorDataFlags {
            $(pub $field: bool,)*
        }

        impl SensorDataFlags {
            /// True when at least one field is valid
            pub fn any(&self) -> bool {
                false $(|| self.$field)*
            }

            /// Number of valid fields
            pub fn count(&self) -> usize {
                0 $(+ usize::from(self.$field))*
            }

            /// True when both sets flag the same field
            pub fn overlaps(&self, other: &SensorDataFlags) -> bool {
                false $(|| (self.$field && other.$field))*
            }
        }

        impl SensorMessage {
            $(
                pub fn $setter(&mut self, value: $ty) -> &mut Self {
                    self.data.$field = value;
                    self.valid.$field = true;
                    self
                }
            )*

            /// Copy the fields that are valid in `other` into `self`
            pub fn merge(&mut self, other: &SensorMessage) {
                $(
                    if other.valid.$field {
                        self.data.$field = other.data.$field;
                        self.valid.$field = true;
                    }
                )*
            }

            fn valid_fields(&self, map: &mut Map<String, Value>) {
                $(
                    if self.valid.$field {
                        map.insert(
                            stringify!($field).to_string(),
                            self.data.$field.render($decimals),
                        );
                    }
                )*
            }
        }
    };
}

sensor_fields! {
    /// Hub battery, percent
    device_battery: u8 = 0 => set_device_battery,
    /// Acceleration in g, calibrated
    accel_x: f32 = 3 => set_accel_x,
    accel_y: f32 = 3 => set_accel_y,
    accel_z: f32 = 3 => set_accel_z,
    /// Magnitude of the acceleration vector
    accel_total: f32 = 3 => set_accel_total,
    fall_detected: bool = 0 => set_fall_detected,
    /// Degrees Celsius
    temperature: f32 = 2 => set_temperature,
    /// Relative humidity, percent
    humidity: f32 = 2 => set_humidity,
    /// Gas concentration in ppm
    gas_level: f32 = 1 => set_gas_level,
    steps: u32 = 0 => set_steps,
    /// Beats per minute from the strap
    heart_rate: u8 = 0 => set_heart_rate,
    latitude: f32 = 6 => set_latitude,
    longitude: f32 = 6 => set_longitude,
    /// Meters per second
    gps_speed: f32 = 2 => set_gps_speed,
    /// Meters above sea level
    gps_altitude: f32 = 1 => set_gps_altitude,
    /// Horizontal accuracy estimate in meters
    gps_accuracy: f32 = 1 => set_gps_accuracy,
    gps_satellites: u32 = 0 => set_gps_satellites,
}

/// A reading plus the flags saying which of its fields were measured
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorMessage {
    pub data: SensorData,
    pub valid: SensorDataFlags,
}

impl SensorMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.valid.any()
    }

    /// Render the valid fields as a JSON document tagged with device and time
    pub fn render(&self, device_id: &str, timestamp_ms: i64) -> Result<ProcessedData, DataError> {
        if self.is_empty() {
            return Err(DataError::Empty);
        }

        let mut map = Map::new();
        map.insert("device_id".to_string(), Value::from(device_id));
        map.insert("timestamp".to_string(), Value::from(timestamp_ms));
        self.valid_fields(&mut map);

        let json = serde_json::to_string(&Value::Object(map))?;
        ProcessedData::new(json)
    }
}

/// JSON document ready for the uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedData {
    json: String,
}

impl ProcessedData {
    pub fn new(json: String) -> Result<Self, DataError> {
        // one byte is reserved for the terminator of the fixed-size buffer
        if json.len() >= PROCESSED_DATA_CAPACITY {
            return Err(DataError::PayloadTooLarge {
                len: json.len(),
                capacity: PROCESSED_DATA_CAPACITY,
            });
        }
        Ok(Self { json })
    }

    pub fn as_str(&self) -> &str {
        &self.json
    }

    pub fn len(&self) -> usize {
        self.json.len()
    }

    pub fn is_empty(&self) -> bool {
        self.json.is_empty()
    }
}

impl std::fmt::Display for ProcessedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setter_marks_field_valid() {
        let mut msg = SensorMessage::new();
        assert!(msg.is_empty());

        msg.set_temperature(21.5).set_humidity(40.0);
        assert!(msg.valid.temperature);
        assert!(msg.valid.humidity);
        assert!(!msg.valid.heart_rate);
        assert_eq!(msg.valid.count(), 2);
        assert_eq!(msg.data.temperature, 21.5);
    }

    #[test]
    fn test_merge_only_copies_valid_fields() {
        let mut snapshot = SensorMessage::new();
        snapshot.set_temperature(20.0).set_heart_rate(70);

        let mut update = SensorMessage::new();
        update.set_heart_rate(82);
        update.data.temperature = -99.0; // not flagged, must be ignored

        snapshot.merge(&update);
        assert_eq!(snapshot.data.heart_rate, 82);
        assert_eq!(snapshot.data.temperature, 20.0);
        assert_eq!(snapshot.valid.count(), 2);
    }

    #[test]
    fn test_flags_overlap() {
        let mut dht = SensorMessage::new();
        dht.set_temperature(20.0).set_humidity(40.0);
        let mut battery = SensorMessage::new();
        battery.set_device_battery(80);
        let mut other_dht = SensorMessage::new();
        other_dht.set_humidity(41.0);

        assert!(!dht.valid.overlaps(&battery.valid));
        assert!(dht.valid.overlaps(&other_dht.valid));
    }

    #[test]
    fn test_render_contains_only_valid_fields() {
        let mut msg = SensorMessage::new();
        msg.set_temperature(23.456).set_humidity(51.0);

        let doc = msg.render("SENTINEL-001", 1_700_000_000_000).unwrap();
        let value: Value = serde_json::from_str(doc.as_str()).unwrap();

        assert_eq!(value["device_id"], "SENTINEL-001");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert_eq!(value["temperature"], 23.46);
        assert_eq!(value["humidity"], 51.0);
        assert!(value.get("heart_rate").is_none());
        assert!(value.get("gas_level").is_none());
    }

    #[test]
    fn test_render_gps_keeps_six_decimals() {
        let mut msg = SensorMessage::new();
        msg.set_latitude(59.329_323).set_longitude(18.068_581);

        let doc = msg.render("dev", 0).unwrap();
        let value: Value = serde_json::from_str(doc.as_str()).unwrap();
        let lat = value["latitude"].as_f64().unwrap();
        assert!((lat - 59.329_323).abs() < 1e-5);
    }

    #[test]
    fn test_render_empty_message_fails() {
        let msg = SensorMessage::new();
        assert!(matches!(msg.render("dev", 0), Err(DataError::Empty)));
    }

    #[test]
    fn test_largest_task_message_fits_capacity() {
        // the GPS task sends the widest message
        let mut msg = SensorMessage::new();
        msg.set_latitude(-33.868_82)
            .set_longitude(151.209_29)
            .set_gps_speed(12.5)
            .set_gps_altitude(1024.5)
            .set_gps_accuracy(2.5)
            .set_gps_satellites(12);

        let doc = msg.render("SENTINEL-001", 1_700_000_000_000).unwrap();
        assert!(doc.len() < PROCESSED_DATA_CAPACITY);
    }

    #[test]
    fn test_processed_data_rejects_oversized_payload() {
        let json = "x".repeat(PROCESSED_DATA_CAPACITY);
        let err = ProcessedData::new(json).unwrap_err();
        assert!(matches!(err, DataError::PayloadTooLarge { len: 256, .. }));

        let ok = ProcessedData::new("y".repeat(PROCESSED_DATA_CAPACITY - 1));
        assert!(ok.is_ok());
    }
}
