//! Linux Industrial I/O (sysfs) sensor sources
//!
//! Channels are plain text attributes under /sys/bus/iio/devices/iio:deviceN.
//! The dht11 driver covers DHT22 parts, adxl345 the accelerometer, and any
//! ADC driver the MQ-2 and battery divider.

use super::{AccelSource, AnalogSource, DhtSource};
use crate::error::SensorError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Standard gravity, m/s² per g
const STANDARD_GRAVITY: f32 = 9.806_65;

async fn read_attr(path: &Path) -> Result<f32, SensorError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SensorError::Io {
            path: path.display().to_string(),
            source,
        })?;

    contents.trim().parse::<f32>().map_err(|_| SensorError::Parse {
        path: path.display().to_string(),
        value: contents.trim().to_string(),
    })
}

async fn check_device(dir: &Path) -> Result<(), SensorError> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SensorError::Unavailable(format!(
            "{} is not a directory",
            dir.display()
        ))),
        Err(source) => Err(SensorError::Io {
            path: dir.display().to_string(),
            source,
        }),
    }
}

/// DHT22 exposed by the dht11 IIO driver, values in milli-units
pub struct IioDht {
    dir: PathBuf,
}

impl IioDht {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl DhtSource for IioDht {
    async fn begin(&mut self) -> Result<(), SensorError> {
        check_device(&self.dir).await
    }

    async fn read(&mut self) -> Result<(f32, f32), SensorError> {
        let temp = read_attr(&self.dir.join("in_temp_input")).await?;
        let hum = read_attr(&self.dir.join("in_humidityrelative_input")).await?;
        Ok((temp / 1000.0, hum / 1000.0))
    }
}

/// One voltage channel of an IIO ADC
pub struct IioAdc {
    dir: PathBuf,
    channel: u32,
    scale: Option<f32>,
}

impl IioAdc {
    pub fn new(dir: PathBuf, channel: u32) -> Self {
        Self {
            dir,
            channel,
            scale: None,
        }
    }

    fn attr(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("in_voltage{}_{}", self.channel, suffix))
    }

    /// Millivolts per LSB, per channel or shared by the device
    async fn scale(&mut self) -> Result<f32, SensorError> {
        if let Some(scale) = self.scale {
            return Ok(scale);
        }
        let scale = match read_attr(&self.attr("scale")).await {
            Ok(scale) => scale,
            Err(_) => read_attr(&self.dir.join("in_voltage_scale")).await?,
        };
        self.scale = Some(scale);
        Ok(scale)
    }
}

#[async_trait]
impl AnalogSource for IioAdc {
    async fn begin(&mut self) -> Result<(), SensorError> {
        check_device(&self.dir).await?;
        self.scale().await.map(|_| ())
    }

    async fn read_millivolts(&mut self) -> Result<f32, SensorError> {
        let scale = self.scale().await?;
        let raw = read_attr(&self.attr("raw")).await?;
        Ok(raw * scale)
    }
}

/// ADXL345 through the adxl345 IIO driver
pub struct IioAccel {
    dir: PathBuf,
    scale: Option<f32>,
}

impl IioAccel {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, scale: None }
    }

    /// m/s² per LSB
    async fn scale(&mut self) -> Result<f32, SensorError> {
        if let Some(scale) = self.scale {
            return Ok(scale);
        }
        let scale = read_attr(&self.dir.join("in_accel_scale")).await?;
        self.scale = Some(scale);
        Ok(scale)
    }
}

#[async_trait]
impl AccelSource for IioAccel {
    async fn begin(&mut self) -> Result<(), SensorError> {
        check_device(&self.dir).await?;
        self.scale().await.map(|_| ())
    }

    async fn read_g(&mut self) -> Result<[f32; 3], SensorError> {
        let scale = self.scale().await?;
        let mut axes = [0.0; 3];
        for (value, axis) in axes.iter_mut().zip(["x", "y", "z"]) {
            let raw = read_attr(&self.dir.join(format!("in_accel_{}_raw", axis))).await?;
            *value = raw * scale / STANDARD_GRAVITY;
        }
        Ok(axes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn device(attrs: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, value) in attrs {
            fs::write(dir.path().join(name), format!("{}\n", value)).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_dht_milli_units() {
        let dir = device(&[
            ("in_temp_input", "23400"),
            ("in_humidityrelative_input", "51200"),
        ]);
        let mut dht = IioDht::new(dir.path().to_path_buf());
        dht.begin().await.unwrap();

        let (t, h) = dht.read().await.unwrap();
        assert!((t - 23.4).abs() < 1e-4);
        assert!((h - 51.2).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_adc_channel_scale() {
        let dir = device(&[("in_voltage2_raw", "2048"), ("in_voltage2_scale", "0.805664")]);
        let mut adc = IioAdc::new(dir.path().to_path_buf(), 2);
        adc.begin().await.unwrap();

        let mv = adc.read_millivolts().await.unwrap();
        assert!((mv - 1650.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_adc_shared_scale() {
        let dir = device(&[("in_voltage0_raw", "1000"), ("in_voltage_scale", "1.5")]);
        let mut adc = IioAdc::new(dir.path().to_path_buf(), 0);
        assert_eq!(adc.read_millivolts().await.unwrap(), 1500.0);
    }

    #[tokio::test]
    async fn test_accel_converts_to_g() {
        let dir = device(&[
            ("in_accel_scale", "0.038300"),
            ("in_accel_x_raw", "0"),
            ("in_accel_y_raw", "-2"),
            ("in_accel_z_raw", "256"),
        ]);
        let mut accel = IioAccel::new(dir.path().to_path_buf());
        let [x, y, z] = accel.read_g().await.unwrap();
        assert_eq!(x, 0.0);
        assert!(y < 0.0);
        assert!((z - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_missing_attribute_is_io_error() {
        let dir = device(&[]);
        let mut dht = IioDht::new(dir.path().to_path_buf());
        assert!(matches!(dht.read().await, Err(SensorError::Io { .. })));
    }

    #[tokio::test]
    async fn test_garbage_attribute_is_parse_error() {
        let dir = device(&[("in_temp_input", "n/a"), ("in_humidityrelative_input", "1")]);
        let mut dht = IioDht::new(dir.path().to_path_buf());
        assert!(matches!(dht.read().await, Err(SensorError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_begin_rejects_missing_device() {
        let mut adc = IioAdc::new(PathBuf::from("/nonexistent/iio:device9"), 0);
        assert!(adc.begin().await.is_err());
    }
}
