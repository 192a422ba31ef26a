//! Hub tasks and the queues between them
//!
//! Sensor tasks push [`SensorMessage`]s into the data queue, the processing
//! task renders them into documents for the http queue, and the
//! communication task posts those to the backend. The network-status task
//! publishes the uplink state on a watch channel; a second watch channel
//! carries the shutdown request to every task.

pub mod accelerometer;
pub mod battery;
pub mod bluetooth;
pub mod communication;
pub mod dht;
pub mod gas;
pub mod gps;
pub mod network_status;
pub mod processing;

use crate::backend::BackendClient;
use crate::bluetooth::emulator::EmulatedTransport;
use crate::bluetooth::BluetoothClient;
use crate::config::{Config, IntervalsConfig};
use crate::data::{ProcessedData, SensorMessage};
use crate::network::manager::Credentials;
use crate::network::sim::{SimModem, SimWifi};
use crate::network::{share, Gps, Network, SharedModem, WifiLink};
use crate::sensors::accelerometer::MotionParams;
use crate::sensors::mq2::Mq2Curve;
use crate::sensors::{
    self, AccelSource, AnalogSource, BatterySource, DhtSource, Mq2Sensor, SensorAccelerometer,
    SensorDht,
};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Capacity of the data and http queues
pub const QUEUE_CAPACITY: usize = 10;
/// How long a producer waits for room in the data queue
pub const QUEUE_SEND_TIMEOUT: Duration = Duration::from_secs(1);
/// How long processing waits for room in the http queue
pub const FORWARD_TIMEOUT: Duration = Duration::from_millis(100);

/// Push a message into a queue, giving up after `limit`
pub async fn send_within<T>(tx: &mpsc::Sender<T>, item: T, limit: Duration, task: &str) -> bool {
    match tx.send_timeout(item, limit).await {
        Ok(()) => true,
        Err(SendTimeoutError::Timeout(_)) => {
            tracing::warn!(task, "Queue full, dropping message");
            false
        }
        Err(SendTimeoutError::Closed(_)) => {
            tracing::warn!(task, "Queue closed, dropping message");
            false
        }
    }
}

/// Push a reading into the data queue
pub async fn send_reading(tx: &mpsc::Sender<SensorMessage>, msg: SensorMessage, task: &str) -> bool {
    send_within(tx, msg, QUEUE_SEND_TIMEOUT, task).await
}

/// Push a reading only while the uplink is up
pub async fn send_if_online(
    tx: &mpsc::Sender<SensorMessage>,
    network: &watch::Receiver<bool>,
    msg: SensorMessage,
    task: &str,
) -> bool {
    if !*network.borrow() {
        tracing::debug!(task, "Network down, reading not queued");
        return false;
    }
    send_reading(tx, msg, task).await
}

/// Sleep for `period`; false once shutdown was requested
pub async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = shutdown.wait_for(|stop| *stop) => false,
    }
}

/// Wait until the uplink is up; false once shutdown was requested
pub async fn wait_online(
    network: &mut watch::Receiver<bool>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        up = network.wait_for(|up| *up) => up.is_ok(),
        _ = shutdown.wait_for(|stop| *stop) => false,
    }
}

/// Hardware behind the tasks, each optional except the WiFi link
pub struct Devices {
    pub dht: Option<Box<dyn DhtSource>>,
    pub gas: Option<Box<dyn AnalogSource>>,
    pub accelerometer: Option<Box<dyn AccelSource>>,
    pub battery: Option<Box<dyn BatterySource>>,
    pub wifi: Box<dyn WifiLink>,
    pub modem: Option<SharedModem>,
}

impl Devices {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dht: sensors::build_dht(config),
            gas: sensors::build_gas(config),
            accelerometer: sensors::build_accelerometer(config),
            battery: sensors::build_battery(config),
            wifi: build_wifi(config),
            modem: build_modem(config),
        }
    }
}

fn build_wifi(config: &Config) -> Box<dyn WifiLink> {
    if config.simulate {
        return Box::new(SimWifi::new(true));
    }
    #[cfg(feature = "host")]
    {
        Box::new(crate::network::wifi::HostWifi::new(
            config.network.wifi_interface.clone(),
            config.network.probe_host.clone(),
        ))
    }
    #[cfg(not(feature = "host"))]
    {
        tracing::warn!("Host WiFi support not compiled in (feature \"host\")");
        Box::new(SimWifi::new(false))
    }
}

fn build_modem(config: &Config) -> Option<SharedModem> {
    match config.network.modem_port.as_deref() {
        #[cfg(feature = "modem")]
        Some(port) => match crate::network::modem::open_serial(port, config.network.modem_baud) {
            Ok(modem) => Some(share(modem)),
            Err(e) => {
                tracing::error!("Failed to open modem on {}: {}", port, e);
                None
            }
        },
        #[cfg(not(feature = "modem"))]
        Some(port) => {
            tracing::warn!("Modem {} configured but feature \"modem\" is not compiled in", port);
            None
        }
        None if config.simulate => Some(share(SimModem::new())),
        None => None,
    }
}

fn motion_params(config: &Config) -> MotionParams {
    let s = &config.sensors;
    MotionParams {
        acc_threshold: s.acc_threshold,
        angle_threshold: s.angle_threshold,
        max_time_between: Duration::from_millis(s.max_time_between_ms),
        step_threshold: s.step_threshold,
        step_debounce: Duration::from_millis(s.step_debounce_ms),
        offsets: [s.x_offset, s.y_offset, s.z_offset],
    }
}

fn gas_curve(config: &Config) -> Mq2Curve {
    Mq2Curve {
        a: config.sensors.gas_a,
        b: config.sensors.gas_b,
        ratio_clean_air: config.sensors.gas_ratio_clean_air,
    }
}

/// Spawn every configured task; they run until `shutdown` flips
pub async fn spawn_all(
    config: &Config,
    devices: Devices,
    shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let intervals = &config.intervals;
    let period = IntervalsConfig::period;
    let (data_tx, data_rx) = mpsc::channel::<SensorMessage>(QUEUE_CAPACITY);
    let (http_tx, http_rx) = mpsc::channel::<ProcessedData>(QUEUE_CAPACITY);
    let (network_tx, network_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    let credentials = Credentials {
        ssid: config.network.ssid.clone(),
        password: config.network.password.clone(),
        apn: config.network.apn.clone(),
    };
    let network = Network::new(devices.wifi, devices.modem.clone(), credentials, network_tx);
    tasks.spawn(network_status::run(
        network,
        period(intervals.network_ms),
        shutdown.clone(),
    ));

    tasks.spawn(processing::run(
        data_rx,
        http_tx,
        config.device_id.clone(),
        shutdown.clone(),
    ));
    tasks.spawn(communication::run(
        http_rx,
        BackendClient::new(&config.device_id, &config.backend),
        network_rx.clone(),
        shutdown.clone(),
    ));

    if let Some(source) = devices.dht {
        let s = &config.sensors;
        tasks.spawn(dht::run(
            SensorDht::new(source),
            dht::DhtSettings {
                period: period(intervals.dht_ms),
                temp_threshold: s.temp_delta_threshold,
                hum_threshold: s.hum_delta_threshold,
            },
            data_tx.clone(),
            network_rx.clone(),
            shutdown.clone(),
        ));
    }

    if let Some(source) = devices.gas {
        tasks.spawn(gas::run(
            Mq2Sensor::new(source, gas_curve(config)),
            period(intervals.gas_ms),
            config.sensors.gas_delta_threshold,
            data_tx.clone(),
            shutdown.clone(),
        ));
    }

    if let Some(source) = devices.accelerometer {
        tasks.spawn(accelerometer::run(
            SensorAccelerometer::new(source, motion_params(config)),
            period(intervals.accel_sample_ms),
            period(intervals.accel_report_ms),
            data_tx.clone(),
            shutdown.clone(),
        ));
    }

    if let Some(source) = devices.battery {
        tasks.spawn(battery::run(
            source,
            period(intervals.battery_ms),
            data_tx.clone(),
            shutdown.clone(),
        ));
    }

    match (&devices.modem, config.sensors.gps || config.simulate) {
        (Some(modem), true) => {
            tasks.spawn(gps::run(
                Gps::new(modem.clone()),
                period(intervals.gps_ms),
                data_tx.clone(),
                shutdown.clone(),
            ));
        }
        (None, true) if config.sensors.gps => {
            tracing::warn!("GPS enabled but no modem is configured");
        }
        _ => {}
    }

    if config.ble.enabled {
        spawn_bluetooth(&mut tasks, config, data_tx, network_rx, shutdown).await;
    }

    tracing::info!("Started {} tasks", tasks.len());
    tasks
}

async fn spawn_bluetooth(
    tasks: &mut JoinSet<()>,
    config: &Config,
    data: mpsc::Sender<SensorMessage>,
    network: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
) {
    let address = config.ble.strap_address.clone();
    let settings = bluetooth::BluetoothSettings {
        tick: IntervalsConfig::period(config.intervals.bluetooth_tick_ms),
        report: IntervalsConfig::period(config.intervals.bluetooth_report_ms),
    };

    if config.simulate {
        let (transport, events) = EmulatedTransport::new(&address);
        let client = BluetoothClient::new(transport, events, &address)
            .with_strap_name(&config.ble.strap_name);
        tasks.spawn(bluetooth::run(client, settings, data, network, shutdown));
        return;
    }

    #[cfg(feature = "ble")]
    {
        match crate::bluetooth::btle::BtleTransport::new().await {
            Ok((transport, events)) => {
                let client = BluetoothClient::new(transport, events, &address)
                    .with_strap_name(&config.ble.strap_name);
                tasks.spawn(bluetooth::run(client, settings, data, network, shutdown));
            }
            Err(e) => tracing::error!("Bluetooth unavailable: {}", e),
        }
    }

    #[cfg(not(feature = "ble"))]
    {
        let _ = (settings, data, network, shutdown);
        tracing::warn!("BLE support not compiled in (feature \"ble\")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_send_reading_times_out_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut msg = SensorMessage::new();
        msg.set_steps(1);

        assert!(send_reading(&tx, msg, "test").await);
        assert!(!send_reading(&tx, msg, "test").await);
        assert_eq!(rx.recv().await, Some(msg));
    }

    #[tokio::test]
    async fn test_send_if_online_respects_status() {
        let (tx, mut rx) = mpsc::channel(2);
        let (status_tx, status) = watch::channel(false);
        let mut msg = SensorMessage::new();
        msg.set_heart_rate(70);

        assert!(!send_if_online(&tx, &status, msg, "test").await);
        status_tx.send(true).unwrap();
        assert!(send_if_online(&tx, &status, msg, "test").await);
        assert_eq!(rx.try_recv().ok(), Some(msg));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(sleep_or_shutdown(&mut rx, Duration::from_secs(5)).await);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
            tx
        });
        assert!(!sleep_or_shutdown(&mut rx, Duration::from_secs(60)).await);
        let _tx = stopper.await.unwrap();
        assert!(!sleep_or_shutdown(&mut rx, Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_simulated_hub_delivers_documents() {
        use crate::backend::echo::{spawn_scripted, Response};
        use crate::config::AuthMode;

        let (addr, mut requests) = spawn_scripted(|_| Response::ok()).await;
        let mut config = Config::default();
        config.simulate = true;
        config.ble.enabled = false;
        config.sensors.battery = crate::config::BatterySourceConfig::Simulated;
        config.backend.auth_mode = AuthMode::None;
        config.backend.data_url = format!("http://{}/data", addr);

        let (shutdown_tx, shutdown) = watch::channel(false);
        let devices = Devices::from_config(&config);
        let mut tasks = spawn_all(&config, devices, shutdown).await;

        let request = tokio::time::timeout(Duration::from_secs(30), requests.recv())
            .await
            .unwrap()
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["device_id"], "SENTINEL-001");

        shutdown_tx.send(true).unwrap();
        while tasks.join_next().await.is_some() {}
    }
}
