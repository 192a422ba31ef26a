//! btleplug central transport for the heart-rate strap

use super::client::{BleEvent, BleTransport};
use super::{uuid_from_u16, HEARTRATE_CHAR_UUID, HEARTRATE_SERVICE_UUID};
use crate::error::BleError;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Manager as BtManager, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager as BluetoothManager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn backend(e: btleplug::Error) -> BleError {
    BleError::Backend(e.to_string())
}

pub struct BtleTransport {
    adapter: Adapter,
    events: mpsc::Sender<BleEvent>,
    scanning: bool,
    peripheral: Option<Peripheral>,
    /// Peripheral whose disconnects are forwarded
    linked: Arc<Mutex<Option<PeripheralId>>>,
    central_pump: JoinHandle<()>,
    notify_pump: Option<JoinHandle<()>>,
}

impl BtleTransport {
    /// Open the first adapter; returns the transport and its event stream
    pub async fn new() -> Result<(Self, mpsc::Receiver<BleEvent>), BleError> {
        let manager = BluetoothManager::new().await.map_err(backend)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend)?
            .into_iter()
            .next()
            .ok_or(BleError::NoAdapter)?;

        let info = adapter
            .adapter_info()
            .await
            .unwrap_or_else(|_| "Unknown adapter".to_string());
        tracing::info!("Using Bluetooth adapter: {}", info);

        let (tx, rx) = mpsc::channel(64);
        let linked = Arc::new(Mutex::new(None));
        let central_pump = spawn_central_pump(adapter.clone(), tx.clone(), linked.clone()).await?;

        let transport = Self {
            adapter,
            events: tx,
            scanning: false,
            peripheral: None,
            linked,
            central_pump,
            notify_pump: None,
        };
        Ok((transport, rx))
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, BleError> {
        let peripherals = self.adapter.peripherals().await.map_err(backend)?;
        for peripheral in peripherals {
            let properties = peripheral.properties().await.ok().flatten();
            let matches = properties
                .as_ref()
                .is_some_and(|p| p.address.to_string().eq_ignore_ascii_case(address));
            if matches {
                return Ok(peripheral);
            }
        }
        Err(BleError::UnknownPeripheral(address.to_string()))
    }

    fn set_linked(&self, id: Option<PeripheralId>) {
        if let Ok(mut linked) = self.linked.lock() {
            *linked = id;
        }
    }
}

/// Forward adapter events as [`BleEvent`]s
async fn spawn_central_pump(
    adapter: Adapter,
    tx: mpsc::Sender<BleEvent>,
    linked: Arc<Mutex<Option<PeripheralId>>>,
) -> Result<JoinHandle<()>, BleError> {
    let mut events = adapter.events().await.map_err(backend)?;

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let forwarded = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    let Ok(peripheral) = adapter.peripheral(&id).await else {
                        continue;
                    };
                    match peripheral.properties().await.ok().flatten() {
                        Some(p) => BleEvent::Discovered {
                            address: p.address.to_string(),
                            name: p.local_name,
                        },
                        None => continue,
                    }
                }
                CentralEvent::DeviceDisconnected(id) => {
                    let ours = linked
                        .lock()
                        .map(|l| l.as_ref() == Some(&id))
                        .unwrap_or(false);
                    if !ours {
                        continue;
                    }
                    BleEvent::Disconnected(format!("{:?}", id))
                }
                _ => continue,
            };

            if tx.send(forwarded).await.is_err() {
                break;
            }
        }
        tracing::debug!("Bluetooth adapter event stream ended");
    }))
}

#[async_trait]
impl BleTransport for BtleTransport {
    async fn start_scan(&mut self) -> Result<(), BleError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(backend)?;
        self.scanning = true;
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), BleError> {
        self.scanning = false;
        self.adapter.stop_scan().await.map_err(backend)
    }

    fn is_scanning(&self) -> bool {
        self.scanning
    }

    async fn connect(&mut self, address: &str) -> Result<(), BleError> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.connect().await.map_err(backend)?;
        self.set_linked(Some(peripheral.id()));
        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn discover_services(&mut self) -> Result<bool, BleError> {
        let peripheral = self.peripheral.as_ref().ok_or(BleError::NotConnected)?;
        peripheral.discover_services().await.map_err(backend)?;

        let service = uuid_from_u16(HEARTRATE_SERVICE_UUID);
        Ok(peripheral.services().iter().any(|s| s.uuid == service))
    }

    async fn subscribe_heart_rate(&mut self) -> Result<bool, BleError> {
        let peripheral = self.peripheral.clone().ok_or(BleError::NotConnected)?;
        let char_uuid = uuid_from_u16(HEARTRATE_CHAR_UUID);

        let Some(characteristic) = peripheral.characteristics().into_iter().find(|c| {
            c.uuid == char_uuid && c.properties.contains(CharPropFlags::NOTIFY)
        }) else {
            return Ok(false);
        };

        peripheral.subscribe(&characteristic).await.map_err(backend)?;
        let mut notifications = peripheral.notifications().await.map_err(backend)?;

        if let Some(pump) = self.notify_pump.take() {
            pump.abort();
        }
        let tx = self.events.clone();
        self.notify_pump = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != char_uuid {
                    continue;
                }
                if tx.send(BleEvent::Notification(notification.value)).await.is_err() {
                    break;
                }
            }
        }));
        Ok(true)
    }

    async fn disconnect(&mut self) -> Result<(), BleError> {
        if let Some(pump) = self.notify_pump.take() {
            pump.abort();
        }
        self.set_linked(None);
        match self.peripheral.take() {
            Some(peripheral) => peripheral.disconnect().await.map_err(backend),
            None => Ok(()),
        }
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.central_pump.abort();
        if let Some(pump) = self.notify_pump.take() {
            pump.abort();
        }
    }
}
