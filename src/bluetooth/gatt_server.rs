//! Strap emulator served as a BlueZ GATT peripheral

use super::emulator::{StrapEmulator, EMULATOR_UPDATE_INTERVAL};
use super::{
    uuid_from_u16, BATTERY_LEVEL_CHAR_UUID, BATTERY_SERVICE_UUID, HEARTRATE_CHAR_UUID,
    HEARTRATE_SERVICE_UUID, STEP_COUNT_CHAR_UUID, STEP_SERVICE_UUID,
};
use anyhow::{Context, Result};
use bluer::adv::Advertisement;
use bluer::gatt::local::{
    Application, Characteristic, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicRead, ReqError, Service,
};
use bluer::{Adapter, Session};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

pub const EMULATOR_LOCAL_NAME: &str = "Sentinel Strap Emulator";

type Frame = fn(&StrapEmulator) -> Vec<u8>;

async fn get_adapter(session: &Session, name: Option<&str>) -> Result<Adapter> {
    match name {
        Some(n) => session
            .adapter(n)
            .with_context(|| format!("Failed to get adapter '{}'", n)),
        None => session
            .default_adapter()
            .await
            .context("Failed to get default adapter"),
    }
}

/// Characteristic publishing `frame` of the shared strap on every update
fn strap_characteristic(
    uuid: Uuid,
    readable: bool,
    frame: Frame,
    strap: Arc<Mutex<StrapEmulator>>,
    updates: watch::Receiver<()>,
) -> Characteristic {
    let read = readable.then(|| {
        let strap = strap.clone();
        CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| {
                let strap = strap.clone();
                async move { Ok::<_, ReqError>(frame(&*strap.lock().await)) }.boxed()
            }),
            ..Default::default()
        }
    });

    let notify = CharacteristicNotify {
        notify: true,
        method: CharacteristicNotifyMethod::Fun(Box::new(move |mut notifier| {
            let strap = strap.clone();
            let mut updates = updates.clone();
            async move {
                tokio::spawn(async move {
                    tracing::info!("Notification session started for {}", uuid);
                    while updates.changed().await.is_ok() {
                        let value = frame(&*strap.lock().await);
                        if notifier.notify(value).await.is_err() || notifier.is_stopped() {
                            break;
                        }
                    }
                    tracing::info!("Notification session stopped for {}", uuid);
                });
            }
            .boxed()
        })),
        ..Default::default()
    };

    Characteristic {
        uuid,
        read,
        notify: Some(notify),
        ..Default::default()
    }
}

fn service(uuid: Uuid, characteristic: Characteristic) -> Service {
    Service {
        uuid,
        primary: true,
        characteristics: vec![characteristic],
        ..Default::default()
    }
}

/// Advertise and serve the emulated strap until `shutdown` flips
pub async fn run(adapter_name: Option<&str>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let session = Session::new().await.context("Failed to connect to BlueZ")?;
    let adapter = get_adapter(&session, adapter_name).await?;
    adapter
        .set_powered(true)
        .await
        .context("Failed to power on adapter")?;

    let address = adapter.address().await.context("Failed to read adapter address")?;
    tracing::info!("Strap emulator on {} ({})", adapter.name(), address);

    let strap = Arc::new(Mutex::new(StrapEmulator::new()));
    let (updates_tx, updates_rx) = watch::channel(());

    let battery_uuid = uuid_from_u16(BATTERY_SERVICE_UUID);
    let heart_rate_uuid = uuid_from_u16(HEARTRATE_SERVICE_UUID);

    let app = Application {
        services: vec![
            service(
                battery_uuid,
                strap_characteristic(
                    uuid_from_u16(BATTERY_LEVEL_CHAR_UUID),
                    true,
                    |s| vec![s.battery_level()],
                    strap.clone(),
                    updates_rx.clone(),
                ),
            ),
            service(
                heart_rate_uuid,
                strap_characteristic(
                    uuid_from_u16(HEARTRATE_CHAR_UUID),
                    false,
                    StrapEmulator::heart_rate_frame,
                    strap.clone(),
                    updates_rx.clone(),
                ),
            ),
            service(
                STEP_SERVICE_UUID,
                strap_characteristic(
                    STEP_COUNT_CHAR_UUID,
                    true,
                    StrapEmulator::steps_frame,
                    strap.clone(),
                    updates_rx,
                ),
            ),
        ],
        ..Default::default()
    };

    let advertisement = Advertisement {
        service_uuids: [battery_uuid, heart_rate_uuid, STEP_SERVICE_UUID]
            .into_iter()
            .collect(),
        discoverable: Some(true),
        local_name: Some(EMULATOR_LOCAL_NAME.to_string()),
        ..Default::default()
    };

    let _adv_handle = adapter
        .advertise(advertisement)
        .await
        .context("Failed to start advertising")?;
    let _app_handle = adapter
        .serve_gatt_application(app)
        .await
        .context("Failed to register GATT application")?;
    tracing::info!("BLE GATT server started");

    let mut ticker = tokio::time::interval(EMULATOR_UPDATE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut s = strap.lock().await;
                s.step();
                tracing::info!(
                    "battery={}% heart_rate={} bpm steps={}",
                    s.battery_level(),
                    s.heart_rate(),
                    s.steps()
                );
                drop(s);
                updates_tx.send_replace(());
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Strap emulator stopped");
    Ok(())
}
