//! Turns queued readings into JSON documents for the uplink

use super::{send_within, FORWARD_TIMEOUT};
use crate::data::{ProcessedData, SensorMessage};
use crate::shared::unix_millis;
use tokio::sync::{mpsc, watch};

/// Merge readings already waiting in the queue with `first`.
///
/// Readings are folded together as long as they measure different fields and
/// the merged document still fits; the rest start a new batch.
pub fn coalesce(
    first: SensorMessage,
    queue: &mut mpsc::Receiver<SensorMessage>,
    device_id: &str,
    timestamp_ms: i64,
) -> Vec<SensorMessage> {
    let mut batches = Vec::new();
    let mut pending = first;

    while let Ok(next) = queue.try_recv() {
        let mut merged = pending;
        merged.merge(&next);
        if !pending.valid.overlaps(&next.valid) && merged.render(device_id, timestamp_ms).is_ok() {
            pending = merged;
        } else {
            batches.push(pending);
            pending = next;
        }
    }
    batches.push(pending);
    batches
}

pub async fn run(
    mut data: mpsc::Receiver<SensorMessage>,
    http: mpsc::Sender<ProcessedData>,
    device_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            msg = data.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        let timestamp = unix_millis();
        for msg in coalesce(first, &mut data, &device_id, timestamp) {
            match msg.render(&device_id, timestamp) {
                Ok(doc) => {
                    tracing::debug!("Processed {} fields into {} bytes", msg.valid.count(), doc.len());
                    send_within(&http, doc, FORWARD_TIMEOUT, "processing").await;
                }
                Err(e) => tracing::warn!("Dropping reading: {}", e),
            }
        }
    }
    tracing::info!("Processing task stopped");
}
