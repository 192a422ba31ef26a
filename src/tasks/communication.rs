//! Posts processed documents to the backend

use super::wait_online;
use crate::backend::BackendClient;
use crate::data::ProcessedData;
use tokio::sync::{mpsc, watch};

pub async fn run(
    mut http: mpsc::Receiver<ProcessedData>,
    mut client: BackendClient,
    mut network: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let doc = tokio::select! {
            doc = http.recv() => match doc {
                Some(doc) => doc,
                None => break,
            },
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        if !*network.borrow() {
            tracing::info!("Waiting for network before sending");
            if !wait_online(&mut network, &mut shutdown).await {
                break;
            }
        }

        match client.send(&doc).await {
            Ok(_) => tracing::debug!("Sent {} bytes", doc.len()),
            Err(e) => tracing::error!("Failed to send data: {}", e),
        }
    }
    tracing::info!("Communication task stopped");
}
