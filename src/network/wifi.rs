//! WiFi link of the host
//!
//! Association is left to the host's own network manager. The link counts as
//! up when the interface holds an IPv4 address and a probe host answers.

use super::WifiLink;
use async_trait::async_trait;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::time::Duration;
use tokio::net::TcpStream;

pub const WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WIFI_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Addresses of one interface, as far as the uplink cares
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceInfo {
    pub name: String,
    pub ipv4: Vec<String>,
    pub is_loopback: bool,
}

pub fn list_interfaces() -> Vec<InterfaceInfo> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::warn!("Failed to get network interfaces: {}", e);
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .map(|iface| {
            let is_loopback = iface.addr.iter().any(|a| match a {
                Addr::V4(v4) => v4.ip.is_loopback(),
                Addr::V6(v6) => v6.ip.is_loopback(),
            });
            let ipv4 = iface
                .addr
                .iter()
                .filter_map(|a| match a {
                    Addr::V4(v4) => Some(v4.ip.to_string()),
                    Addr::V6(_) => None,
                })
                .collect();
            InterfaceInfo {
                name: iface.name,
                ipv4,
                is_loopback,
            }
        })
        .collect()
}

/// Pick the uplink interface: the named one, or any non-loopback with IPv4
pub fn select_interface<'a>(
    interfaces: &'a [InterfaceInfo],
    wanted: Option<&str>,
) -> Option<&'a InterfaceInfo> {
    interfaces.iter().find(|iface| match wanted {
        Some(name) => iface.name == name,
        None => !iface.is_loopback && !iface.ipv4.is_empty(),
    })
}

pub struct HostWifi {
    interface: Option<String>,
    probe_host: String,
}

impl HostWifi {
    pub fn new(interface: Option<String>, probe_host: String) -> Self {
        Self {
            interface,
            probe_host,
        }
    }

    fn has_address(&self) -> bool {
        let interfaces = list_interfaces();
        select_interface(&interfaces, self.interface.as_deref())
            .is_some_and(|iface| !iface.ipv4.is_empty())
    }

    async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&self.probe_host)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl WifiLink for HostWifi {
    async fn scan(&mut self, ssid: &str) -> bool {
        let found = self.has_address();
        tracing::debug!("Interface check for {:?}: {}", ssid, found);
        found
    }

    async fn connect(&mut self, ssid: &str, _password: &str) -> bool {
        let deadline = tokio::time::Instant::now() + WIFI_CONNECT_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.is_connected().await {
                tracing::info!("Connected to WiFi {:?}", ssid);
                return true;
            }
            tokio::time::sleep(WIFI_POLL_INTERVAL).await;
        }
        false
    }

    async fn is_connected(&mut self) -> bool {
        self.has_address() && self.probe().await
    }

    async fn disconnect(&mut self) {
        tracing::debug!("WiFi association is managed by the host");
    }
}
