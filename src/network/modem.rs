//! AT-command driver for the LTE/GNSS modem (SIM7600 family)
//!
//! The driver is generic over the serial line so it runs on a real port,
//! a pseudo terminal or an in-memory duplex in tests.

use super::{CellularModem, GnssReceiver};
use crate::error::ModemError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

const AT_TIMEOUT: Duration = Duration::from_secs(1);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// PDP activation and power-off can take a while on weak coverage
const SLOW_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const AT_PROBES: u32 = 3;
const SIM_RETRIES: u32 = 10;
const REGISTRATION_RETRIES: u32 = 60;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Network registration state reported by +CREG/+CEREG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    NoResult,
    Unregistered,
    Searching,
    Denied,
    Home,
    Unknown,
    Roaming,
    SmsOnly,
}

impl RegistrationStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => RegistrationStatus::Unregistered,
            1 => RegistrationStatus::Home,
            2 => RegistrationStatus::Searching,
            3 => RegistrationStatus::Denied,
            5 => RegistrationStatus::Roaming,
            6 => RegistrationStatus::SmsOnly,
            4 => RegistrationStatus::Unknown,
            _ => RegistrationStatus::NoResult,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }
}

/// One GNSS solution as reported by the modem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssFix {
    /// 0 no fix, 2 = 2D, 3 = 3D
    pub mode: u8,
    pub latitude: f32,
    pub longitude: f32,
    /// Meters
    pub altitude: f32,
    /// Meters per second
    pub speed: f32,
    /// HDOP, used as the accuracy estimate
    pub accuracy: f32,
    pub satellites: u32,
}

const KNOTS_TO_MPS: f32 = 0.514_444;

/// ddmm.mmmm with hemisphere to signed decimal degrees
fn nmea_to_degrees(value: &str, hemisphere: &str) -> Option<f32> {
    let raw: f64 = value.parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    let signed = match hemisphere {
        "N" | "E" => decimal,
        "S" | "W" => -decimal,
        _ => return None,
    };
    Some(signed as f32)
}

/// Parse the payload of a `+CGNSSINFO:` line; None when there is no fix
pub fn parse_cgnssinfo(line: &str) -> Option<GnssFix> {
    let payload = line.strip_prefix("+CGNSSINFO:")?.trim();
    let fields: Vec<&str> = payload.split(',').map(str::trim).collect();
    if fields.len() < 15 || fields[0].is_empty() {
        return None;
    }

    let num = |i: usize| fields[i].parse::<f32>().ok();
    let sats = |i: usize| fields[i].parse::<u32>().unwrap_or(0);

    Some(GnssFix {
        mode: fields[0].parse().ok()?,
        satellites: sats(1).saturating_add(sats(2)).saturating_add(sats(3)),
        latitude: nmea_to_degrees(fields[4], fields[5])?,
        longitude: nmea_to_degrees(fields[6], fields[7])?,
        altitude: num(10).unwrap_or(0.0),
        speed: num(11).unwrap_or(0.0) * KNOTS_TO_MPS,
        accuracy: num(14).unwrap_or(0.0),
    })
}

/// Extract `<stat>` from `+CREG: <n>,<stat>[,...]` style responses
fn parse_registration(lines: &[String], prefix: &str) -> Option<RegistrationStatus> {
    let line = lines.iter().find_map(|l| l.strip_prefix(prefix))?;
    let code = line.split(',').nth(1)?.trim().parse().ok()?;
    Some(RegistrationStatus::from_code(code))
}

/// Final result code of a command, if `line` is one
fn final_result(line: &str) -> Option<bool> {
    if line == "OK" {
        Some(true)
    } else if line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") {
        Some(false)
    } else {
        None
    }
}

pub struct Modem<S> {
    port: BufStream<S>,
    /// Bytes of a line not yet terminated; survives a cancelled read
    partial: Vec<u8>,
    /// A timed-out command whose final result has not arrived yet
    owes_reply: bool,
    /// Set while a command waits for its result; still set if that wait was dropped
    in_flight: bool,
    enabled: bool,
}

impl<S> Modem<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(port: S) -> Self {
        Self {
            port: BufStream::new(port),
            partial: Vec::new(),
            owes_reply: false,
            in_flight: false,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send one command and collect its response lines up to the final result
    pub async fn command(&mut self, cmd: &str, limit: Duration) -> Result<Vec<String>, ModemError> {
        self.drain().await;
        if self.in_flight {
            // the caller gave up on the previous command mid-wait
            self.owes_reply = true;
        }
        let owed = self.owes_reply;

        tracing::trace!("AT >> {}", cmd);
        self.in_flight = true;
        self.port.write_all(cmd.as_bytes()).await?;
        self.port.write_all(b"\r\n").await?;
        self.port.flush().await?;

        let outcome = tokio::time::timeout(limit, self.read_response(cmd)).await;
        self.in_flight = false;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // a result discarded as late during this wait may have been ours
                self.owes_reply = match (owed, self.owes_reply) {
                    (true, false) => false,
                    _ => true,
                };
                Err(ModemError::Timeout(cmd.to_string()))
            }
        }
    }

    /// Next complete line; a partial line stays buffered when the read is cancelled
    async fn next_line(&mut self) -> Result<String, ModemError> {
        loop {
            if self.port.read_until(b'\n', &mut self.partial).await? == 0 {
                return Err(ModemError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            if self.partial.last() == Some(&b'\n') {
                let line = String::from_utf8_lossy(&self.partial).trim().to_string();
                self.partial.clear();
                return Ok(line);
            }
        }
    }

    /// Discard lines the modem sent before the next command goes out
    async fn drain(&mut self) {
        while let Ok(Ok(line)) = tokio::time::timeout(Duration::ZERO, self.next_line()).await {
            if line.is_empty() {
                continue;
            }
            tracing::debug!("Discarding unsolicited modem output: {}", line);
            if final_result(&line).is_some() {
                self.owes_reply = false;
                self.in_flight = false;
            }
        }
    }

    async fn read_response(&mut self, cmd: &str) -> Result<Vec<String>, ModemError> {
        let mut lines = Vec::new();
        loop {
            let line = self.next_line().await?;
            if line.is_empty() {
                continue;
            }
            if line == cmd {
                // echo: whatever came before belongs to an earlier command
                lines.clear();
                self.owes_reply = false;
                continue;
            }
            tracing::trace!("AT << {}", line);

            match final_result(&line) {
                None => lines.push(line),
                Some(_) if self.owes_reply => {
                    tracing::debug!("Discarding late result of an earlier command: {}", line);
                    self.owes_reply = false;
                    lines.clear();
                }
                Some(true) => return Ok(lines),
                Some(false) => {
                    return Err(ModemError::Command {
                        command: cmd.to_string(),
                        response: line,
                    })
                }
            }
        }
    }

    async fn test_at(&mut self) -> bool {
        self.command("AT", AT_TIMEOUT).await.is_ok()
    }

    pub async fn sim_ready(&mut self) -> bool {
        match self.command("AT+CPIN?", COMMAND_TIMEOUT).await {
            Ok(lines) => lines.iter().any(|l| l.contains("+CPIN: READY")),
            Err(_) => false,
        }
    }

    pub async fn registration_status(&mut self) -> RegistrationStatus {
        if let Ok(lines) = self.command("AT+CEREG?", COMMAND_TIMEOUT).await {
            if let Some(status) = parse_registration(&lines, "+CEREG:") {
                if status != RegistrationStatus::Unregistered {
                    return status;
                }
            }
        }
        match self.command("AT+CREG?", COMMAND_TIMEOUT).await {
            Ok(lines) => parse_registration(&lines, "+CREG:").unwrap_or(RegistrationStatus::NoResult),
            Err(_) => RegistrationStatus::NoResult,
        }
    }

    pub async fn local_ip(&mut self) -> Option<String> {
        let lines = self.command("AT+CGPADDR=1", COMMAND_TIMEOUT).await.ok()?;
        let line = lines.iter().find_map(|l| l.strip_prefix("+CGPADDR:"))?;
        let ip = line.split(',').nth(1)?.trim().trim_matches('"');
        Some(ip.to_string())
    }

    async fn power_off(&mut self) {
        if let Err(e) = self.command("AT+CPOF", SLOW_COMMAND_TIMEOUT).await {
            tracing::warn!("Modem power-off failed: {}", e);
        }
        self.enabled = false;
    }

    async fn wait_for_sim(&mut self) -> Result<(), ModemError> {
        for attempt in 1..=SIM_RETRIES {
            if self.sim_ready().await {
                tracing::info!("SIM card is ready");
                return Ok(());
            }
            tracing::info!("SIM not ready, waiting... attempt {}", attempt);
            tokio::time::sleep(RETRY_DELAY).await;
        }
        if self.sim_ready().await {
            return Ok(());
        }
        Err(ModemError::SimNotReady)
    }

    async fn wait_for_registration(&mut self) -> Result<RegistrationStatus, ModemError> {
        let mut status = RegistrationStatus::Unregistered;
        for _ in 0..REGISTRATION_RETRIES {
            status = self.registration_status().await;
            tracing::info!("Registration status: {:?}", status);

            match status {
                s if s.is_registered() => return Ok(s),
                RegistrationStatus::SmsOnly => {
                    tracing::warn!("Modem registered for SMS only, data services may be limited");
                    return Ok(status);
                }
                RegistrationStatus::Denied => return Err(ModemError::RegistrationDenied),
                _ => tokio::time::sleep(RETRY_DELAY).await,
            }
        }
        Err(ModemError::RegistrationFailed(format!("{:?}", status)))
    }

    async fn attach(&mut self, apn: &str) -> Result<(), ModemError> {
        if !self.enabled {
            self.enable().await?;
        }
        self.wait_for_sim().await?;

        let cgdcont = format!("AT+CGDCONT=1,\"IP\",\"{}\"", apn);
        if let Err(e) = self.command(&cgdcont, COMMAND_TIMEOUT).await {
            tracing::warn!("Setting APN failed: {}", e);
        }

        tracing::info!("Waiting for network registration...");
        self.wait_for_registration().await?;
        tracing::info!("Network registration successful, activating APN {}", apn);

        if let Err(e) = self.command("AT+CGACT=1,1", SLOW_COMMAND_TIMEOUT).await {
            tracing::warn!("PDP context activation failed: {}", e);
        }
        match self.local_ip().await {
            Some(ip) => tracing::info!("LTE IP address: {}", ip),
            None => tracing::debug!("No IP address reported"),
        }

        if self.data_connected().await {
            Ok(())
        } else {
            Err(ModemError::DataNotConnected)
        }
    }

    async fn data_connected(&mut self) -> bool {
        match self.command("AT+CGACT?", COMMAND_TIMEOUT).await {
            Ok(lines) => lines.iter().any(|l| l.replace(' ', "") == "+CGACT:1,1"),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl<S> CellularModem for Modem<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn enable(&mut self) -> Result<(), ModemError> {
        if self.enabled {
            tracing::debug!("Modem already enabled");
            return Ok(());
        }

        let mut responding = false;
        for attempt in 1..=AT_PROBES {
            if self.test_at().await {
                responding = true;
                break;
            }
            tracing::warn!("Modem not responding, attempt {}", attempt);
            tokio::time::sleep(RETRY_DELAY).await;
        }
        if !responding {
            return Err(ModemError::NotResponding);
        }

        self.command("ATE0", COMMAND_TIMEOUT).await?;
        let name = self.command("AT+CGMM", COMMAND_TIMEOUT).await?.join(" ");
        let info = self.command("ATI", COMMAND_TIMEOUT).await?.join(" ");
        tracing::info!("Modem name: {}", name);
        tracing::info!("Modem info: {}", info);

        self.command("AT+CNMP=2", COMMAND_TIMEOUT).await?;
        tracing::info!("Modem initialized, network mode automatic");
        self.enabled = true;
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), ModemError> {
        if !self.enabled {
            tracing::debug!("Modem already disabled");
            return Ok(());
        }
        if self.data_connected().await {
            self.disconnect().await?;
        }
        tracing::info!("Powering down modem...");
        self.power_off().await;
        Ok(())
    }

    async fn connect(&mut self, apn: &str) -> Result<(), ModemError> {
        tracing::info!("Attempting LTE connection...");
        match self.attach(apn).await {
            Ok(()) => {
                tracing::info!("LTE connection established");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("LTE connection failed ({}), disabling modem", e);
                self.power_off().await;
                Err(e)
            }
        }
    }

    async fn is_data_connected(&mut self) -> bool {
        self.enabled && self.data_connected().await
    }

    async fn disconnect(&mut self) -> Result<(), ModemError> {
        self.command("AT+CGACT=0,1", SLOW_COMMAND_TIMEOUT).await?;
        tracing::info!("LTE data disconnected");
        Ok(())
    }
}

#[async_trait]
impl<S> GnssReceiver for Modem<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn enable_gnss(&mut self) -> Result<(), ModemError> {
        self.command("AT+CGNSSPWR=1", COMMAND_TIMEOUT).await.map(|_| ())
    }

    async fn disable_gnss(&mut self) -> Result<(), ModemError> {
        self.command("AT+CGNSSPWR=0", COMMAND_TIMEOUT).await.map(|_| ())
    }

    async fn is_gnss_enabled(&mut self) -> bool {
        match self.command("AT+CGNSSPWR?", COMMAND_TIMEOUT).await {
            Ok(lines) => lines.iter().any(|l| l.replace(' ', "") == "+CGNSSPWR:1"),
            Err(_) => false,
        }
    }

    async fn gnss_info(&mut self) -> Result<Option<GnssFix>, ModemError> {
        let lines = self.command("AT+CGNSSINFO", COMMAND_TIMEOUT).await?;
        Ok(lines.iter().find_map(|l| parse_cgnssinfo(l)))
    }
}

/// Open the modem on a serial port
#[cfg(feature = "modem")]
pub fn open_serial(port: &str, baud: u32) -> Result<Modem<tokio_serial::SerialStream>, ModemError> {
    use tokio_serial::SerialPortBuilderExt;

    let stream = tokio_serial::new(port, baud)
        .open_native_async()
        .map_err(std::io::Error::from)?;
    tracing::info!("Modem serial open on {} at {} baud", port, baud);
    Ok(Modem::new(stream))
}
