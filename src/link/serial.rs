//! Serial trigger link.
//!
//! The link survives a missing or unplugged board: while detached, reads time out, writes
//! fail with `WriteError`, and the port is reopened every `reconnect_interval`.

use anyhow::Result;
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::Instant;

use super::TriggerChannel;
use crate::config::SerialSettings;
use crate::error::SorterError;

pub struct SerialLink {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
    opened_at: Option<Instant>,
    last_attempt: Option<Instant>,
    reported_unavailable: bool,
    closed: bool,
}

impl SerialLink {
    /// Try to open the configured port. A missing port is logged, not returned.
    pub fn open(settings: SerialSettings) -> Self {
        let mut link = Self {
            settings,
            port: None,
            opened_at: None,
            last_attempt: None,
            reported_unavailable: false,
            closed: false,
        };
        link.connect();
        link
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_name(&self) -> &str {
        &self.settings.port
    }

    fn connect(&mut self) {
        self.last_attempt = Some(Instant::now());
        match serialport::new(&self.settings.port, self.settings.baud_rate)
            .timeout(self.settings.read_timeout)
            .open()
        {
            Ok(port) => {
                log::info!(
                    "SerialLink: connected to {} at {} baud, settling {}ms",
                    self.settings.port,
                    self.settings.baud_rate,
                    self.settings.settle.as_millis()
                );
                self.port = Some(port);
                self.opened_at = Some(Instant::now());
                self.reported_unavailable = false;
            }
            Err(err) => {
                let err = SorterError::device_unavailable(&self.settings.port, err);
                if self.reported_unavailable {
                    log::debug!("SerialLink: {}", err);
                } else {
                    log::warn!("SerialLink: {}; running without trigger link", err);
                    self.reported_unavailable = true;
                }
            }
        }
    }

    fn reconnect_if_due(&mut self) {
        if self.closed || self.port.is_some() {
            return;
        }
        let due = self
            .last_attempt
            .map_or(true, |at| at.elapsed() >= self.settings.reconnect_interval);
        if due {
            self.connect();
        }
    }

    fn settling(&self) -> bool {
        self.opened_at
            .is_some_and(|at| at.elapsed() < self.settings.settle)
    }

    fn detach(&mut self, reason: &str) {
        if self.port.take().is_some() {
            log::warn!("SerialLink: lost {}: {}", self.settings.port, reason);
            self.opened_at = None;
            self.last_attempt = Some(Instant::now());
        }
    }
}

impl TriggerChannel for SerialLink {
    fn read_byte(&mut self) -> Result<Option<u8>> {
        self.reconnect_if_due();
        let settling = self.settling();
        let Some(port) = self.port.as_mut() else {
            // Detached: behave like a read that timed out.
            std::thread::sleep(self.settings.read_timeout);
            return Ok(None);
        };

        let mut buf = [0u8; 1];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) if settling => {
                log::debug!("SerialLink: discarding byte 0x{:02x} received while settling", buf[0]);
                Ok(None)
            }
            Ok(_) => Ok(Some(buf[0])),
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(err) => {
                let reason = err.to_string();
                self.detach(&reason);
                Err(SorterError::ReadError(reason).into())
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(port) = self.port.as_mut() else {
            return Err(SorterError::WriteError(format!("{} not connected", self.settings.port)).into());
        };
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|err| SorterError::WriteError(err.to_string()))?;
        Ok(())
    }

    fn discard_pending(&mut self) -> Result<Vec<u8>> {
        let Some(port) = self.port.as_mut() else {
            return Ok(Vec::new());
        };
        let pending = port
            .bytes_to_read()
            .map_err(|err| SorterError::ReadError(err.to_string()))? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }
        let mut drained = vec![0u8; pending];
        let read = match port.read(&mut drained) {
            Ok(read) => read,
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => 0,
            Err(err) => return Err(SorterError::ReadError(err.to_string()).into()),
        };
        drained.truncate(read);
        if read < pending {
            port.clear(ClearBuffer::Input)
                .map_err(|err| SorterError::ReadError(err.to_string()))?;
        }
        Ok(drained)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.port.take().is_some() {
            log::info!("SerialLink: closed {}", self.settings.port);
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
