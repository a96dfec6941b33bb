//! Trigger link to the sorting controller board.
//!
//! The link is half-duplex: the board sends trigger bytes, the sorter answers each trigger
//! with one verdict code. Reads block for at most the configured timeout so the
//! controller loop can observe shutdown without spinning.

pub mod protocol;
pub mod serial;

use anyhow::Result;

pub use protocol::{parse_trigger, TriggerEvent, WireCode, TRIGGER_BYTE};
pub use serial::SerialLink;

pub trait TriggerChannel: Send {
    /// Wait for one byte. `Ok(None)` on timeout.
    fn read_byte(&mut self) -> Result<Option<u8>>;

    /// Write a complete reply and flush it.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Drain everything received but not yet read and return it.
    fn discard_pending(&mut self) -> Result<Vec<u8>>;

    /// Release the underlying device. Calling it again is a no-op.
    fn close(&mut self);
}
