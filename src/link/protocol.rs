//! Single-byte ASCII protocol spoken with the sorting controller board.
//!
//! | Direction        | Bytes      | Meaning                                 |
//! |------------------|------------|-----------------------------------------|
//! | peer -> sorter   | `3`        | start one classification cycle          |
//! | sorter -> peer   | `0`        | organic                                 |
//! | sorter -> peer   | `1`        | non-organic                             |
//! | sorter -> peer   | `2`        | mixed / no object / ambiguous           |
//! | sorter -> peer   | `0` `0`    | classification failed after retries     |

use crate::verdict::Verdict;

pub const TRIGGER_BYTE: u8 = b'3';

/// Start of one classification cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerEvent;

/// Recognise a trigger. Every other byte (including line endings) is ignored.
pub fn parse_trigger(byte: u8) -> Option<TriggerEvent> {
    (byte == TRIGGER_BYTE).then_some(TriggerEvent)
}

/// Reply written back to the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireCode {
    Organic,
    NonOrganic,
    Mixed,
    /// Retries exhausted without a usable classification.
    Failure,
}

impl WireCode {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Organic => b"0",
            Self::NonOrganic => b"1",
            Self::Mixed => b"2",
            Self::Failure => b"00",
        }
    }

    /// Code for a final verdict. `NoResult` only reaches the wire once retries are spent.
    pub fn for_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Organic => Self::Organic,
            Verdict::NonOrganic => Self::NonOrganic,
            Verdict::Mixed => Self::Mixed,
            Verdict::NoResult => Self::Failure,
        }
    }
}
