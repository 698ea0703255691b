//! Generic CAN-FD types and the bus transport seam.

pub mod bus;
pub mod sim;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use bus::{BusStatistics, CanBus};

/// Valid CAN-FD payload lengths. Frames are padded up to the next entry.
pub static DLC_TO_LEN: &[usize] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Maximum payload of a single CAN-FD frame.
pub const MAX_FRAME_LEN: usize = 64;

/// Current time as fractional unix epoch seconds. Used for frame and diagnostic
/// record timestamps.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Identifier for a CAN frame
#[derive(Copy, Clone, PartialOrd, Eq, PartialEq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Identifier {
    Standard(u32),
    Extended(u32),
}

impl Identifier {
    pub fn is_standard(&self) -> bool {
        match self {
            Identifier::Standard(_) => true,
            Identifier::Extended(_) => false,
        }
    }
    pub fn is_extended(&self) -> bool {
        !self.is_standard()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Extended(id) => write!(f, "0x{:08x}", id),
            Identifier::Standard(id) => write!(f, "0x{:03x}", id),
        }
    }
}

impl From<u32> for Identifier {
    fn from(id: u32) -> Identifier {
        if id <= 0x7ff {
            Identifier::Standard(id)
        } else {
            Identifier::Extended(id)
        }
    }
}

impl From<Identifier> for u32 {
    fn from(val: Identifier) -> u32 {
        match val {
            Identifier::Standard(id) => id,
            Identifier::Extended(id) => id,
        }
    }
}

/// A CAN-FD frame
#[derive(Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CanFrame {
    /// Arbitration ID
    pub id: Identifier,
    /// Data length code. Equal to the payload length for FD frames.
    pub dlc: u8,
    /// Frame Data
    pub data: Vec<u8>,
    /// Capture time, unix epoch seconds
    pub timestamp: f64,
    /// CAN-FD frame
    pub fd: bool,
}

impl CanFrame {
    pub fn new(id: Identifier, data: &[u8]) -> Result<CanFrame, crate::error::Error> {
        // Check if the data length is valid
        if !DLC_TO_LEN.contains(&data.len()) {
            return Err(crate::error::Error::MalformedFrame);
        }

        // Check if the ID makes sense
        match id {
            Identifier::Standard(id) if id > 0x7ff => return Err(crate::error::Error::MalformedFrame),
            Identifier::Extended(id) if id > 0x1fffffff => return Err(crate::error::Error::MalformedFrame),
            _ => {}
        };

        Ok(CanFrame {
            id,
            dlc: data.len() as u8,
            data: data.to_vec(),
            timestamp: unix_timestamp(),
            fd: data.len() > 8,
        })
    }

    pub fn is_extended(&self) -> bool {
        self.id.is_extended()
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &self.id)
            .field("dlc", &self.dlc)
            .field("data", &hex::encode(&self.data))
            .field("fd", &self.fd)
            .finish()
    }
}

/// Trait for the raw bus primitives exposed by a physical or simulated CAN adapter.
/// The engine only ever talks to the bus through this seam.
pub trait BusAdapter: Send {
    /// Hand a single frame to the adapter for transmission.
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), crate::error::Error>;
    /// Drain all frames the adapter has received so far. Non-blocking.
    fn poll(&mut self) -> Vec<CanFrame>;
}
