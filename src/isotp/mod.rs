//! ISO-TP style segmentation for UDS messages over CAN-FD, modeled on ISO 15765-2.
//!
//! This layer presents a byte-stream message abstraction over frame-sized payloads.
//! It is purely a buffering and reassembly state machine; it knows nothing about
//! sessions or addressing. [`segment`] turns a message into frame payloads, and a
//! [`Reassembler`] absorbs received payloads until a full message is available.
//!
//! ## Example:
//! ```rust
//! use fleetdiag::isotp::{segment, Reassembler, SegmentConfig};
//!
//! let config = SegmentConfig::default();
//! let message = vec![0x22, 0xf1, 0x90];
//!
//! let frames = segment(&message, &config).unwrap();
//! let mut reassembler = Reassembler::new();
//! let mut out = None;
//! for frame in &frames {
//!     out = reassembler.absorb(frame).unwrap();
//! }
//! assert_eq!(out.unwrap(), message);
//! ```

pub mod constants;
pub mod error;

use crate::can::DLC_TO_LEN;
use crate::isotp::constants::{FrameType, FRAME_TYPE_MASK};
use crate::isotp::error::Error;

use tracing::debug;

/// Largest message a first frame can describe (12-bit length field).
pub const MAX_MESSAGE_LEN: usize = 4095;

/// Configuration for the segmentation side.
#[derive(Debug, Copy, Clone)]
pub struct SegmentConfig {
    /// Transmit data length, i.e. the frame payload size to fill. 64 for CAN-FD.
    pub tx_dl: usize,
    /// Padding byte (0x00, or more efficient 0xAA)
    pub padding: u8,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            tx_dl: 64,
            padding: 0xaa,
        }
    }
}

fn pad_to_valid_len(buf: &mut Vec<u8>, padding: u8) {
    let target = DLC_TO_LEN
        .iter()
        .find(|&&len| len >= buf.len())
        .copied()
        .unwrap_or(buf.len());
    buf.resize(target, padding);
}

fn single_frame(data: &[u8], config: &SegmentConfig) -> Vec<u8> {
    let mut buf = if data.len() <= 7 {
        vec![FrameType::Single as u8 | data.len() as u8]
    } else {
        // CAN-FD escape sequence: length moves to the second PCI byte
        vec![FrameType::Single as u8, data.len() as u8]
    };
    buf.extend(data);
    pad_to_valid_len(&mut buf, config.padding);

    debug!("TX SF, length: {} data {}", data.len(), hex::encode(&buf));
    buf
}

fn first_frame(data: &[u8], config: &SegmentConfig) -> Vec<u8> {
    let b0: u8 = FrameType::First as u8 | ((data.len() >> 8) & 0xf) as u8;
    let b1: u8 = (data.len() & 0xff) as u8;

    let mut buf = vec![b0, b1];
    buf.extend(&data[..config.tx_dl - 2]);

    debug!("TX FF, length: {} data {}", data.len(), hex::encode(&buf));
    buf
}

fn consecutive_frame(chunk: &[u8], idx: usize, config: &SegmentConfig) -> Vec<u8> {
    let idx = ((idx + 1) & 0xf) as u8;

    let mut buf = vec![FrameType::Consecutive as u8 | idx];
    buf.extend(chunk);
    pad_to_valid_len(&mut buf, config.padding);

    debug!("TX CF, idx: {} data {}", idx, hex::encode(&buf));
    buf
}

/// Split a message into frame payloads. Messages that fit in one frame become a
/// single frame; larger messages become a first frame carrying the total length
/// followed by consecutive frames with a cyclic sequence index (1..=15, then 0).
/// Messages over [`MAX_MESSAGE_LEN`] fail with [`Error::DataTooLarge`].
pub fn segment(data: &[u8], config: &SegmentConfig) -> Result<Vec<Vec<u8>>, Error> {
    // Single frame capacity: one PCI byte for up to 7 data bytes, two PCI bytes
    // with the CAN-FD escape sequence.
    let sf_capacity = if config.tx_dl > 8 { config.tx_dl - 2 } else { 7 };

    if data.len() <= sf_capacity {
        return Ok(vec![single_frame(data, config)]);
    }

    if data.len() > MAX_MESSAGE_LEN {
        return Err(Error::DataTooLarge);
    }

    let mut frames = vec![first_frame(data, config)];
    let chunks = data[config.tx_dl - 2..].chunks(config.tx_dl - 1);
    for (idx, chunk) in chunks.enumerate() {
        frames.push(consecutive_frame(chunk, idx, config));
    }

    Ok(frames)
}

/// Receive-side state machine. Feed it frame payloads in arrival order via
/// [`Reassembler::absorb`]; it yields the full message once the declared length has
/// been seen. Out-of-order or duplicate sequence indices fail with
/// [`Error::Segmentation`].
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    expected_len: usize,
    next_idx: u8,
    in_progress: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a multi-frame message has started but not yet completed.
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// The error describing an aborted reassembly, for when the frame source dries up
    /// before the declared length is met.
    pub fn incomplete(&self) -> Error {
        Error::Incomplete {
            expected: self.expected_len,
            received: self.buf.len(),
        }
    }

    pub fn absorb(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if payload.is_empty() {
            return Err(Error::MalformedFrame);
        }

        match (payload[0] & FRAME_TYPE_MASK).into() {
            FrameType::Single => self.absorb_single(payload),
            FrameType::First => self.absorb_first(payload),
            FrameType::Consecutive => self.absorb_consecutive(payload),
            FrameType::Unknown => Err(Error::UnknownFrameType),
        }
    }

    fn absorb_single(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let (len, start) = match (payload[0] & 0xf) as usize {
            // CAN-FD escape sequence, length in the second PCI byte
            0 if payload.len() >= 2 => (payload[1] as usize, 2),
            0 => return Err(Error::MalformedFrame),
            len => (len, 1),
        };

        if len == 0 || start + len > payload.len() {
            return Err(Error::MalformedFrame);
        }

        debug!("RX SF, length: {} data {}", len, hex::encode(payload));
        Ok(Some(payload[start..start + len].to_vec()))
    }

    fn absorb_first(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if payload.len() < 2 {
            return Err(Error::MalformedFrame);
        }

        let b0 = payload[0] as u16;
        let b1 = payload[1] as u16;
        let len = ((b0 << 8 | b1) & 0xfff) as usize;

        debug!("RX FF, length: {}, data {}", len, hex::encode(payload));

        self.buf = payload[2..].to_vec();
        self.expected_len = len;
        self.next_idx = 1;
        self.in_progress = true;

        Ok(self.try_complete())
    }

    fn absorb_consecutive(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if !self.in_progress {
            // A consecutive frame with no preceding first frame
            return Err(Error::Segmentation {
                expected: 0,
                got: payload[0] & 0xf,
            });
        }

        let msg_idx = payload[0] & 0xf;
        debug!("RX CF, idx: {}, data {}", msg_idx, hex::encode(payload));

        if msg_idx != self.next_idx {
            return Err(Error::Segmentation {
                expected: self.next_idx,
                got: msg_idx,
            });
        }

        let remaining = self.expected_len - self.buf.len();
        let end = std::cmp::min(remaining + 1, payload.len());
        self.buf.extend(&payload[1..end]);

        self.next_idx = if self.next_idx == 0xf { 0 } else { self.next_idx + 1 };

        Ok(self.try_complete())
    }

    fn try_complete(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() >= self.expected_len {
            self.in_progress = false;
            let mut buf = std::mem::take(&mut self.buf);
            buf.truncate(self.expected_len);
            Some(buf)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(len: usize) -> Vec<u8> {
        let message: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let frames = segment(&message, &SegmentConfig::default()).unwrap();

        let mut reassembler = Reassembler::new();
        for frame in &frames[..frames.len() - 1] {
            assert_eq!(reassembler.absorb(frame).unwrap(), None);
        }
        let out = reassembler.absorb(frames.last().unwrap()).unwrap().unwrap();
        assert_eq!(out, message);
        frames.into_iter().flatten().collect()
    }

    #[test]
    fn single_frame_roundtrip() {
        for len in 1..=62 {
            roundtrip(len);
        }
    }

    #[test]
    fn multi_frame_roundtrip() {
        for len in [63, 64, 100, 512, 1000, 4095] {
            roundtrip(len);
        }
    }

    #[test]
    fn classic_payload_uses_short_single_frame() {
        let frames = segment(&[0x3e, 0x00], &SegmentConfig::default()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0x02);
    }

    #[test]
    fn fd_single_frame_uses_escape() {
        let message = vec![0x11; 20];
        let frames = segment(&message, &SegmentConfig::default()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0x00);
        assert_eq!(frames[0][1], 20);
    }

    #[test]
    fn sequence_index_wraps_past_fifteen() {
        // 4095 bytes needs more than 16 consecutive frames at tx_dl 8
        let message: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        let config = SegmentConfig {
            tx_dl: 8,
            padding: 0xaa,
        };
        let frames = segment(&message, &config).unwrap();
        assert!(frames.len() > 17);
        // Frame 16 carries index 15, frame 17 wraps to 0
        assert_eq!(frames[15][0] & 0xf, 0xf);
        assert_eq!(frames[16][0] & 0xf, 0x0);

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for frame in &frames {
            out = reassembler.absorb(frame).unwrap();
        }
        assert_eq!(out.unwrap(), message);
    }

    #[test]
    fn out_of_order_index_fails() {
        let message = vec![0x22; 200];
        let frames = segment(&message, &SegmentConfig::default()).unwrap();
        assert!(frames.len() >= 4);

        let mut reassembler = Reassembler::new();
        reassembler.absorb(&frames[0]).unwrap();
        reassembler.absorb(&frames[1]).unwrap();
        // Skip frame 2, deliver frame 3
        assert_eq!(
            reassembler.absorb(&frames[3]),
            Err(Error::Segmentation { expected: 2, got: 3 })
        );
    }

    #[test]
    fn duplicate_index_fails() {
        let message = vec![0x22; 200];
        let frames = segment(&message, &SegmentConfig::default()).unwrap();

        let mut reassembler = Reassembler::new();
        reassembler.absorb(&frames[0]).unwrap();
        reassembler.absorb(&frames[1]).unwrap();
        assert_eq!(
            reassembler.absorb(&frames[1]),
            Err(Error::Segmentation { expected: 2, got: 1 })
        );
    }

    #[test]
    fn stray_consecutive_frame_fails() {
        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.absorb(&[0x21, 0x01, 0x02]),
            Err(Error::Segmentation { .. })
        ));
    }

    #[test]
    fn incomplete_message_reports_progress() {
        let message = vec![0x22; 200];
        let frames = segment(&message, &SegmentConfig::default()).unwrap();

        let mut reassembler = Reassembler::new();
        reassembler.absorb(&frames[0]).unwrap();
        assert!(reassembler.in_progress());
        assert_eq!(
            reassembler.incomplete(),
            Error::Incomplete {
                expected: 200,
                received: 62
            }
        );
    }

    #[test]
    fn oversized_message_rejected() {
        let message = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert_eq!(
            segment(&message, &SegmentConfig::default()),
            Err(Error::DataTooLarge)
        );
    }
}
