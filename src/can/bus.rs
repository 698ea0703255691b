//! Connection-tracking wrapper around a [`BusAdapter`], with frame statistics.

use std::time::Duration;

use tracing::{debug, warn};

use crate::can::{BusAdapter, CanFrame, Identifier, MAX_FRAME_LEN};
use crate::error::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Snapshot of the bus counters. Returned by value from [`CanBus::statistics`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[derive(serde::Serialize)]
pub struct BusStatistics {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub errors: u64,
    pub bytes_received: u64,
}

/// A CAN-FD channel. Owns the adapter, a connection flag, and traffic counters.
/// `connect`/`disconnect` are idempotent; sending while disconnected fails with
/// [`Error::NotConnected`], receiving while disconnected returns no frames.
pub struct CanBus<A: BusAdapter> {
    adapter: A,
    connected: bool,
    stats: BusStatistics,
}

impl<A: BusAdapter> CanBus<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            connected: false,
            stats: BusStatistics::default(),
        }
    }

    pub fn connect(&mut self) -> bool {
        self.connected = true;
        true
    }

    pub fn disconnect(&mut self) -> bool {
        let was_connected = self.connected;
        self.connected = false;
        was_connected
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Send a single frame. Fails with [`Error::NotConnected`] while disconnected and
    /// [`Error::FrameTooLarge`] for payloads over 64 bytes.
    pub fn send(&mut self, can_id: u32, payload: &[u8], extended: bool) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if payload.len() > MAX_FRAME_LEN {
            self.stats.errors += 1;
            return Err(Error::FrameTooLarge(payload.len()));
        }

        let id = if extended {
            Identifier::Extended(can_id)
        } else {
            Identifier::Standard(can_id)
        };

        let frame = CanFrame::new(id, payload).inspect_err(|_| self.stats.errors += 1)?;
        self.send_frame(&frame)
    }

    pub fn send_frame(&mut self, frame: &CanFrame) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        debug!("TX {:?}", frame);
        match self.adapter.transmit(frame) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    /// Receive whatever frames arrive within `timeout`. Returns an empty vec on
    /// timeout, never an error. The wait is bounded.
    pub async fn receive(&mut self, timeout: Duration) -> Vec<CanFrame> {
        if !self.connected {
            warn!("receive called while disconnected");
            return vec![];
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frames = self.adapter.poll();
            if !frames.is_empty() {
                self.stats.frames_received += frames.len() as u64;
                self.stats.bytes_received += frames.iter().map(|f| f.data.len() as u64).sum::<u64>();
                return frames;
            }
            if tokio::time::Instant::now() >= deadline {
                return vec![];
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Snapshot copy of the traffic counters.
    pub fn statistics(&self) -> BusStatistics {
        self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = BusStatistics::default();
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::sim::SimEcu;

    #[test]
    fn connect_is_idempotent() {
        let mut bus = CanBus::new(SimEcu::default());
        assert!(!bus.is_connected());
        assert!(bus.connect());
        assert!(bus.connect());
        assert!(bus.disconnect());
        assert!(!bus.disconnect());
    }

    #[test]
    fn send_requires_connection() {
        let mut bus = CanBus::new(SimEcu::default());
        assert_eq!(bus.send(0x7e0, &[0x3e, 0x00], false), Err(Error::NotConnected));
        assert_eq!(bus.statistics(), BusStatistics::default());
    }

    #[test]
    fn send_rejects_oversized_payload() {
        let mut bus = CanBus::new(SimEcu::default());
        bus.connect();
        assert_eq!(bus.send(0x7e0, &[0u8; 65], false), Err(Error::FrameTooLarge(65)));
        assert_eq!(bus.statistics().errors, 1);
        bus.reset_statistics();
        assert_eq!(bus.statistics(), BusStatistics::default());
    }

    #[tokio::test]
    async fn receive_times_out_empty() {
        let mut bus = CanBus::new(SimEcu::default());
        bus.connect();
        let frames = bus.receive(Duration::from_millis(5)).await;
        assert!(frames.is_empty());
    }
}
