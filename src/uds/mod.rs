//! Unified Diagnostic Services (UDS) Session Client, implements a subset of ISO 14229
//! ## Example
//! ```rust
//! use fleetdiag::can::sim::SimEcu;
//! use fleetdiag::uds::{SessionType, UdsClient};
//!
//! async fn uds_example() {
//!     let mut client = UdsClient::new(SimEcu::default(), 0x7e0);
//!     client.connect();
//!
//!     client.session_control(SessionType::Extended).await.unwrap();
//!     client.tester_present(0x00).await.unwrap();
//!
//!     let vin = client.get_vehicle_identification().await.unwrap();
//!     println!("VIN: {:?}", vin);
//! }
//! ```

pub mod constants;
pub mod error;
mod types;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::can::{BusAdapter, BusStatistics, CanBus, CanFrame, Identifier};
use crate::isotp::{segment, Reassembler, SegmentConfig};
use crate::Result;
pub use constants::*;
pub use error::{Error, NegativeResponseCode};
pub use types::*;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// The S3 window: without a TesterPresent inside this window the ECU drops back to
/// the default session. Callers keeping a long session alive should send
/// TesterPresent at no more than half this interval.
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(5000);

/// UDS Session Client. Owns one CAN channel and one ECU address pair, and tracks the
/// protocol state (session, security level, timing) for that ECU.
///
/// State is only ever mutated by protocol messages: a session transition happens on a
/// positive DiagnosticSessionControl response, and the tracked session falls back to
/// [`SessionType::Default`] when the keep-alive window expires.
pub struct UdsClient<A: BusAdapter> {
    bus: CanBus<A>,
    tx_id: Identifier,
    rx_id: Identifier,
    segment_config: SegmentConfig,
    response_timeout: Duration,
    session_timeout: Duration,
    session: SessionState,
    session_deadline: Option<Instant>,
    security_level: Option<u8>,
    did_layout: DidLayout,
}

impl<A: BusAdapter> UdsClient<A> {
    /// Create a client for the ECU addressed by `tx_id`. The receive id follows the
    /// usual offset-by-8 convention.
    pub fn new(adapter: A, tx_id: u32) -> Self {
        Self {
            bus: CanBus::new(adapter),
            tx_id: tx_id.into(),
            rx_id: (tx_id + 8).into(),
            segment_config: SegmentConfig::default(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            session: SessionState::Disconnected,
            session_deadline: None,
            security_level: None,
            did_layout: DidLayout::Interleaved,
        }
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    pub fn set_session_timeout(&mut self, timeout: Duration) {
        self.session_timeout = timeout;
    }

    pub fn set_did_layout(&mut self, layout: DidLayout) {
        self.did_layout = layout;
    }

    /// Open the channel and enter the default session.
    pub fn connect(&mut self) -> bool {
        self.bus.connect();
        self.session = SessionState::Active(SessionType::Default);
        self.session_deadline = None;
        self.security_level = None;
        info!("UDS session established ({:?} -> {:?})", self.tx_id, self.rx_id);
        true
    }

    pub fn disconnect(&mut self) -> bool {
        self.session = SessionState::Disconnected;
        self.session_deadline = None;
        self.security_level = None;
        info!("UDS session closed ({:?})", self.tx_id);
        self.bus.disconnect()
    }

    /// Current protocol state, after applying keep-alive expiry: a non-default
    /// session with no TesterPresent inside the timeout window has been dropped by
    /// the ECU, so the tracked state reverts to default.
    pub fn session(&mut self) -> SessionState {
        if let Some(deadline) = self.session_deadline {
            if Instant::now() >= deadline {
                warn!("session keep-alive window expired, reverting to default session");
                self.session = SessionState::Active(SessionType::Default);
                self.session_deadline = None;
                self.security_level = None;
            }
        }
        self.session
    }

    pub fn security_level(&self) -> Option<u8> {
        self.security_level
    }

    /// Snapshot of the underlying bus counters.
    pub fn statistics(&self) -> BusStatistics {
        self.bus.statistics()
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        self.bus.adapter_mut()
    }

    fn arm_session_deadline(&mut self) {
        if matches!(self.session, SessionState::Active(s) if s != SessionType::Default) {
            self.session_deadline = Some(Instant::now() + self.session_timeout);
        }
    }

    /// Helper function to make custom UDS requests. Sends one request and waits for
    /// exactly one matching response or the response timeout. Verifies the service
    /// identifier and sub function echo, handles negative responses, and returns the
    /// response data.
    pub async fn request(
        &mut self,
        sid: u8,
        sub_function: Option<u8>,
        data: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        if self.session() == SessionState::Disconnected {
            return Err(crate::Error::NotConnected);
        }

        let mut request: Vec<u8> = vec![sid];
        if let Some(sub_function) = sub_function {
            request.push(sub_function);
        }
        if let Some(data) = data {
            request.extend(data);
        }

        debug!("TX {}", hex::encode(&request));
        for payload in segment(&request, &self.segment_config)? {
            let frame = CanFrame::new(self.tx_id, &payload)?;
            self.bus.send_frame(&frame)?;
        }

        let response = self.recv_response().await?;

        // Check service id
        let Some(&response_sid) = response.first() else {
            return Err(Error::InvalidResponseLength.into());
        };
        if response_sid != sid | POSITIVE_RESPONSE {
            return Err(Error::InvalidServiceId(response_sid).into());
        }

        // Check sub function
        if let Some(sub_function) = sub_function {
            if response.len() < 2 {
                return Err(Error::InvalidResponseLength.into());
            }
            if response[1] != sub_function {
                return Err(Error::InvalidSubFunction(response[1]).into());
            }
        }

        let start: usize = if sub_function.is_some() { 2 } else { 1 };
        Ok(response[start..].to_vec())
    }

    /// Wait for one reassembled response message, skipping ResponsePending replies.
    async fn recv_response(&mut self) -> Result<Vec<u8>> {
        let mut reassembler = Reassembler::new();
        let mut deadline = Instant::now() + self.response_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                if reassembler.in_progress() {
                    return Err(reassembler.incomplete().into());
                }
                return Err(crate::Error::Timeout);
            }

            let frames = self.bus.receive(deadline - now).await;
            if frames.is_empty() {
                continue;
            }

            for frame in frames {
                if frame.id != self.rx_id {
                    continue;
                }

                let Some(message) = reassembler.absorb(&frame.data)? else {
                    continue;
                };
                debug!("RX {}", hex::encode(&message));

                if message.len() >= 3 && message[0] == NEGATIVE_RESPONSE {
                    let code: NegativeResponseCode = message[2].into();
                    if code == NegativeResponseCode::RequestCorrectlyReceivedResponsePending {
                        info!("Received Response Pending");
                        deadline = Instant::now() + self.response_timeout;
                        continue;
                    }
                    return Err(Error::NegativeResponse(code).into());
                }

                return Ok(message);
            }
        }
    }

    /// 0x10 - Diagnostic Session Control. On a positive response the tracked session
    /// switches to `target` and, for non-default sessions, the keep-alive window is
    /// armed. On a negative response or timeout the state is left unchanged and the
    /// call fails with [`Error::SessionControlRejected`] / [`crate::Error::Timeout`].
    /// The ECU may optionally return 4 bytes of sessionParameterRecord with timing
    /// information.
    pub async fn session_control(
        &mut self,
        target: SessionType,
    ) -> Result<Option<SessionParameterRecord>> {
        let result = self
            .request(
                ServiceIdentifier::DiagnosticSessionControl as u8,
                Some(target as u8),
                None,
            )
            .await
            .map_err(|e| match e {
                crate::Error::Uds(Error::NegativeResponse(code)) => {
                    crate::Error::Uds(Error::SessionControlRejected(code))
                }
                e => e,
            })?;

        self.session = SessionState::Active(target);
        self.session_deadline = None;
        self.arm_session_deadline();
        info!("Changed to session: {:?}", target);

        let record = if result.len() == 4 {
            let p2_server_max = u16::from_be_bytes([result[0], result[1]]);
            let p2_star_server_max = u16::from_be_bytes([result[2], result[3]]);
            Some(SessionParameterRecord {
                p2_server_max: Duration::from_millis(p2_server_max as u64),
                p2_star_server_max: Duration::from_millis(p2_star_server_max as u64 * 10),
            })
        } else {
            None
        };

        Ok(record)
    }

    /// 0x19 - Read DTC Information, reportDTCByStatusMask. Returns the reported set
    /// with duplicates (by code) removed. Zero DTCs is a successful empty set.
    pub async fn read_dtc(&mut self, status_mask: u8) -> Result<Vec<DtcRecord>> {
        let resp = self
            .request(
                ServiceIdentifier::ReadDTCInformation as u8,
                Some(ReportType::ReportDTCByStatusMask as u8),
                Some(&[status_mask]),
            )
            .await?;

        // availability mask followed by 4-byte DTC records
        if resp.is_empty() || (resp.len() - 1) % 4 != 0 {
            return Err(Error::InvalidResponseLength.into());
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut dtcs = Vec::new();
        for group in resp[1..].chunks_exact(4) {
            let record = DtcRecord::from_bytes([group[0], group[1], group[2]], group[3]);
            if seen.insert(record.code.clone()) {
                dtcs.push(record);
            }
        }

        info!("Read {} DTCs", dtcs.len());
        Ok(dtcs)
    }

    /// 0x14 - Clear Diagnostic Information for all DTC groups.
    pub async fn clear_dtc(&mut self) -> Result<()> {
        self.request(
            ServiceIdentifier::ClearDiagnosticInformation as u8,
            None,
            Some(&CLEAR_ALL_DTC_GROUPS),
        )
        .await?;
        info!("Cleared DTCs");
        Ok(())
    }

    /// 0x22 - Read Data By Identifier for one or more 16 bit identifiers. An
    /// identifier the ECU omits from the response is simply absent from the result
    /// map; partial success is not an error. The record packing of multi-identifier
    /// responses is vendor specific, see [`DidLayout`].
    pub async fn read_data_by_identifier(&mut self, ids: &[u16]) -> Result<HashMap<u16, Vec<u8>>> {
        let mut data = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            data.extend(id.to_be_bytes());
        }

        let resp = self
            .request(ServiceIdentifier::ReadDataByIdentifier as u8, None, Some(&data))
            .await?;

        let mut results = HashMap::new();
        let mut rest = &resp[..];
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(Error::InvalidResponseLength.into());
            }
            let did = u16::from_be_bytes([rest[0], rest[1]]);
            if !ids.contains(&did) {
                return Err(Error::InvalidDataIdentifier(did).into());
            }

            let (value, consumed) = match self.did_layout {
                DidLayout::Interleaved => {
                    if rest.len() < 3 {
                        return Err(Error::InvalidResponseLength.into());
                    }
                    let len = rest[2] as usize;
                    if rest.len() < 3 + len {
                        return Err(Error::InvalidResponseLength.into());
                    }
                    (rest[3..3 + len].to_vec(), 3 + len)
                }
                DidLayout::FixedWidth(width) => {
                    if rest.len() < 2 + width {
                        return Err(Error::InvalidResponseLength.into());
                    }
                    (rest[2..2 + width].to_vec(), 2 + width)
                }
            };

            results.insert(did, value);
            rest = &rest[consumed..];
        }

        Ok(results)
    }

    /// 0x3E - Tester Present. Keeps a non-default session alive; callers must invoke
    /// this at an interval strictly shorter than the session timeout (half of it is a
    /// safe choice). This client does not schedule it automatically.
    pub async fn tester_present(&mut self, sub_function: u8) -> Result<()> {
        self.request(ServiceIdentifier::TesterPresent as u8, Some(sub_function), None)
            .await?;
        self.arm_session_deadline();
        debug!("Tester present acknowledged");
        Ok(())
    }

    /// 0x27 - Security Access. Odd `access_type` values request a seed, even values
    /// send a key. The `data` parameter is required when sending a key.
    pub async fn security_access(&mut self, access_type: u8, data: Option<&[u8]>) -> Result<Vec<u8>> {
        let send_key = access_type % 2 == 0;
        if send_key {
            assert!(data.is_some(), "Missing data parameter when sending key");
        }

        self.request(ServiceIdentifier::SecurityAccess as u8, Some(access_type), data)
            .await
    }

    /// Full seed/key handshake for one security level (an odd RequestSeed
    /// sub-function). The key computation is OEM specific and supplied through the
    /// [`SeedKeyAlgorithm`] seam. An all-zero seed means the level is already
    /// unlocked.
    pub async fn unlock(&mut self, level: u8, algorithm: &dyn SeedKeyAlgorithm) -> Result<()> {
        assert!(level % 2 == 1, "Seed requests use odd access types");

        let seed = self.security_access(level, None).await?;
        if seed.iter().all(|&b| b == 0) {
            self.security_level = Some(level);
            return Ok(());
        }

        let key = algorithm.compute_key(&seed);
        self.security_access(level + 1, Some(&key)).await?;
        self.security_level = Some(level);
        info!("Security level 0x{:02x} unlocked", level);
        Ok(())
    }

    /// Convenience wrapper reading the VIN (DID 0xF190). Decodes the record as
    /// ASCII, ignoring undecodable bytes, and returns `None` if the ECU omitted the
    /// identifier.
    pub async fn get_vehicle_identification(&mut self) -> Result<Option<String>> {
        let did = DataIdentifier::Vin as u16;
        let mut result = self.read_data_by_identifier(&[did]).await?;

        Ok(result.remove(&did).map(|bytes| {
            bytes
                .iter()
                .filter(|b| b.is_ascii() && !b.is_ascii_control())
                .map(|&b| b as char)
                .collect()
        }))
    }
}
