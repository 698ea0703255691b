//! In-memory simulated ECU. Implements [`BusAdapter`] so the whole engine can be
//! exercised without a physical CAN channel, and serves as the reference peer for the
//! protocol tests. Speaks real ISO-TP in both directions by reusing the crate's
//! segmentation layer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::can::{BusAdapter, CanFrame, Identifier};
use crate::isotp::{segment, Reassembler, SegmentConfig};
use crate::uds::constants::{
    DataIdentifier, ReportType, ServiceIdentifier, SessionType, NEGATIVE_RESPONSE,
    POSITIVE_RESPONSE,
};
use crate::uds::{parse_dtc_code, NegativeResponseCode};

const SIM_SEED: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

/// A simulated ECU on the other end of the bus.
///
/// Requests are reassembled, answered according to the configured DTC set, DID map
/// and session rules, and the response frames become available after
/// `response_delay`. Fault injection knobs cover the failure paths the engine has to
/// survive: dropped responses (timeouts), reordered consecutive frames (segmentation
/// errors), truncated multi-frame transfers (incomplete messages) and transmit
/// failures (bus faults).
pub struct SimEcu {
    pub dtcs: Vec<(String, u8)>,
    pub did_values: HashMap<u16, Vec<u8>>,
    pub rejected_sessions: HashSet<SessionType>,
    /// Key expected by SecurityAccess is the seed XORed with this byte.
    pub key_xor: u8,
    pub response_delay: Duration,
    pub drop_responses: bool,
    pub swap_consecutive_frames: bool,
    /// Deliver only the first frame and one consecutive frame of a multi-frame
    /// response, leaving the transfer unfinished.
    pub drop_tail_consecutive_frames: bool,
    pub fail_transmit: bool,
    /// Pack ReadDataByIdentifier responses as fixed-width records of this many data
    /// bytes instead of the interleaved did/len/data layout.
    pub fixed_width_records: Option<usize>,

    session: SessionType,
    unlocked: bool,
    reassembler: Reassembler,
    pending: VecDeque<(Instant, CanFrame)>,
    segment_config: SegmentConfig,
}

impl Default for SimEcu {
    fn default() -> Self {
        let mut did_values = HashMap::new();
        did_values.insert(
            DataIdentifier::Vin as u16,
            b"WVW123456789ABCDE".to_vec(),
        );

        Self {
            dtcs: vec![("P0101".into(), 0x2f), ("P0102".into(), 0x2f)],
            did_values,
            rejected_sessions: HashSet::new(),
            key_xor: 0xff,
            response_delay: Duration::ZERO,
            drop_responses: false,
            swap_consecutive_frames: false,
            drop_tail_consecutive_frames: false,
            fail_transmit: false,
            fixed_width_records: None,
            session: SessionType::Default,
            unlocked: false,
            reassembler: Reassembler::new(),
            pending: VecDeque::new(),
            segment_config: SegmentConfig::default(),
        }
    }
}

impl SimEcu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vin(mut self, vin: &str) -> Self {
        self.did_values
            .insert(DataIdentifier::Vin as u16, vin.as_bytes().to_vec());
        self
    }

    pub fn with_dtcs(mut self, codes: &[(&str, u8)]) -> Self {
        self.dtcs = codes.iter().map(|(c, s)| (c.to_string(), *s)).collect();
        self
    }

    pub fn with_did(mut self, did: u16, value: &[u8]) -> Self {
        self.did_values.insert(did, value.to_vec());
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn reject_session(mut self, session: SessionType) -> Self {
        self.rejected_sessions.insert(session);
        self
    }

    pub fn session(&self) -> SessionType {
        self.session
    }

    fn negative(&self, sid: u8, code: NegativeResponseCode) -> Vec<u8> {
        vec![NEGATIVE_RESPONSE, sid, code.into()]
    }

    fn handle_request(&mut self, request: &[u8]) -> Vec<u8> {
        let Some(&sid) = request.first() else {
            return self.negative(0x00, NegativeResponseCode::GeneralReject);
        };

        match sid {
            x if x == ServiceIdentifier::DiagnosticSessionControl as u8 => {
                let Some(target) = request
                    .get(1)
                    .and_then(|&b| SessionType::from_repr(b))
                else {
                    return self.negative(sid, NegativeResponseCode::SubFunctionNotSupported);
                };

                if self.rejected_sessions.contains(&target) {
                    return self.negative(sid, NegativeResponseCode::ConditionsNotCorrect);
                }

                self.session = target;
                // sessionParameterRecord: p2 = 50ms, p2* = 5000ms
                vec![sid | POSITIVE_RESPONSE, target as u8, 0x00, 0x32, 0x01, 0xf4]
            }
            x if x == ServiceIdentifier::TesterPresent as u8 => {
                let sub = request.get(1).copied().unwrap_or(0);
                vec![sid | POSITIVE_RESPONSE, sub]
            }
            x if x == ServiceIdentifier::ReadDTCInformation as u8 => {
                if request.len() < 3 || request[1] != ReportType::ReportDTCByStatusMask as u8 {
                    return self.negative(sid, NegativeResponseCode::SubFunctionNotSupported);
                }
                let mask = request[2];

                let mut resp = vec![sid | POSITIVE_RESPONSE, request[1], 0xff];
                for (code, status) in &self.dtcs {
                    if status & mask == 0 {
                        continue;
                    }
                    if let Some(bytes) = parse_dtc_code(code) {
                        resp.extend(bytes);
                        resp.push(*status);
                    }
                }
                resp
            }
            x if x == ServiceIdentifier::ClearDiagnosticInformation as u8 => {
                if request.len() != 4 {
                    return self.negative(
                        sid,
                        NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
                    );
                }
                self.dtcs.clear();
                vec![sid | POSITIVE_RESPONSE]
            }
            x if x == ServiceIdentifier::ReadDataByIdentifier as u8 => {
                let mut resp = vec![sid | POSITIVE_RESPONSE];
                let mut any = false;
                for did_bytes in request[1..].chunks_exact(2) {
                    let did = u16::from_be_bytes([did_bytes[0], did_bytes[1]]);
                    if let Some(value) = self.did_values.get(&did) {
                        resp.extend(did.to_be_bytes());
                        match self.fixed_width_records {
                            Some(width) => {
                                let mut record = value.clone();
                                record.resize(width, 0x00);
                                resp.extend(record);
                            }
                            None => {
                                // Interleaved record layout: did(2) len(1) data
                                resp.push(value.len() as u8);
                                resp.extend(value);
                            }
                        }
                        any = true;
                    }
                }
                if !any {
                    return self.negative(sid, NegativeResponseCode::RequestOutOfRange);
                }
                resp
            }
            x if x == ServiceIdentifier::SecurityAccess as u8 => {
                let Some(&access_type) = request.get(1) else {
                    return self.negative(sid, NegativeResponseCode::SubFunctionNotSupported);
                };

                if access_type % 2 == 1 {
                    // Seed request; all zeros once unlocked
                    let seed = if self.unlocked { [0u8; 4] } else { SIM_SEED };
                    let mut resp = vec![sid | POSITIVE_RESPONSE, access_type];
                    resp.extend(seed);
                    resp
                } else {
                    let expected: Vec<u8> = SIM_SEED.iter().map(|b| b ^ self.key_xor).collect();
                    if request[2..] == expected[..] {
                        self.unlocked = true;
                        vec![sid | POSITIVE_RESPONSE, access_type]
                    } else {
                        self.negative(sid, NegativeResponseCode::InvalidKey)
                    }
                }
            }
            _ => self.negative(sid, NegativeResponseCode::ServiceNotSupported),
        }
    }

    fn enqueue_response(&mut self, request_id: Identifier, message: &[u8]) {
        if self.drop_responses {
            debug!("sim: dropping response {}", hex::encode(message));
            return;
        }

        let response_id = Identifier::from(u32::from(request_id) + 8);
        let mut payloads = match segment(message, &self.segment_config) {
            Ok(payloads) => payloads,
            Err(_) => return,
        };

        if self.swap_consecutive_frames && payloads.len() > 2 {
            payloads.swap(1, 2);
        }
        if self.drop_tail_consecutive_frames && payloads.len() > 2 {
            payloads.truncate(2);
        }

        let due = Instant::now() + self.response_delay;
        for payload in payloads {
            if let Ok(frame) = CanFrame::new(response_id, &payload) {
                self.pending.push_back((due, frame));
            }
        }
    }
}

impl BusAdapter for SimEcu {
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), crate::error::Error> {
        if self.fail_transmit {
            return Err(crate::error::Error::Transport("simulated bus fault".into()));
        }

        let message = match self.reassembler.absorb(&frame.data) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(_) => {
                // A real ECU silently drops a broken transfer
                self.reassembler = Reassembler::new();
                return Ok(());
            }
        };

        debug!("sim: request {}", hex::encode(&message));
        let response = self.handle_request(&message);
        self.enqueue_response(frame.id, &response);
        Ok(())
    }

    fn poll(&mut self) -> Vec<CanFrame> {
        let now = Instant::now();
        let mut frames = Vec::new();
        while let Some((due, _)) = self.pending.front() {
            if *due > now {
                break;
            }
            let (_, frame) = self.pending.pop_front().unwrap();
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responds_to_tester_present() {
        let mut sim = SimEcu::default();
        let frame = CanFrame::new(Identifier::Standard(0x7e0), &[0x02, 0x3e, 0x00]).unwrap();
        sim.transmit(&frame).unwrap();

        let frames = sim.poll();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, Identifier::Standard(0x7e8));
        assert_eq!(&frames[0].data[..3], &[0x02, 0x7e, 0x00]);
    }

    #[test]
    fn unknown_service_gets_negative_response() {
        let mut sim = SimEcu::default();
        let frame = CanFrame::new(Identifier::Standard(0x7e0), &[0x01, 0x11]).unwrap();
        sim.transmit(&frame).unwrap();

        let frames = sim.poll();
        assert_eq!(&frames[0].data[..4], &[0x03, 0x7f, 0x11, 0x11]);
    }

    #[test]
    fn delayed_response_not_visible_early() {
        let mut sim = SimEcu::default().with_response_delay(Duration::from_millis(50));
        let frame = CanFrame::new(Identifier::Standard(0x7e0), &[0x02, 0x3e, 0x00]).unwrap();
        sim.transmit(&frame).unwrap();

        assert!(sim.poll().is_empty());
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(sim.poll().len(), 1);
    }
}
