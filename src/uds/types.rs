//! Types used in the UDS protocol.

use std::time::Duration;

use crate::uds::constants::SessionType;

/// Protocol state of a [`crate::uds::UdsClient`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Active(SessionType),
}

/// Struct returned by DiagnosticSessionControl (0x10)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SessionParameterRecord {
    /// Performance requirement for the server (i.e. the ECU) to start with the response message after the reception of a request message.
    pub p2_server_max: Duration,
    /// Performance requirement for the server (i.e. the ECU) to start with the response message after the transmission of a "ResponsePending" message.
    pub p2_star_server_max: Duration,
}

/// How a positive ReadDataByIdentifier response packs multiple identifiers. This is
/// ECU/vendor specific, so the decode strategy is configurable on the client.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DidLayout {
    /// `did(2) len(1) data(len)` repeated per identifier.
    Interleaved,
    /// `did(2) data(n)` repeated, with a fixed record width per identifier.
    FixedWidth(usize),
}

/// A single Diagnostic Trouble Code as reported by ReadDTCInformation (0x19).
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DtcRecord {
    /// 5-character SAE code, e.g. "P0101"
    pub code: String,
    /// DTC status byte
    pub status: u8,
    pub description: Option<String>,
}

impl DtcRecord {
    /// Build a record from the 3-byte wire representation. The first two bytes hold
    /// the SAE J2012 code, the third is the failure type byte.
    pub fn from_bytes(bytes: [u8; 3], status: u8) -> Self {
        let code = format_dtc_code(bytes);
        let description = describe_dtc(&code).map(str::to_owned);
        Self {
            code,
            status,
            description,
        }
    }
}

static DTC_LETTERS: [char; 4] = ['P', 'C', 'B', 'U'];

/// Render the 3-byte wire DTC as the familiar 5-character code.
pub fn format_dtc_code(bytes: [u8; 3]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let letter = DTC_LETTERS[(bytes[0] >> 6) as usize];
    format!(
        "{}{}{}{}{}",
        letter,
        (bytes[0] >> 4) & 0x3,
        HEX[(bytes[0] & 0xf) as usize] as char,
        HEX[(bytes[1] >> 4) as usize] as char,
        HEX[(bytes[1] & 0xf) as usize] as char,
    )
}

/// Parse a 5-character code back to its wire bytes. The failure type byte is zero.
pub fn parse_dtc_code(code: &str) -> Option<[u8; 3]> {
    let mut chars = code.chars();
    let letter = chars.next()?;
    let group = DTC_LETTERS.iter().position(|&l| l == letter)? as u8;

    let d1 = chars.next()?.to_digit(4)? as u8;
    let d2 = chars.next()?.to_digit(16)? as u8;
    let d3 = chars.next()?.to_digit(16)? as u8;
    let d4 = chars.next()?.to_digit(16)? as u8;
    if chars.next().is_some() {
        return None;
    }

    Some([(group << 6) | (d1 << 4) | d2, (d3 << 4) | d4, 0x00])
}

/// Human readable text for a handful of common powertrain codes.
pub fn describe_dtc(code: &str) -> Option<&'static str> {
    match code {
        "P0101" => Some("Mass Air Flow (MAF) Sensor Range/Performance"),
        "P0102" => Some("Mass Air Flow (MAF) Sensor Low Input"),
        "P0171" => Some("System Too Lean (Bank 1)"),
        "P0300" => Some("Random/Multiple Cylinder Misfire Detected"),
        "P0420" => Some("Catalyst System Efficiency Below Threshold (Bank 1)"),
        _ => None,
    }
}

/// Seed/key computation for SecurityAccess (0x27). The actual algorithms are OEM
/// specific, so they stay behind this seam.
pub trait SeedKeyAlgorithm: Send + Sync {
    fn compute_key(&self, seed: &[u8]) -> Vec<u8>;
}

/// Trivial XOR-with-constant algorithm, enough for bench testing against the
/// simulated ECU. Not a real OEM algorithm.
pub struct XorSeedKey(pub u8);

impl SeedKeyAlgorithm for XorSeedKey {
    fn compute_key(&self, seed: &[u8]) -> Vec<u8> {
        seed.iter().map(|b| b ^ self.0).collect()
    }
}
