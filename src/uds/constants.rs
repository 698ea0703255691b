//! Constants for the UDS Session Client.
use strum_macros::FromRepr;

pub const POSITIVE_RESPONSE: u8 = 0x40;
pub const NEGATIVE_RESPONSE: u8 = 0x7f;

/// The "clear all groups" argument for ClearDiagnosticInformation (0x14).
pub const CLEAR_ALL_DTC_GROUPS: [u8; 3] = [0xff, 0xff, 0xff];

/// Service Identifiers (SIDs) as defined in ISO 14229
#[derive(Debug, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum ServiceIdentifier {
    // Diagnostic and Communication Management
    DiagnosticSessionControl = 0x10,
    SecurityAccess = 0x27,
    TesterPresent = 0x3e,

    // Data Transmission
    ReadDataByIdentifier = 0x22,

    // Stored Data Transmission
    ClearDiagnosticInformation = 0x14,
    ReadDTCInformation = 0x19,

    NegativeResponse = 0x7f,
}

/// Diagnostic Session Type Sub-Function ID as defined in ISO 14229
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, FromRepr)]
#[derive(serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum SessionType {
    Default = 0x01,
    Programming = 0x02,
    Extended = 0x03,
    SafetySystem = 0x04,
}

/// ReadDTCInformation report type Sub-Function ID as defined in ISO 14229
#[derive(Debug, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum ReportType {
    ReportNumberOfDTCByStatusMask = 0x01,
    ReportDTCByStatusMask = 0x02,
}

/// Standard Data Identifiers (DIDs) as defined in ISO 14229
#[derive(Debug, PartialEq, Copy, Clone)]
#[repr(u16)]
pub enum DataIdentifier {
    ActiveDiagnosticSession = 0xf186,
    VehicleManufacturerSparePartNumber = 0xf187,
    VehicleManufacturerEcuSoftwareNumber = 0xf188,
    EcuSerialNumber = 0xf18c,
    Vin = 0xf190,
    SystemNameOrEngineType = 0xf197,
}

/// Security Access Type Sub-Function ID as defined in ISO 14229. Odd values request
/// a seed, the following even value sends the key for that level.
#[derive(Debug, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum SecurityAccessType {
    RequestSeed = 0x01,
    SendKey = 0x02,
}
