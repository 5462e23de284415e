//! UDS (ISO 14229) service identifiers and diagnostic addressing

use std::fmt;

mod dtc;

pub use dtc::{parse_display_code, to_code_string, DtcCategory};

/// UDS service identifiers used by the classifier
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFORMATION: u8 = 0x14;
    pub const READ_DTC_INFORMATION: u8 = 0x19;
    pub const READ_DATA_BY_IDENTIFIER: u8 = 0x22;
    pub const READ_MEMORY_BY_ADDRESS: u8 = 0x23;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const COMMUNICATION_CONTROL: u8 = 0x28;
    pub const WRITE_DATA_BY_IDENTIFIER: u8 = 0x2E;
    pub const INPUT_OUTPUT_CONTROL_BY_IDENTIFIER: u8 = 0x2F;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const REQUEST_UPLOAD: u8 = 0x35;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const CONTROL_DTC_SETTING: u8 = 0x85;
}

/// UDS service named by its request SID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UdsService {
    DiagnosticSessionControl,
    EcuReset,
    ClearDiagnosticInformation,
    ReadDtcInformation,
    ReadDataByIdentifier,
    ReadMemoryByAddress,
    SecurityAccess,
    CommunicationControl,
    WriteDataByIdentifier,
    InputOutputControlByIdentifier,
    RoutineControl,
    RequestDownload,
    RequestUpload,
    TransferData,
    RequestTransferExit,
    TesterPresent,
    ControlDtcSetting,
    /// Any other SID, including positive responses
    Unknown(u8),
}

impl From<u8> for UdsService {
    fn from(value: u8) -> Self {
        use service_id::*;
        match value {
            DIAGNOSTIC_SESSION_CONTROL => Self::DiagnosticSessionControl,
            ECU_RESET => Self::EcuReset,
            CLEAR_DIAGNOSTIC_INFORMATION => Self::ClearDiagnosticInformation,
            READ_DTC_INFORMATION => Self::ReadDtcInformation,
            READ_DATA_BY_IDENTIFIER => Self::ReadDataByIdentifier,
            READ_MEMORY_BY_ADDRESS => Self::ReadMemoryByAddress,
            SECURITY_ACCESS => Self::SecurityAccess,
            COMMUNICATION_CONTROL => Self::CommunicationControl,
            WRITE_DATA_BY_IDENTIFIER => Self::WriteDataByIdentifier,
            INPUT_OUTPUT_CONTROL_BY_IDENTIFIER => Self::InputOutputControlByIdentifier,
            ROUTINE_CONTROL => Self::RoutineControl,
            REQUEST_DOWNLOAD => Self::RequestDownload,
            REQUEST_UPLOAD => Self::RequestUpload,
            TRANSFER_DATA => Self::TransferData,
            REQUEST_TRANSFER_EXIT => Self::RequestTransferExit,
            TESTER_PRESENT => Self::TesterPresent,
            CONTROL_DTC_SETTING => Self::ControlDtcSetting,
            other => Self::Unknown(other),
        }
    }
}

impl From<UdsService> for u8 {
    fn from(service: UdsService) -> Self {
        use service_id::*;
        match service {
            UdsService::DiagnosticSessionControl => DIAGNOSTIC_SESSION_CONTROL,
            UdsService::EcuReset => ECU_RESET,
            UdsService::ClearDiagnosticInformation => CLEAR_DIAGNOSTIC_INFORMATION,
            UdsService::ReadDtcInformation => READ_DTC_INFORMATION,
            UdsService::ReadDataByIdentifier => READ_DATA_BY_IDENTIFIER,
            UdsService::ReadMemoryByAddress => READ_MEMORY_BY_ADDRESS,
            UdsService::SecurityAccess => SECURITY_ACCESS,
            UdsService::CommunicationControl => COMMUNICATION_CONTROL,
            UdsService::WriteDataByIdentifier => WRITE_DATA_BY_IDENTIFIER,
            UdsService::InputOutputControlByIdentifier => INPUT_OUTPUT_CONTROL_BY_IDENTIFIER,
            UdsService::RoutineControl => ROUTINE_CONTROL,
            UdsService::RequestDownload => REQUEST_DOWNLOAD,
            UdsService::RequestUpload => REQUEST_UPLOAD,
            UdsService::TransferData => TRANSFER_DATA,
            UdsService::RequestTransferExit => REQUEST_TRANSFER_EXIT,
            UdsService::TesterPresent => TESTER_PRESENT,
            UdsService::ControlDtcSetting => CONTROL_DTC_SETTING,
            UdsService::Unknown(v) => v,
        }
    }
}

impl UdsService {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DiagnosticSessionControl => "DiagnosticSessionControl",
            Self::EcuReset => "ECUReset",
            Self::ClearDiagnosticInformation => "ClearDiagnosticInformation",
            Self::ReadDtcInformation => "ReadDTCInformation",
            Self::ReadDataByIdentifier => "ReadDataByIdentifier",
            Self::ReadMemoryByAddress => "ReadMemoryByAddress",
            Self::SecurityAccess => "SecurityAccess",
            Self::CommunicationControl => "CommunicationControl",
            Self::WriteDataByIdentifier => "WriteDataByIdentifier",
            Self::InputOutputControlByIdentifier => "InputOutputControlByIdentifier",
            Self::RoutineControl => "RoutineControl",
            Self::RequestDownload => "RequestDownload",
            Self::RequestUpload => "RequestUpload",
            Self::TransferData => "TransferData",
            Self::RequestTransferExit => "RequestTransferExit",
            Self::TesterPresent => "TesterPresent",
            Self::ControlDtcSetting => "ControlDTCSetting",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for UdsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(v) => write!(f, "Unknown(0x{:02X})", v),
            other => f.write_str(other.name()),
        }
    }
}

/// Manufacturer DID ranges, checked in order (first match wins)
pub const MANUFACTURER_DID_RANGES: &[(&str, u32, u32)] = &[
    ("General/VW", 0xF100, 0xF1FF),
    ("BMW", 0xF000, 0xF0FF),
    ("Mercedes", 0xF200, 0xF2FF),
    ("Toyota", 0xF400, 0xF4FF),
    ("Ford", 0xF500, 0xF5FF),
    ("GM", 0xF600, 0xF6FF),
    ("Hyundai", 0xF700, 0xF7FF),
];

/// Manufacturer whose DID range contains `value`
pub fn manufacturer_for_did(value: u32) -> Option<&'static str> {
    MANUFACTURER_DID_RANGES
        .iter()
        .find(|(_, lo, hi)| (*lo..=*hi).contains(&value))
        .map(|(name, _, _)| *name)
}

/// Standard 11-bit OBD/UDS request and response IDs
const STANDARD_DIAGNOSTIC_IDS: [u32; 8] = [0x7DF, 0x7E0, 0x7E1, 0x7E2, 0x7E3, 0x7E4, 0x7E5, 0x7E8];

/// Second byte of 29-bit diagnostic IDs (e.g. 0x18DAxxxx, 0x1Cxx....)
const EXTENDED_DIAGNOSTIC_PREFIXES: [u32; 3] = [0x18, 0x1A, 0x1C];

/// Whether `id` is a conventional diagnostic arbitration ID
pub fn is_diagnostic_id(id: u32) -> bool {
    STANDARD_DIAGNOSTIC_IDS.contains(&id)
        || EXTENDED_DIAGNOSTIC_PREFIXES.contains(&((id >> 8) & 0xFF))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_roundtrip_and_names() {
        assert_eq!(UdsService::from(0x22), UdsService::ReadDataByIdentifier);
        assert_eq!(u8::from(UdsService::SecurityAccess), 0x27);
        assert_eq!(UdsService::from(0x62), UdsService::Unknown(0x62));
        assert_eq!(UdsService::from(0x19).to_string(), "ReadDTCInformation");
        assert_eq!(UdsService::Unknown(0x62).to_string(), "Unknown(0x62)");
    }

    #[test]
    fn test_manufacturer_ranges() {
        assert_eq!(manufacturer_for_did(0xF190), Some("General/VW"));
        assert_eq!(manufacturer_for_did(0xF0A0), Some("BMW"));
        assert_eq!(manufacturer_for_did(0xF7FF), Some("Hyundai"));
        assert_eq!(manufacturer_for_did(0xF300), None);
        assert_eq!(manufacturer_for_did(0x1234), None);
    }

    #[test]
    fn test_is_diagnostic_id() {
        assert!(is_diagnostic_id(0x7DF));
        assert!(is_diagnostic_id(0x7E3));
        assert!(is_diagnostic_id(0x7E8));
        assert!(!is_diagnostic_id(0x7E9));
        assert!(!is_diagnostic_id(0x123));
        assert!(is_diagnostic_id(0x18DA_1AF1));
        assert!(is_diagnostic_id(0x1C10));
    }
}
