//! DTC display codes (P0101, C0420, B1234, U0100)

use std::fmt;

/// DTC category from the top two bits of the DTC high byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtcCategory {
    Powertrain,
    Chassis,
    Body,
    Network,
}

impl DtcCategory {
    pub fn from_dtc_high_byte(high_byte: u8) -> Self {
        match (high_byte >> 6) & 0x03 {
            0 => Self::Powertrain,
            1 => Self::Chassis,
            2 => Self::Body,
            _ => Self::Network,
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix.to_ascii_uppercase() {
            'P' => Some(Self::Powertrain),
            'C' => Some(Self::Chassis),
            'B' => Some(Self::Body),
            'U' => Some(Self::Network),
            _ => None,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            Self::Powertrain => 'P',
            Self::Chassis => 'C',
            Self::Body => 'B',
            Self::Network => 'U',
        }
    }

    fn bits(&self) -> u32 {
        match self {
            Self::Powertrain => 0,
            Self::Chassis => 1,
            Self::Body => 2,
            Self::Network => 3,
        }
    }
}

impl fmt::Display for DtcCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Powertrain => "powertrain",
            Self::Chassis => "chassis",
            Self::Body => "body",
            Self::Network => "network",
        };
        write!(f, "{}", s)
    }
}

/// Format a 16-bit DTC (high and mid byte) as a display code
pub fn to_code_string(dtc: u16) -> String {
    let high = (dtc >> 8) as u8;
    let category = DtcCategory::from_dtc_high_byte(high);
    format!("{}{:04X}", category.prefix(), dtc & 0x3FFF)
}

/// Parse a DTC display code into its numeric value
///
/// Accepts `P0101`-style codes (16-bit result) as well as plain hex with an
/// optional `0x` prefix.
pub fn parse_display_code(code: &str) -> Option<u32> {
    let code = code.trim();
    let mut chars = code.chars();
    let first = chars.next()?;

    if let Some(category) = DtcCategory::from_prefix(first) {
        let digits = chars.as_str();
        if digits.len() == 4 {
            let value = u32::from_str_radix(digits, 16).ok()?;
            if value <= 0x3FFF {
                return Some((category.bits() << 14) | value);
            }
        }
    }

    let hex = code
        .strip_prefix("0x")
        .or_else(|| code.strip_prefix("0X"))
        .unwrap_or(code);
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_string() {
        assert_eq!(to_code_string(0x0101), "P0101");
        assert_eq!(to_code_string(0x4420), "C0420");
        assert_eq!(to_code_string(0x9234), "B1234");
        assert_eq!(to_code_string(0xC100), "U0100");
    }

    #[test]
    fn test_parse_display_code() {
        assert_eq!(parse_display_code("P0101"), Some(0x0101));
        assert_eq!(parse_display_code("u0100"), Some(0xC100));
        assert_eq!(parse_display_code("B1234"), Some(0x9234));
        assert_eq!(parse_display_code("0x0A1B"), Some(0x0A1B));
        assert_eq!(parse_display_code("C10000"), Some(0xC10000));
        assert_eq!(parse_display_code("ZZZ"), None);
    }
}
