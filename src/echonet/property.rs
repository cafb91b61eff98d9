use std::fmt;

use thiserror::Error;

use super::Eoj;

pub const EPC_REMAINING_RATIO: u8 = 0xE4;
pub const EPC_OPERATION_MODE: u8 = 0xDA;
pub const EPC_CHARGE_POWER_SETPOINT: u8 = 0xEB;
pub const EPC_CHARGE_DISCHARGE_POWER: u8 = 0xD3;
pub const EPC_AC_CAPACITY: u8 = 0xA0;
pub const EPC_PV_OUTPUT: u8 = 0xE0;
pub const EPC_GRID_POWER: u8 = 0xC6;
pub const EPC_PCS_POWER: u8 = 0xE7;

/// Battery operation mode byte (EPC 0xDA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    /// 0x42: charge at the configured set-point.
    Charge,
    /// 0x46: vendor self-consumption mode.
    Auto,
    /// Any other byte the device reports.
    Other(u8),
}

impl From<u8> for OperationMode {
    fn from(b: u8) -> Self {
        match b {
            0x42 => OperationMode::Charge,
            0x46 => OperationMode::Auto,
            other => OperationMode::Other(other),
        }
    }
}

impl OperationMode {
    pub fn byte(self) -> u8 {
        match self {
            OperationMode::Charge => 0x42,
            OperationMode::Auto => 0x46,
            OperationMode::Other(b) => b,
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationMode::Charge => write!(f, "charge"),
            OperationMode::Auto => write!(f, "auto"),
            OperationMode::Other(b) => write!(f, "0x{b:02X}"),
        }
    }
}

/// A decoded property value. The registry fixes the tag per (class, EPC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
}

impl PropertyValue {
    pub fn as_u8(self) -> Option<u8> {
        match self {
            PropertyValue::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16(self) -> Option<u16> {
        match self {
            PropertyValue::U16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(self) -> Option<u32> {
        match self {
            PropertyValue::U32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(self) -> Option<i32> {
        match self {
            PropertyValue::I32(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::U8(v) => write!(f, "{v}"),
            PropertyValue::U16(v) => write!(f, "{v}"),
            PropertyValue::U32(v) => write!(f, "{v}"),
            PropertyValue::I32(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("{label} (EPC 0x{epc:02X}) expects {expected} data bytes, got {actual}")]
    LengthMismatch {
        epc: u8,
        label: &'static str,
        expected: u8,
        actual: usize,
        raw: Vec<u8>,
    },

    #[error("no decoder for object {eoj}, EPC 0x{epc:02X}")]
    Unknown { eoj: Eoj, epc: u8, raw: Vec<u8> },
}

enum Kind {
    U8,
    U16Be,
    U32Be,
    I32Be,
}

struct Entry {
    label: &'static str,
    expected: u8,
    kind: Kind,
}

/// Registry of the (class-group 0x02) properties this controller understands.
fn lookup(eoj: Eoj, epc: u8) -> Option<Entry> {
    let entry = |label, expected, kind| Some(Entry { label, expected, kind });
    match (eoj.class_group, eoj.class, epc) {
        // storage battery
        (0x02, 0x7D, EPC_REMAINING_RATIO) => entry("remaining charge ratio", 1, Kind::U8),
        (0x02, 0x7D, EPC_OPERATION_MODE) => entry("operation mode", 1, Kind::U8),
        (0x02, 0x7D, EPC_CHARGE_POWER_SETPOINT) => {
            entry("charging power set-point", 4, Kind::U32Be)
        }
        (0x02, 0x7D, EPC_CHARGE_DISCHARGE_POWER) => {
            entry("instantaneous charge/discharge power", 4, Kind::I32Be)
        }
        (0x02, 0x7D, EPC_AC_CAPACITY) => entry("AC effective capacity", 4, Kind::U32Be),
        // residential solar PV
        (0x02, 0x79, EPC_PV_OUTPUT) => entry("instantaneous PV output", 2, Kind::U16Be),
        // distribution board metering
        (0x02, 0x87, EPC_GRID_POWER) => entry("instantaneous grid power", 4, Kind::I32Be),
        // multi-input PCS
        (0x02, 0xA5, EPC_PCS_POWER) => entry("instantaneous PCS power", 4, Kind::I32Be),
        _ => None,
    }
}

/// Label for a property, also usable when no data came back (PDC 0).
pub fn label(eoj: Eoj, epc: u8) -> String {
    match lookup(eoj, epc) {
        Some(entry) => entry.label.to_owned(),
        None => format!("unknown property (object {eoj}, EPC {epc:02X})"),
    }
}

/// Decode a property's EDT per the registry.
pub fn decode(eoj: Eoj, epc: u8, edt: &[u8]) -> Result<(&'static str, PropertyValue), PropertyError> {
    let Some(entry) = lookup(eoj, epc) else {
        return Err(PropertyError::Unknown {
            eoj,
            epc,
            raw: edt.to_vec(),
        });
    };
    if edt.len() != entry.expected as usize {
        return Err(PropertyError::LengthMismatch {
            epc,
            label: entry.label,
            expected: entry.expected,
            actual: edt.len(),
            raw: edt.to_vec(),
        });
    }
    let value = match entry.kind {
        Kind::U8 => PropertyValue::U8(edt[0]),
        Kind::U16Be => PropertyValue::U16(u16::from_be_bytes([edt[0], edt[1]])),
        Kind::U32Be => PropertyValue::U32(u32::from_be_bytes([edt[0], edt[1], edt[2], edt[3]])),
        Kind::I32Be => PropertyValue::I32(i32::from_be_bytes([edt[0], edt[1], edt[2], edt[3]])),
    };
    Ok((entry.label, value))
}
