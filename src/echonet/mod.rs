use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub mod client;
pub mod frame;
pub mod property;

/// Well-known ECHONET Lite service port, used on both ends of a transaction.
pub const ECHONET_PORT: u16 = 3610;

/// The controller's own object: management class group, controller class, instance 1.
pub const CONTROLLER_EOJ: Eoj = Eoj::new(0x05, 0xFF, 0x01);

#[derive(Debug, Error)]
pub enum EchonetError {
    #[error("frame is {0} bytes, shorter than the 12-byte minimum")]
    DecodeShort(usize),

    #[error("bad header byte 0x{0:02X}, expected 0x10")]
    DecodeHeader(u8),

    #[error("frame truncated inside property {index}: {needed} more bytes declared than present")]
    DecodeTruncated { index: u8, needed: usize },

    #[error("property {index} (EPC 0x{epc:02X}) declares PDC {declared} but carries {actual} bytes")]
    EncodeInvalid { index: u8, epc: u8, declared: u8, actual: usize },

    #[error("frame declares {opc} properties but carries {actual}")]
    EncodeCountMismatch { opc: u8, actual: usize },

    #[error("UDP port {0} unavailable: {1}")]
    PortUnavailable(u16, std::io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(std::io::Error),
}

/// ECHONET Lite object identifier: class group, class, instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eoj {
    pub class_group: u8,
    pub class: u8,
    pub instance: u8,
}

impl Eoj {
    pub const fn new(class_group: u8, class: u8, instance: u8) -> Self {
        Eoj {
            class_group,
            class,
            instance,
        }
    }
}

impl fmt::Display for Eoj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}{:02X}{:02X}",
            self.class_group, self.class, self.instance
        )
    }
}

/// Service code (ESV) selecting the semantics of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCode {
    /// 0x60 property value write, no response required
    SetI,
    /// 0x61 property value write, response required
    SetC,
    /// 0x62 property value read
    Get,
    /// 0x63 property value notification request
    InfReq,
    /// 0x6E property value write & read
    SetGet,
    /// 0x71 write response
    SetRes,
    /// 0x72 read response
    GetRes,
    /// 0x73 property value notification
    Inf,
    /// 0x74 property value notification, response required
    InfC,
    /// 0x7A notification response
    InfCRes,
    /// 0x7E write & read response
    SetGetRes,
    /// 0x50 error response to SetI
    SetISna,
    /// 0x51 error response to SetC
    SetCSna,
    /// 0x52 error response to Get
    GetSna,
    /// 0x53 error response to INF_REQ
    InfSna,
    /// 0x5E error response to SetGet
    SetGetSna,
    /// Any service code this controller does not recognise.
    Unknown(u8),
}

impl From<u8> for ServiceCode {
    fn from(b: u8) -> Self {
        match b {
            0x60 => ServiceCode::SetI,
            0x61 => ServiceCode::SetC,
            0x62 => ServiceCode::Get,
            0x63 => ServiceCode::InfReq,
            0x6E => ServiceCode::SetGet,
            0x71 => ServiceCode::SetRes,
            0x72 => ServiceCode::GetRes,
            0x73 => ServiceCode::Inf,
            0x74 => ServiceCode::InfC,
            0x7A => ServiceCode::InfCRes,
            0x7E => ServiceCode::SetGetRes,
            0x50 => ServiceCode::SetISna,
            0x51 => ServiceCode::SetCSna,
            0x52 => ServiceCode::GetSna,
            0x53 => ServiceCode::InfSna,
            0x5E => ServiceCode::SetGetSna,
            other => ServiceCode::Unknown(other),
        }
    }
}

impl ServiceCode {
    pub fn byte(self) -> u8 {
        match self {
            ServiceCode::SetI => 0x60,
            ServiceCode::SetC => 0x61,
            ServiceCode::Get => 0x62,
            ServiceCode::InfReq => 0x63,
            ServiceCode::SetGet => 0x6E,
            ServiceCode::SetRes => 0x71,
            ServiceCode::GetRes => 0x72,
            ServiceCode::Inf => 0x73,
            ServiceCode::InfC => 0x74,
            ServiceCode::InfCRes => 0x7A,
            ServiceCode::SetGetRes => 0x7E,
            ServiceCode::SetISna => 0x50,
            ServiceCode::SetCSna => 0x51,
            ServiceCode::GetSna => 0x52,
            ServiceCode::InfSna => 0x53,
            ServiceCode::SetGetSna => 0x5E,
            ServiceCode::Unknown(b) => b,
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
