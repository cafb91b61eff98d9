use tracing::{debug, warn};

use super::{hex, EchonetError, Eoj, ServiceCode};

pub const EHD1_ECHONET_LITE: u8 = 0x10;
pub const EHD2_FORMAT1: u8 = 0x81;
pub const EHD2_FORMAT2: u8 = 0x82;

/// Header (4) + SEOJ (3) + DEOJ (3) + ESV (1) + OPC (1).
pub const MIN_FRAME_LEN: usize = 12;

/// One property carrier: code, declared data length, data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub epc: u8,
    pub pdc: u8,
    pub edt: Vec<u8>,
}

impl Property {
    /// Carrier for a read request: no data, PDC 0.
    pub fn request(epc: u8) -> Self {
        Property {
            epc,
            pdc: 0,
            edt: Vec::new(),
        }
    }

    pub fn with_edt(epc: u8, edt: Vec<u8>) -> Self {
        Property {
            epc,
            pdc: edt.len() as u8,
            edt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tid: u16,
    pub seoj: Eoj,
    pub deoj: Eoj,
    pub esv: ServiceCode,
    pub opc: u8,
    pub properties: Vec<Property>,
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, EchonetError> {
        if self.opc as usize != self.properties.len() {
            return Err(EchonetError::EncodeCountMismatch {
                opc: self.opc,
                actual: self.properties.len(),
            });
        }

        let body: usize = self.properties.iter().map(|p| 2 + p.edt.len()).sum();
        let mut out = Vec::with_capacity(MIN_FRAME_LEN + body);

        out.push(EHD1_ECHONET_LITE);
        out.push(EHD2_FORMAT1);
        out.extend_from_slice(&self.tid.to_be_bytes());
        out.extend_from_slice(&[
            self.seoj.class_group,
            self.seoj.class,
            self.seoj.instance,
            self.deoj.class_group,
            self.deoj.class,
            self.deoj.instance,
        ]);
        out.push(self.esv.byte());
        out.push(self.opc);

        for (index, prop) in self.properties.iter().enumerate() {
            if prop.pdc as usize != prop.edt.len() {
                return Err(EchonetError::EncodeInvalid {
                    index: index as u8,
                    epc: prop.epc,
                    declared: prop.pdc,
                    actual: prop.edt.len(),
                });
            }
            out.push(prop.epc);
            out.push(prop.pdc);
            out.extend_from_slice(&prop.edt);
        }

        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Frame, EchonetError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(EchonetError::DecodeShort(data.len()));
        }
        if data[0] != EHD1_ECHONET_LITE {
            return Err(EchonetError::DecodeHeader(data[0]));
        }
        if data[1] != EHD2_FORMAT1 {
            warn!(
                ehd2 = %format!("0x{:02X}", data[1]),
                "unsupported frame format, parsing as format 1"
            );
        }

        let tid = u16::from_be_bytes([data[2], data[3]]);
        let seoj = Eoj::new(data[4], data[5], data[6]);
        let deoj = Eoj::new(data[7], data[8], data[9]);
        let esv = ServiceCode::from(data[10]);
        let opc = data[11];

        let mut properties = Vec::with_capacity(opc as usize);
        let mut pos = MIN_FRAME_LEN;
        for index in 0..opc {
            if pos + 2 > data.len() {
                return Err(EchonetError::DecodeTruncated {
                    index,
                    needed: pos + 2 - data.len(),
                });
            }
            let epc = data[pos];
            let pdc = data[pos + 1] as usize;
            pos += 2;
            if pos + pdc > data.len() {
                return Err(EchonetError::DecodeTruncated {
                    index,
                    needed: pos + pdc - data.len(),
                });
            }
            properties.push(Property {
                epc,
                pdc: pdc as u8,
                edt: data[pos..pos + pdc].to_vec(),
            });
            pos += pdc;
        }

        if pos < data.len() {
            debug!(
                trailing = data.len() - pos,
                data = %hex(&data[pos..]),
                "ignoring trailing bytes past declared properties"
            );
        }

        Ok(Frame {
            tid,
            seoj,
            deoj,
            esv,
            opc,
            properties,
        })
    }
}
