use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::echonet::client::EchonetClient;
use crate::echonet::frame::{Frame, Property};
use crate::echonet::property::{self, OperationMode, PropertyValue};
use crate::echonet::{hex, Eoj, ServiceCode, CONTROLLER_EOJ};

pub const BATTERY_NAME: &str = "storage battery (027D01)";
pub const SOLAR_NAME: &str = "solar PV (027901)";
pub const METER_NAME: &str = "distribution board meter (028701)";
pub const PCS_NAME: &str = "multi-input PCS (02A501)";

/// One object to poll each cycle, with the properties read from it.
pub struct MonitorTarget {
    pub eoj: Eoj,
    pub epcs: &'static [u8],
    pub name: &'static str,
}

pub fn monitor_targets() -> Vec<MonitorTarget> {
    vec![
        MonitorTarget {
            eoj: Eoj::new(0x02, 0x7D, 0x01),
            epcs: &[
                property::EPC_REMAINING_RATIO,
                property::EPC_OPERATION_MODE,
                property::EPC_CHARGE_POWER_SETPOINT,
                property::EPC_CHARGE_DISCHARGE_POWER,
                property::EPC_AC_CAPACITY,
            ],
            name: BATTERY_NAME,
        },
        MonitorTarget {
            eoj: Eoj::new(0x02, 0x79, 0x01),
            epcs: &[property::EPC_PV_OUTPUT],
            name: SOLAR_NAME,
        },
        MonitorTarget {
            eoj: Eoj::new(0x02, 0x87, 0x01),
            epcs: &[property::EPC_GRID_POWER],
            name: METER_NAME,
        },
        MonitorTarget {
            eoj: Eoj::new(0x02, 0xA5, 0x01),
            epcs: &[property::EPC_PCS_POWER],
            name: PCS_NAME,
        },
    ]
}

/// All values received in one cycle, keyed `"{object name}.{property label}"`.
pub type Snapshot = BTreeMap<String, PropertyValue>;

/// Poll every target once. Failures are per-target and per-property; the
/// snapshot simply ends up without the affected entries.
pub async fn collect(
    client: &mut EchonetClient,
    targets: &[MonitorTarget],
    shutdown: &AtomicBool,
) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for target in targets {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested, stopping collection");
            break;
        }

        let tid = client.next_tid();
        debug!(target = target.name, tid, "reading properties");
        let request = Frame {
            tid,
            seoj: CONTROLLER_EOJ,
            deoj: target.eoj,
            esv: ServiceCode::Get,
            opc: target.epcs.len() as u8,
            properties: target.epcs.iter().map(|&epc| Property::request(epc)).collect(),
        };

        let exchange = match client.transact(&request).await {
            Ok(exchange) => exchange,
            Err(e) => {
                warn!(target = target.name, tid, error = %e, "read failed");
                continue;
            }
        };
        debug!(
            target = target.name,
            tid = exchange.tid,
            peer = %exchange.peer,
            bytes = exchange.payload.len(),
            "response received"
        );

        let response = match Frame::decode(&exchange.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target = target.name, tid, error = %e, "response did not decode");
                continue;
            }
        };

        if response.tid != exchange.tid {
            warn!(
                target = target.name,
                sent = tid,
                received = response.tid,
                "response TID does not match request, processing anyway"
            );
        }

        absorb_response(target, &response, &mut snapshot);
    }
    snapshot
}

/// Fold one decoded response into the snapshot.
fn absorb_response(target: &MonitorTarget, response: &Frame, snapshot: &mut Snapshot) {
    match response.esv {
        ServiceCode::GetRes => {
            if response.properties.is_empty() {
                warn!(target = target.name, tid = response.tid, "read response carries no properties");
            }
            for prop in &response.properties {
                if prop.pdc == 0 {
                    info!(
                        target = target.name,
                        label = %property::label(response.seoj, prop.epc),
                        epc = %format!("0x{:02X}", prop.epc),
                        "property returned no data"
                    );
                    continue;
                }
                match property::decode(response.seoj, prop.epc, &prop.edt) {
                    Ok((label, value)) => {
                        info!(
                            target = target.name,
                            label,
                            epc = %format!("0x{:02X}", prop.epc),
                            pdc = prop.pdc,
                            edt = %hex(&prop.edt),
                            value = %value,
                            "property"
                        );
                        snapshot.insert(format!("{}.{}", target.name, label), value);
                    }
                    Err(e) => {
                        warn!(
                            target = target.name,
                            epc = %format!("0x{:02X}", prop.epc),
                            edt = %hex(&prop.edt),
                            error = %e,
                            "property did not decode"
                        );
                    }
                }
            }
        }
        ServiceCode::GetSna => {
            warn!(target = target.name, tid = response.tid, "device rejected the read (Get_SNA)");
        }
        other => {
            warn!(
                target = target.name,
                tid = response.tid,
                esv = %format!("0x{:02X}", other.byte()),
                "unexpected service code in read response"
            );
        }
    }
}

/// Household power flow computed from one snapshot, in watts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedMetrics {
    /// Load served locally; positive while the house consumes.
    pub self_consumption: i32,
    /// PV generation beyond the local load; positive when there is excess.
    pub surplus: i32,
}

/// `None` when any of the three inputs is absent; decisions depending on
/// the derived values are skipped for the cycle.
pub fn derive(snapshot: &Snapshot) -> Option<DerivedMetrics> {
    let grid = grid_power(snapshot)?;
    let pcs = pcs_power(snapshot)?;
    let pv = pv_power(snapshot)?;
    let self_consumption = grid - pcs;
    let surplus = i32::from(pv) - self_consumption;
    Some(DerivedMetrics {
        self_consumption,
        surplus,
    })
}

fn value(snapshot: &Snapshot, object: &str, label: &str) -> Option<PropertyValue> {
    snapshot.get(&format!("{object}.{label}")).copied()
}

pub fn battery_mode(snapshot: &Snapshot) -> Option<OperationMode> {
    value(snapshot, BATTERY_NAME, "operation mode")?
        .as_u8()
        .map(OperationMode::from)
}

pub fn battery_ratio(snapshot: &Snapshot) -> Option<u8> {
    value(snapshot, BATTERY_NAME, "remaining charge ratio")?.as_u8()
}

pub fn charge_setpoint(snapshot: &Snapshot) -> Option<u32> {
    value(snapshot, BATTERY_NAME, "charging power set-point")?.as_u32()
}

pub fn ac_capacity(snapshot: &Snapshot) -> Option<u32> {
    value(snapshot, BATTERY_NAME, "AC effective capacity")?.as_u32()
}

pub fn pv_power(snapshot: &Snapshot) -> Option<u16> {
    value(snapshot, SOLAR_NAME, "instantaneous PV output")?.as_u16()
}

pub fn grid_power(snapshot: &Snapshot) -> Option<i32> {
    value(snapshot, METER_NAME, "instantaneous grid power")?.as_i32()
}

pub fn pcs_power(snapshot: &Snapshot) -> Option<i32> {
    value(snapshot, PCS_NAME, "instantaneous PCS power")?.as_i32()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery_target() -> MonitorTarget {
        monitor_targets().remove(0)
    }

    #[test]
    fn absorbs_read_response_into_snapshot() {
        // Remaining charge ratio 50% for the battery, as answered on the wire.
        let data = [
            0x10, 0x81, 0x00, 0x01, 0x02, 0x7D, 0x01, 0x05, 0xFF, 0x01, 0x72, 0x01, 0xE4, 0x01,
            0x32,
        ];
        let response = Frame::decode(&data).unwrap();
        let mut snapshot = Snapshot::new();
        absorb_response(&battery_target(), &response, &mut snapshot);
        assert_eq!(
            snapshot.get("storage battery (027D01).remaining charge ratio"),
            Some(&PropertyValue::U8(50))
        );
        assert_eq!(battery_ratio(&snapshot), Some(50));
    }

    #[test]
    fn error_response_contributes_nothing() {
        let frame = Frame {
            tid: 7,
            seoj: Eoj::new(0x02, 0x7D, 0x01),
            deoj: CONTROLLER_EOJ,
            esv: ServiceCode::GetSna,
            opc: 1,
            properties: vec![Property::request(0xE4)],
        };
        let mut snapshot = Snapshot::new();
        absorb_response(&battery_target(), &frame, &mut snapshot);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn skips_undecodable_properties_but_keeps_the_rest() {
        let frame = Frame {
            tid: 7,
            seoj: Eoj::new(0x02, 0x7D, 0x01),
            deoj: CONTROLLER_EOJ,
            esv: ServiceCode::GetRes,
            opc: 3,
            properties: vec![
                Property::with_edt(0xE4, vec![0x32, 0x00]), // wrong length
                Property::with_edt(0xFE, vec![0x01]),       // unknown EPC
                Property::with_edt(0xDA, vec![0x42]),
            ],
        };
        let mut snapshot = Snapshot::new();
        absorb_response(&battery_target(), &frame, &mut snapshot);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(battery_mode(&snapshot), Some(OperationMode::Charge));
    }

    fn full_snapshot(pv: u16, grid: i32, pcs: i32) -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            format!("{SOLAR_NAME}.instantaneous PV output"),
            PropertyValue::U16(pv),
        );
        snapshot.insert(
            format!("{METER_NAME}.instantaneous grid power"),
            PropertyValue::I32(grid),
        );
        snapshot.insert(
            format!("{PCS_NAME}.instantaneous PCS power"),
            PropertyValue::I32(pcs),
        );
        snapshot
    }

    #[test]
    fn derives_power_flow() {
        // House draws 800 W from the grid, PCS feeds 300 W, PV makes 2000 W.
        let snapshot = full_snapshot(2000, 800, 300);
        let derived = derive(&snapshot).unwrap();
        assert_eq!(derived.self_consumption, 500);
        assert_eq!(derived.surplus, 1500);
    }

    #[test]
    fn derive_needs_all_three_inputs() {
        let mut snapshot = full_snapshot(2000, 800, 300);
        snapshot.remove(&format!("{METER_NAME}.instantaneous grid power"));
        assert_eq!(derive(&snapshot), None);
    }

    #[test]
    fn derive_rejects_mismatched_tags() {
        let mut snapshot = full_snapshot(2000, 800, 300);
        snapshot.insert(
            format!("{METER_NAME}.instantaneous grid power"),
            PropertyValue::U8(1),
        );
        assert_eq!(derive(&snapshot), None);
    }
}
