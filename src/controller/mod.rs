use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Local};
use thiserror::Error;
use tracing::{info, warn};

use crate::echonet::client::EchonetClient;
use crate::echonet::frame::{Frame, Property};
use crate::echonet::property::{self, OperationMode};
use crate::echonet::{EchonetError, Eoj, ServiceCode, CONTROLLER_EOJ};

pub mod config;
pub mod telemetry;
pub mod window;

use config::{Config, ConfigError};
use telemetry::{DerivedMetrics, MonitorTarget, Snapshot};
use window::{ChargeWindow, TimeOfDay};

pub const BATTERY_EOJ: Eoj = Eoj::new(0x02, 0x7D, 0x01);

/// Hard ceiling on the charging power set-point.
const MAX_CHARGE_POWER_W: i64 = 3000;

/// Surplus kept clear of the set-point so charging never tips the house
/// into grid import.
const SURPLUS_HEADROOM_W: i64 = 500;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Echonet(#[from] EchonetError),

    #[error("device refused the write (SetC_SNA, TID {tid})")]
    Refused { tid: u16 },

    #[error("unexpected service code 0x{esv:02X} in write response (TID {tid})")]
    Unexpected { tid: u16, esv: u8 },
}

/// A write the control law wants issued this cycle. Raising and lowering
/// the set-point are distinct because only a successful raise arms the
/// increase lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    SetMode(OperationMode),
    RaiseChargePower(u32),
    LowerChargePower(u32),
}

pub struct Controller {
    config: Config,
    window: ChargeWindow,
    client: EchonetClient,
    targets: Vec<MonitorTarget>,
    shutdown: Arc<AtomicBool>,
    last_mode_change: Option<DateTime<Local>>,
    last_power_increase: Option<DateTime<Local>>,
}

impl Controller {
    pub fn new(config: Config, shutdown: Arc<AtomicBool>) -> Result<Controller, ConfigError> {
        let target = config.target_addr()?;
        let window = ChargeWindow::parse(&config.charge_window_start, &config.charge_window_end)?;
        Ok(Controller {
            client: EchonetClient::new(target),
            targets: telemetry::monitor_targets(),
            window,
            config,
            shutdown,
            last_mode_change: None,
            last_power_increase: None,
        })
    }

    /// One monitoring cycle: collect the snapshot, derive the power flow,
    /// decide, write.
    pub async fn run_cycle(&mut self) {
        info!("cycle start");

        let snapshot = telemetry::collect(&mut self.client, &self.targets, &self.shutdown).await;
        if self.config.log_monitoring_data {
            for (key, value) in &snapshot {
                info!(key = %key, value = %value, "monitoring data");
            }
        }

        let derived = telemetry::derive(&snapshot);
        match derived {
            Some(d) => info!(
                self_consumption = d.self_consumption,
                surplus = d.surplus,
                "derived power flow"
            ),
            None => info!("derived power flow unavailable, inputs missing from snapshot"),
        }

        if self.shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested, skipping control decisions");
            return;
        }

        let actions = self.decide(Local::now(), &snapshot, derived);
        self.apply(actions).await;
        info!("cycle complete");
    }

    fn decide(
        &self,
        now: DateTime<Local>,
        snapshot: &Snapshot,
        derived: Option<DerivedMetrics>,
    ) -> Vec<Action> {
        let tod = TimeOfDay::from(now.time());
        if self.window.contains(tod) {
            info!(window = %self.window, "inside the charge window");
            self.decide_in_window(now, tod, snapshot, derived)
        } else {
            info!(window = %self.window, "outside the charge window");
            self.decide_out_of_window(snapshot)
        }
    }

    fn decide_in_window(
        &self,
        now: DateTime<Local>,
        tod: TimeOfDay,
        snapshot: &Snapshot,
        derived: Option<DerivedMetrics>,
    ) -> Vec<Action> {
        let mut actions = Vec::new();

        if let Some(last) = self.last_mode_change {
            let inhibit = Duration::minutes(self.config.mode_change_inhibit_minutes);
            let elapsed = now - last;
            if elapsed < inhibit {
                info!(
                    remaining_secs = (inhibit - elapsed).num_seconds(),
                    "mode change inhibit active, no writes this cycle"
                );
                return actions;
            }
        }

        let Some(mode) = telemetry::battery_mode(snapshot) else {
            info!("operation mode missing from snapshot, no writes this cycle");
            return actions;
        };

        if mode != OperationMode::Charge {
            actions.push(Action::SetMode(OperationMode::Charge));
        }

        let Some(derived) = derived else {
            info!("skipping surplus and charge power control, derived power flow unavailable");
            return actions;
        };

        if derived.surplus < self.config.auto_mode_threshold_watts {
            info!(
                surplus = derived.surplus,
                threshold = self.config.auto_mode_threshold_watts,
                "surplus below threshold, reverting to auto to avoid grid import"
            );
            if mode != OperationMode::Auto {
                actions.push(Action::SetMode(OperationMode::Auto));
            }
            return actions;
        }
        info!(
            surplus = derived.surplus,
            threshold = self.config.auto_mode_threshold_watts,
            "surplus at or above threshold, charging continues"
        );

        let (Some(capacity), Some(ratio)) = (
            telemetry::ac_capacity(snapshot),
            telemetry::battery_ratio(snapshot),
        ) else {
            info!("skipping charge power control, capacity or remaining ratio missing");
            return actions;
        };

        let remaining_minutes = self.window.minutes_until_end(tod);
        if remaining_minutes <= 0 {
            info!("charge window end reached, skipping charge power control");
            return actions;
        }

        let target = Self::target_charge_power(capacity, ratio, derived.surplus, remaining_minutes);
        info!(watts = target, remaining_minutes, "computed target charge power");

        let Some(current) = telemetry::charge_setpoint(snapshot) else {
            info!("skipping charge power control, current set-point missing");
            return actions;
        };

        let current = i64::from(current);
        if target > current {
            let interval = Duration::minutes(self.config.charge_power_update_interval_minutes);
            let allowed = match self.last_power_increase {
                None => true,
                Some(last) => now - last >= interval,
            };
            if allowed {
                actions.push(Action::RaiseChargePower(target as u32));
            } else {
                info!(
                    minutes = self.config.charge_power_update_interval_minutes,
                    "set-point increase locked out since the last increase"
                );
            }
        } else if target < current {
            actions.push(Action::LowerChargePower(target as u32));
        } else {
            info!("target equals current set-point, no write");
        }

        actions
    }

    fn decide_out_of_window(&self, snapshot: &Snapshot) -> Vec<Action> {
        let Some(mode) = telemetry::battery_mode(snapshot) else {
            info!("operation mode missing from snapshot, no writes this cycle");
            return Vec::new();
        };
        if mode == OperationMode::Auto {
            return Vec::new();
        }
        info!(%mode, "reverting to auto mode for self-consumption");
        vec![Action::SetMode(OperationMode::Auto)]
    }

    /// Power that charges the remaining capacity exactly by the window end,
    /// clamped by the absolute ceiling and the surplus headroom.
    fn target_charge_power(
        capacity_wh: u32,
        remaining_ratio: u8,
        surplus: i32,
        minutes_remaining: i64,
    ) -> i64 {
        let needed =
            i64::from(capacity_wh) * (100 - i64::from(remaining_ratio)) * 60 / (100 * minutes_remaining);
        let headroom = (i64::from(surplus) - SURPLUS_HEADROOM_W).max(0);
        needed.min(MAX_CHARGE_POWER_W.min(headroom)).max(0)
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, skipping remaining writes");
                return;
            }
            match action {
                Action::SetMode(mode) => match self.write_mode(mode).await {
                    Ok(()) => self.last_mode_change = Some(Local::now()),
                    Err(e) => warn!(%mode, error = %e, "operation mode write failed"),
                },
                Action::RaiseChargePower(watts) => match self.write_charge_power(watts).await {
                    Ok(()) => self.last_power_increase = Some(Local::now()),
                    Err(e) => warn!(watts, error = %e, "charge power write failed"),
                },
                Action::LowerChargePower(watts) => {
                    if let Err(e) = self.write_charge_power(watts).await {
                        warn!(watts, error = %e, "charge power write failed");
                    }
                }
            }
        }
    }

    async fn write_mode(&mut self, mode: OperationMode) -> Result<(), ControlError> {
        info!(%mode, "setting battery operation mode");
        self.write_property(Property::with_edt(
            property::EPC_OPERATION_MODE,
            vec![mode.byte()],
        ))
        .await
    }

    async fn write_charge_power(&mut self, watts: u32) -> Result<(), ControlError> {
        info!(watts, "setting battery charging power");
        self.write_property(Property::with_edt(
            property::EPC_CHARGE_POWER_SETPOINT,
            watts.to_be_bytes().to_vec(),
        ))
        .await
    }

    async fn write_property(&mut self, prop: Property) -> Result<(), ControlError> {
        let tid = self.client.next_tid();
        let frame = Frame {
            tid,
            seoj: CONTROLLER_EOJ,
            deoj: BATTERY_EOJ,
            esv: ServiceCode::SetC,
            opc: 1,
            properties: vec![prop],
        };
        let exchange = self.client.transact(&frame).await?;
        let response = Frame::decode(&exchange.payload)?;
        if response.tid != tid {
            warn!(
                sent = tid,
                received = response.tid,
                "response TID does not match request, processing anyway"
            );
        }
        Self::check_write_response(tid, &response)
    }

    fn check_write_response(tid: u16, response: &Frame) -> Result<(), ControlError> {
        match response.esv {
            ServiceCode::SetRes => {
                info!(tid, "write acknowledged");
                Ok(())
            }
            ServiceCode::SetCSna => Err(ControlError::Refused { tid }),
            other => Err(ControlError::Unexpected {
                tid,
                esv: other.byte(),
            }),
        }
    }
}
