//! Sequencing several supplies on one bus into a verified all-on or all-off state.
//!
//! Each phase runs on every supply in the plan before the next phase starts, so all supplies
//! reach each milestone together. Plans are validated in full before any setting is sent.

use crate::bus::{lock, BusAddress, SharedBus};
use crate::command::{Command, Foldback, Query, RemoteMode, ServiceRequest};
use crate::device::{read_status, Zup};
use crate::error::{
    Failures, Quantity, Result, VerificationFailure, Violation, Violations, ZupError,
};
use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Time given to outputs after they are switched on, before final limits are programmed.
pub const OUTPUT_SETTLE: Duration = Duration::from_millis(250);
/// Time given to outputs before their measurements are trusted.
pub const READBACK_SETTLE: Duration = Duration::from_secs(1);
/// Measured voltage may deviate from its target by this fraction either way.
pub const VOLTAGE_TOLERANCE: f64 = 0.10;
/// Measured current may exceed its target by this fraction.
pub const CURRENT_TOLERANCE: f64 = 0.05;
/// Final OVP as a multiple of the target voltage.
pub const OVP_MARGIN: f64 = 1.10;
/// Final UVP as a multiple of the target voltage.
pub const UVP_MARGIN: f64 = 0.90;

const SERVICE_REQUESTS: [ServiceRequest; 3] = [
    ServiceRequest::OverVoltage,
    ServiceRequest::OverTemperature,
    ServiceRequest::Foldback,
];

/// Target state of one supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerPlanEntry {
    pub address: u8,
    pub voltage: f64,
    pub current: f64,
    /// Arm foldback protection. When off, foldback is cancelled.
    pub foldback: bool,
}

impl PowerPlanEntry {
    pub fn new(address: u8, voltage: f64, current: f64, foldback: bool) -> Self {
        PowerPlanEntry {
            address,
            voltage,
            current,
            foldback,
        }
    }
}

/// Powers the supplies of one bus on and off as a group.
pub struct PowerSequencer {
    bus: SharedBus,
}

impl PowerSequencer {
    pub fn new(bus: SharedBus) -> Self {
        PowerSequencer { bus }
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    /// Brings every supply in `plan` to its target voltage and current and verifies them.
    ///
    /// The plan is checked in two stages. Address, size and value checks run without touching
    /// the bus; if any fail, those are all reported and nothing is sent. Otherwise each model is
    /// read with `:MDL?;` and every target outside its model's envelope is reported, still
    /// before any setting is sent.
    ///
    /// On a verification failure outputs stay energized; call [`PowerSequencer::power_off`]
    /// to undo. Supplies not named in `plan` are never addressed.
    #[instrument(skip(self, plan), fields(supplies = plan.len()))]
    pub fn power_on(&self, plan: &[PowerPlanEntry]) -> Result<()> {
        let violations = check_plan(plan);
        if !violations.is_empty() {
            return Err(ZupError::InvalidPlan(Violations(violations)));
        }
        let supplies = self.connect(plan.iter().map(|e| e.address))?;
        let violations = check_envelope(plan, &supplies);
        if !violations.is_empty() {
            return Err(ZupError::InvalidPlan(Violations(violations)));
        }
        let targets: Vec<(&Zup, &PowerPlanEntry)> = supplies.iter().zip(plan).collect();

        info!("preparing supplies");
        for (zup, entry) in &targets {
            let model = zup.model();
            zup.set_remote_mode(RemoteMode::RemoteLatched)?;
            zup.set_under_voltage_protection(model.under_voltage_protection.min)?;
            zup.set_over_voltage_protection(model.over_voltage_protection.max)?;
            zup.clear_registers()?;
            zup.set_autostart(false)?;
            zup.set_foldback(if entry.foldback {
                Foldback::Arm
            } else {
                Foldback::Cancel
            })?;
            for kind in SERVICE_REQUESTS {
                zup.set_service_request(kind, false)?;
            }
        }

        info!("energizing outputs");
        for (zup, entry) in &targets {
            // Current goes up before voltage so the output never hits the old current limit.
            if entry.current > zup.get_current_set()? {
                zup.set_current(entry.current)?;
            }
            zup.set_voltage(entry.voltage)?;
            zup.set_power(true)?;
        }
        lock(&self.bus)?.settle(OUTPUT_SETTLE);

        info!("programming final limits");
        for (zup, entry) in &targets {
            let model = zup.model();
            let ovp = model.over_voltage_protection;
            let uvp = model.under_voltage_protection;
            zup.set_current(entry.current)?;
            zup.set_over_voltage_protection((entry.voltage * OVP_MARGIN).clamp(ovp.min, ovp.max))?;
            zup.set_under_voltage_protection((entry.voltage * UVP_MARGIN).clamp(uvp.min, uvp.max))?;
        }
        lock(&self.bus)?.settle(READBACK_SETTLE);

        info!("verifying outputs");
        let mut failures = Vec::new();
        for (zup, entry) in &targets {
            let volts = zup.get_voltage_actual()?;
            let amps = zup.get_current_actual()?;
            if !within_tolerance(entry, volts, amps) {
                failures.push(VerificationFailure {
                    address: zup.address(),
                    expected: format!(
                        "{:.3} V +/-{}%, 0..{:.3} A",
                        entry.voltage,
                        VOLTAGE_TOLERANCE * 100.0,
                        entry.current * (1.0 + CURRENT_TOLERANCE)
                    ),
                    actual: format!("{:.3} V, {:.3} A", volts, amps),
                    status: zup.status()?,
                });
            }
        }
        if failures.is_empty() {
            info!("all supplies on");
            Ok(())
        } else {
            for failure in &failures {
                warn!(address = %failure.address, actual = %failure.actual, "setting verification failed");
            }
            Err(ZupError::SettingVerificationFailed(Failures(failures)))
        }
    }

    /// Switches off every supply in `addresses`, verifies the outputs are off and returns the
    /// verified supplies to a neutral baseline.
    ///
    /// Works on bare addresses: no model is resolved, so a supply missing from the catalog is
    /// switched off like any other. Every output is switched off before any is verified, so a
    /// supply that stops answering during verification cannot keep the others on. Supplies
    /// that still report their output on are reported and left as they are.
    #[instrument(skip(self, addresses), fields(supplies = addresses.len()))]
    pub fn power_off(&self, addresses: &[u8]) -> Result<()> {
        let violations = check_addresses(addresses.iter().copied());
        if !violations.is_empty() {
            return Err(ZupError::InvalidPlan(Violations(violations)));
        }
        let addresses = addresses
            .iter()
            .map(|a| BusAddress::new(*a))
            .collect::<Result<Vec<_>>>()?;
        let mut bus = lock(&self.bus)?;

        info!("switching outputs off");
        for address in &addresses {
            bus.send(*address, &Command::Output(false).encode())?;
        }

        info!("verifying outputs");
        let mut failures = Vec::new();
        let mut verified = Vec::new();
        for address in addresses {
            let reply = bus.query(address, Query::OperationRegister.encode())?;
            if Query::decode_output_bit(&reply)? {
                failures.push(VerificationFailure {
                    address,
                    expected: "output off".to_string(),
                    actual: "output on".to_string(),
                    status: read_status(&mut bus, address)?,
                });
            } else {
                verified.push(address);
            }
        }

        info!(supplies = verified.len(), "restoring baseline");
        for address in verified {
            for command in [
                Command::Remote(RemoteMode::RemoteUnlatched),
                Command::ClearRegisters,
                Command::Foldback(Foldback::Cancel),
                Command::Autostart(false),
            ] {
                bus.send(address, &command.encode())?;
            }
        }

        if failures.is_empty() {
            info!("all supplies off");
            Ok(())
        } else {
            for failure in &failures {
                warn!(address = %failure.address, actual = %failure.actual, "power verification failed");
            }
            Err(ZupError::PowerVerificationFailed(Failures(failures)))
        }
    }

    fn connect(&self, addresses: impl Iterator<Item = u8>) -> Result<Vec<Zup>> {
        addresses
            .map(|a| Zup::new(self.bus.clone(), BusAddress::new(a)?))
            .collect()
    }
}

/// Runs [`PowerSequencer::power_on`] on several independent buses at once, one thread per bus.
///
/// Results are returned in the order of `plans`.
pub fn power_on_buses(plans: &[(SharedBus, Vec<PowerPlanEntry>)]) -> Vec<Result<()>> {
    thread::scope(|s| {
        let handles: Vec<_> = plans
            .iter()
            .map(|(bus, plan)| s.spawn(move || PowerSequencer::new(bus.clone()).power_on(plan)))
            .collect();
        handles.into_iter().map(join).collect()
    })
}

/// Runs [`PowerSequencer::power_off`] on several independent buses at once, one thread per bus.
pub fn power_off_buses(plans: &[(SharedBus, Vec<u8>)]) -> Vec<Result<()>> {
    thread::scope(|s| {
        let handles: Vec<_> = plans
            .iter()
            .map(|(bus, addresses)| {
                s.spawn(move || PowerSequencer::new(bus.clone()).power_off(addresses))
            })
            .collect();
        handles.into_iter().map(join).collect()
    })
}

fn join(handle: thread::ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    handle.join().unwrap_or_else(|_e| {
        Err(ZupError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "Sequencer thread panicked",
        )))
    })
}

fn check_addresses(addresses: impl ExactSizeIterator<Item = u8>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let count = addresses.len();
    if count == 0 || count > BusAddress::MAX as usize {
        violations.push(Violation::PlanSize(count));
    }
    let mut seen = BTreeSet::new();
    for address in addresses {
        if BusAddress::new(address).is_err() {
            violations.push(Violation::Address(address));
        } else if !seen.insert(address) {
            violations.push(Violation::DuplicateAddress(address));
        }
    }
    violations
}

/// Checks that need no supply: plan size, addresses, and that every value is a usable number.
fn check_plan(plan: &[PowerPlanEntry]) -> Vec<Violation> {
    let mut violations = check_addresses(plan.iter().map(|e| e.address));
    for entry in plan {
        for (quantity, value) in [
            (Quantity::Voltage, entry.voltage),
            (Quantity::Current, entry.current),
        ] {
            if !value.is_finite() {
                violations.push(Violation::NotFinite {
                    address: entry.address,
                    quantity,
                });
            } else if value < 0.0 {
                violations.push(Violation::Negative {
                    address: entry.address,
                    quantity,
                    value,
                });
            }
        }
    }
    violations
}

/// Checks every target against the envelope of the model found at its address.
fn check_envelope(plan: &[PowerPlanEntry], supplies: &[Zup]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (entry, zup) in plan.iter().zip(supplies) {
        let model = zup.model();
        for (quantity, value, max) in [
            (Quantity::Voltage, entry.voltage, model.voltage.max),
            (Quantity::Current, entry.current, model.current.max),
        ] {
            if value > max {
                violations.push(Violation::Envelope {
                    address: entry.address,
                    model: model.name.clone(),
                    quantity,
                    value,
                    max,
                });
            }
        }
    }
    violations
}

fn within_tolerance(entry: &PowerPlanEntry, volts: f64, amps: f64) -> bool {
    let volts_ok = (volts - entry.voltage).abs() <= entry.voltage * VOLTAGE_TOLERANCE;
    let amps_ok = (0.0..=entry.current * (1.0 + CURRENT_TOLERANCE)).contains(&amps);
    volts_ok && amps_ok
}
