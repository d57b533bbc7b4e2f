//! We use this mocking module in unit tests to emulate a bus of ZUp supplies.

use crate::command::{Foldback, RemoteMode};
use crate::connection::Connection;
use crate::error::ZupError;
use crate::model::SupplyModel;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Everything the code under test did to the bus, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Write(String),
    Pause(Duration),
}

/// State of one simulated supply.
#[derive(Debug, Clone)]
pub struct SimSupply {
    pub model: String,
    pub voltage_set: f64,
    pub current_set: f64,
    pub uvp: f64,
    pub ovp: f64,
    pub output: bool,
    pub autostart: bool,
    pub foldback: Foldback,
    pub remote: RemoteMode,
    /// Over-voltage, over-temperature, foldback.
    pub service_requests: [bool; 3],
    pub clears: usize,
    /// Settings the supply refused because they broke the UVP/OVP inequality.
    pub rejected: Vec<String>,
    /// Measured voltage is `voltage_set * actual_scale` while the output is on.
    pub actual_scale: f64,
    /// Current drawn by the load while the output is on, capped by `current_set`.
    pub load_current: f64,
    /// Output ignores `:OUT0;`.
    pub stuck_on: bool,
}

const EPSILON: f64 = 1e-6;

impl SimSupply {
    fn new(model: &str) -> Self {
        let resolved = SupplyModel::resolve(&format!("Nemic-Lambda ZUP({})", model))
            .expect("simulated supplies must use catalog models");
        SimSupply {
            model: model.to_string(),
            voltage_set: 0.0,
            current_set: 0.0,
            uvp: resolved.under_voltage_protection.min,
            ovp: resolved.over_voltage_protection.max,
            output: false,
            autostart: true,
            foldback: Foldback::Release,
            remote: RemoteMode::Local,
            service_requests: [true; 3],
            clears: 0,
            rejected: Vec::new(),
            actual_scale: 1.0,
            load_current: 0.0,
            stuck_on: false,
        }
    }

    fn apply(&mut self, keyword: &str, arg: &str) -> Option<String> {
        let flag = |arg: &str| arg == "1";
        match (keyword, arg) {
            ("VOL", "!") => Some(format!("SV{:.3}", self.voltage_set)),
            ("VOL", "?") => {
                let actual = if self.output { self.voltage_set * self.actual_scale } else { 0.0 };
                Some(format!("AV{:.3}", actual))
            }
            ("VOL", v) => {
                let v: f64 = v.parse().ok()?;
                if v < self.uvp / 0.95 - EPSILON || v > self.ovp / 1.05 + EPSILON {
                    self.rejected.push(format!("VOL{}", arg));
                } else {
                    self.voltage_set = v;
                }
                None
            }
            ("CUR", "!") => Some(format!("SA{:.3}", self.current_set)),
            ("CUR", "?") => {
                let actual = if self.output { self.load_current.min(self.current_set) } else { 0.0 };
                Some(format!("AA{:.3}", actual))
            }
            ("CUR", a) => {
                self.current_set = a.parse().ok()?;
                None
            }
            ("UVP", "?") => Some(format!("UP{:.2}", self.uvp)),
            ("UVP", v) => {
                let v: f64 = v.parse().ok()?;
                if v > self.voltage_set * 0.95 + EPSILON && v > 0.0 {
                    self.rejected.push(format!("UVP{}", arg));
                } else {
                    self.uvp = v;
                }
                None
            }
            ("OVP", "?") => Some(format!("OP{:.2}", self.ovp)),
            ("OVP", v) => {
                let v: f64 = v.parse().ok()?;
                if v < self.voltage_set * 1.05 - EPSILON {
                    self.rejected.push(format!("OVP{}", arg));
                } else {
                    self.ovp = v;
                }
                None
            }
            ("OUT", "?") => Some(format!("OT{}", u8::from(self.output))),
            ("OUT", s) => {
                let on = flag(s);
                if on || !self.stuck_on {
                    self.output = on;
                }
                None
            }
            ("AST", "?") => Some(format!("AS{}", u8::from(self.autostart))),
            ("AST", s) => {
                self.autostart = flag(s);
                None
            }
            ("FLD", "?") => Some(
                match self.foldback {
                    Foldback::Release => "FD0",
                    Foldback::Arm => "FD1",
                    Foldback::Cancel => "FD2",
                }
                .to_string(),
            ),
            ("FLD", s) => {
                self.foldback = match s {
                    "0" => Foldback::Release,
                    "1" => Foldback::Arm,
                    _ => Foldback::Cancel,
                };
                None
            }
            ("RMT", "?") => Some(
                match self.remote {
                    RemoteMode::Local => "RM0",
                    RemoteMode::RemoteUnlatched => "RM1",
                    RemoteMode::RemoteLatched => "RM2",
                }
                .to_string(),
            ),
            ("RMT", s) => {
                self.remote = match s {
                    "0" => RemoteMode::Local,
                    "1" => RemoteMode::RemoteUnlatched,
                    _ => RemoteMode::RemoteLatched,
                };
                None
            }
            ("SRV", "?") => Some(format!(":QV{};", u8::from(self.service_requests[0]))),
            ("SRT", "?") => Some(format!(":QT{};", u8::from(self.service_requests[1]))),
            ("SRF", "?") => Some(format!(":QF{};", u8::from(self.service_requests[2]))),
            ("SRV", s) => {
                self.service_requests[0] = flag(s);
                None
            }
            ("SRT", s) => {
                self.service_requests[1] = flag(s);
                None
            }
            ("SRF", s) => {
                self.service_requests[2] = flag(s);
                None
            }
            ("MDL", "?") => Some(format!("Nemic-Lambda ZUP({})", self.model)),
            ("REV", "?") => Some(format!("Ver {} 1.1", self.model.replace(['V', 'A'], ""))),
            ("STA", "?") => Some(format!("OS000{}0000", u8::from(self.output))),
            ("STP", "?") => Some("PS00000000".to_string()),
            ("ALM", "?") => Some("AL00000".to_string()),
            ("DCL", "") => {
                self.clears += 1;
                None
            }
            _ => None,
        }
    }
}

#[derive(Default)]
struct SimState {
    supplies: BTreeMap<u8, SimSupply>,
    listening: Option<u8>,
    pending: VecDeque<String>,
    log: Vec<Event>,
    should_error_on_write: bool,
    /// Writes of exactly this command fail.
    failing_command: Option<String>,
    timeout: Option<Duration>,
}

impl SimState {
    fn handle(&mut self, command: &str) {
        let Some(body) = command.strip_prefix(':').and_then(|c| c.strip_suffix(';')) else {
            return;
        };
        if let Some(address) = body.strip_prefix("ADR") {
            self.listening = address.parse().ok();
            return;
        }
        let Some(address) = self.listening else {
            return;
        };
        let Some(supply) = self.supplies.get_mut(&address) else {
            return;
        };
        let Some(keyword) = body.get(..3) else {
            return;
        };
        if let Some(reply) = supply.apply(keyword, &body[3..]) {
            self.pending.push_back(reply);
        }
    }
}

/// Our mock type used to emulate a multi-drop bus. Clones share the same bus.
#[derive(Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a supply of `model` (e.g. `20V-10A`) at `address`.
    pub fn with_supply(self, address: u8, model: &str) -> Self {
        self.state().supplies.insert(address, SimSupply::new(model));
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn supply(&self, address: u8) -> SimSupply {
        self.state().supplies[&address].clone()
    }

    pub fn update(&self, address: u8, f: impl FnOnce(&mut SimSupply)) {
        f(self.state().supplies.get_mut(&address).unwrap());
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().log.clone()
    }

    /// Only the commands written, without pauses.
    pub fn writes(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter_map(|e| match e {
                Event::Write(w) => Some(w.clone()),
                Event::Pause(_) => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn set_write_error(&self, should_error: bool) {
        self.state().should_error_on_write = should_error;
    }

    /// Makes every write of `command` fail, leaving other writes alone.
    pub fn fail_writes_of(&self, command: &str) {
        self.state().failing_command = Some(command.to_string());
    }

    /// Last timeout set through [`Connection::set_timeout`].
    pub fn timeout(&self) -> Option<Duration> {
        self.state().timeout
    }
}

impl Connection for SimulatedBus {
    fn write_command(&mut self, command: &str) -> Result<(), ZupError> {
        let mut state = self.state();
        if state.should_error_on_write || state.failing_command.as_deref() == Some(command) {
            return Err(ZupError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write error",
            )));
        }
        state.log.push(Event::Write(command.to_string()));
        state.handle(command);
        Ok(())
    }

    fn read_response(&mut self) -> Result<String, ZupError> {
        self.state().pending.pop_front().ok_or_else(|| {
            ZupError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no reply",
            ))
        })
    }

    fn set_timeout(&mut self, duration: Duration) -> Result<(), ZupError> {
        self.state().timeout = Some(duration);
        Ok(())
    }

    fn port_name(&self) -> &str {
        "SIM"
    }

    fn pause(&mut self, duration: Duration) {
        self.state().log.push(Event::Pause(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_addressed_supply_answers() {
        let mut sim = SimulatedBus::new()
            .with_supply(1, "20V-10A")
            .with_supply(2, "36V-6A");
        sim.write_command(":ADR02;").unwrap();
        assert_eq!(sim.query(":MDL?;").unwrap(), "Nemic-Lambda ZUP(36V-6A)");
        sim.write_command(":ADR01;").unwrap();
        assert_eq!(sim.query(":MDL?;").unwrap(), "Nemic-Lambda ZUP(20V-10A)");
    }

    #[test]
    fn unaddressed_bus_stays_silent() {
        let mut sim = SimulatedBus::new().with_supply(1, "20V-10A");
        assert!(sim.query(":MDL?;").is_err());
        sim.write_command(":ADR05;").unwrap();
        assert!(sim.query(":MDL?;").is_err());
    }

    #[test]
    fn applies_settings_and_reports_them() {
        let mut sim = SimulatedBus::new().with_supply(1, "20V-10A");
        sim.write_command(":ADR01;").unwrap();
        sim.write_command(":VOL05.000;").unwrap();
        sim.write_command(":OUT1;").unwrap();
        assert_eq!(sim.query(":VOL!;").unwrap(), "SV5.000");
        assert_eq!(sim.query(":VOL?;").unwrap(), "AV5.000");
        assert_eq!(sim.query(":STA?;").unwrap(), "OS00010000");
        assert_eq!(sim.query(":SRV?;").unwrap(), ":QV1;");
        assert!(sim.supply(1).output);
    }

    #[test]
    fn rejects_voltage_above_over_voltage_window() {
        let mut sim = SimulatedBus::new().with_supply(1, "20V-10A");
        sim.write_command(":ADR01;").unwrap();
        sim.write_command(":OVP05.0;").unwrap();
        sim.write_command(":VOL10.000;").unwrap();
        let supply = sim.supply(1);
        assert_eq!(supply.voltage_set, 0.0);
        assert_eq!(supply.rejected, vec!["VOL10.000"]);
    }

    #[test]
    fn fails_only_the_chosen_command() {
        let mut sim = SimulatedBus::new().with_supply(1, "20V-10A");
        sim.fail_writes_of(":OUT1;");
        sim.write_command(":ADR01;").unwrap();
        assert!(sim.write_command(":OUT1;").is_err());
        sim.write_command(":OUT0;").unwrap();
        assert_eq!(sim.writes(), vec![":ADR01;", ":OUT0;"]);
    }

    #[test]
    fn logs_writes_and_pauses() {
        let mut sim = SimulatedBus::new();
        sim.write_command(":DCL;").unwrap();
        sim.pause(Duration::from_millis(20));
        assert_eq!(
            sim.events(),
            vec![Event::Write(":DCL;".into()), Event::Pause(Duration::from_millis(20))]
        );
        sim.clear_log();
        assert!(sim.events().is_empty());
    }
}
