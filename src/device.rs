use crate::bus::{lock, BusAddress, BusSession, SharedBus};
use crate::command::{Command, Foldback, Query, RemoteMode, ServiceRequest};
use crate::error::{Quantity, Result, ZupError};
use crate::model::{Limit, SupplyModel};
use std::fmt;

/// Queries issued by [`Zup::status`], in order.
const STATUS_QUERIES: [Query; 14] = [
    Query::VoltageActual,
    Query::CurrentActual,
    Query::OperationRegister,
    Query::AlarmRegister,
    Query::ProgramRegister,
    Query::Remote,
    Query::Model,
    Query::Revision,
    Query::VoltageSet,
    Query::CurrentSet,
    Query::Foldback,
    Query::OverVoltageProtection,
    Query::UnderVoltageProtection,
    Query::Autostart,
];

/// Queries issued by [`Zup::all_statuses`], in order.
const ALL_STATUS_QUERIES: [Query; 17] = [
    Query::Model,
    Query::Revision,
    Query::VoltageSet,
    Query::VoltageActual,
    Query::UnderVoltageProtection,
    Query::OverVoltageProtection,
    Query::CurrentSet,
    Query::CurrentActual,
    Query::Foldback,
    Query::Remote,
    Query::Autostart,
    Query::OperationRegister,
    Query::ProgramRegister,
    Query::AlarmRegister,
    Query::ServiceRequest(ServiceRequest::OverVoltage),
    Query::ServiceRequest(ServiceRequest::OverTemperature),
    Query::ServiceRequest(ServiceRequest::Foldback),
];

/// One ZUp supply on a shared bus.
///
/// Every set-point is checked against the model's limits and, for voltage and the protection
/// thresholds, against the inequality the supply itself enforces:
///
/// `UVP min <= UVP <~ V * 95% <~ V <~ V * 105% <~ OVP <= OVP max`
///
/// A rejected value fails before anything is sent. OVP and UVP read back about 0.1 V below
/// what was programmed; that is how the supplies behave and is not corrected here.
pub struct Zup {
    bus: SharedBus,
    address: BusAddress,
    model: SupplyModel,
}

impl Zup {
    /// Connects to the supply at `address` and resolves its model.
    ///
    /// Only `:MDL?;` is sent, so whatever state the supply was in is left untouched.
    pub fn new(bus: SharedBus, address: BusAddress) -> Result<Self> {
        let reply = lock(&bus)?.query(address, Query::Model.encode())?;
        let model = SupplyModel::resolve(&reply)?;
        Ok(Zup {
            bus,
            address,
            model,
        })
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    pub fn model(&self) -> &SupplyModel {
        &self.model
    }

    /// Hands the front panel back to the operator (`:RMT1;`).
    ///
    /// Dropping a `Zup` sends nothing; call this when done with a supply.
    pub fn release(self) -> Result<()> {
        self.send(Command::Remote(RemoteMode::RemoteUnlatched))
    }

    /// Puts the supply into a known baseline: registers cleared, output off, autostart off,
    /// foldback cancelled, service requests off, protections wide open, zero volts and amps,
    /// front panel locked out.
    pub fn configure(&self) -> Result<()> {
        self.clear_registers()?;
        self.set_power(false)?;
        self.set_autostart(false)?;
        self.set_foldback(Foldback::Cancel)?;
        self.set_service_request(ServiceRequest::OverVoltage, false)?;
        self.set_service_request(ServiceRequest::OverTemperature, false)?;
        self.set_service_request(ServiceRequest::Foldback, false)?;
        self.set_under_voltage_protection(self.model.under_voltage_protection.min)?;
        self.set_over_voltage_protection(self.model.over_voltage_protection.max)?;
        self.set_voltage(0.0)?;
        self.set_current(0.0)?;
        self.set_remote_mode(RemoteMode::RemoteLatched)
    }

    fn send(&self, command: Command) -> Result<()> {
        lock(&self.bus)?.send(self.address, &command.encode())
    }

    fn query(&self, query: Query) -> Result<String> {
        lock(&self.bus)?.query(self.address, query.encode())
    }

    fn query_float(&self, query: Query) -> Result<f64> {
        let mut bus = lock(&self.bus)?;
        self.read_float(&mut bus, query)
    }

    fn query_flag(&self, query: Query) -> Result<bool> {
        let reply = self.query(query)?;
        query.decode_flag(&reply)
    }

    fn read_float(&self, bus: &mut BusSession, query: Query) -> Result<f64> {
        let reply = bus.query(self.address, query.encode())?;
        query.decode_float(&reply)
    }

    pub fn set_voltage(&self, volts: f64) -> Result<()> {
        let limit = self.model.voltage;
        check_limit(Quantity::Voltage, volts, &limit)?;
        let mut bus = lock(&self.bus)?;
        let uvp = self.read_float(&mut bus, Query::UnderVoltageProtection)?;
        let ovp = self.read_float(&mut bus, Query::OverVoltageProtection)?;
        check_present(Quantity::Voltage, volts, uvp / 0.95, ovp / 1.05)?;
        bus.send(self.address, &Command::Voltage(limit.format.format(volts)).encode())
    }

    pub fn get_voltage_actual(&self) -> Result<f64> {
        self.query_float(Query::VoltageActual)
    }

    pub fn get_voltage_set(&self) -> Result<f64> {
        self.query_float(Query::VoltageSet)
    }

    pub fn set_current(&self, amperes: f64) -> Result<()> {
        let limit = self.model.current;
        check_limit(Quantity::Current, amperes, &limit)?;
        self.send(Command::Current(limit.format.format(amperes)))
    }

    pub fn get_current_actual(&self) -> Result<f64> {
        self.query_float(Query::CurrentActual)
    }

    pub fn get_current_set(&self) -> Result<f64> {
        self.query_float(Query::CurrentSet)
    }

    pub fn set_under_voltage_protection(&self, volts: f64) -> Result<()> {
        let limit = self.model.under_voltage_protection;
        check_limit(Quantity::UnderVoltageProtection, volts, &limit)?;
        let mut bus = lock(&self.bus)?;
        let set = self.read_float(&mut bus, Query::VoltageSet)?;
        check_present(Quantity::UnderVoltageProtection, volts, limit.min, set * 0.95)?;
        bus.send(
            self.address,
            &Command::UnderVoltageProtection(limit.format.format(volts)).encode(),
        )
    }

    pub fn get_under_voltage_protection(&self) -> Result<f64> {
        self.query_float(Query::UnderVoltageProtection)
    }

    pub fn set_over_voltage_protection(&self, volts: f64) -> Result<()> {
        let limit = self.model.over_voltage_protection;
        check_limit(Quantity::OverVoltageProtection, volts, &limit)?;
        let mut bus = lock(&self.bus)?;
        let set = self.read_float(&mut bus, Query::VoltageSet)?;
        check_present(Quantity::OverVoltageProtection, volts, set * 1.05, limit.max)?;
        bus.send(
            self.address,
            &Command::OverVoltageProtection(limit.format.format(volts)).encode(),
        )
    }

    pub fn get_over_voltage_protection(&self) -> Result<f64> {
        self.query_float(Query::OverVoltageProtection)
    }

    /// Turns the output on or off.
    pub fn set_power(&self, on: bool) -> Result<()> {
        self.send(Command::Output(on))
    }

    pub fn is_power_on(&self) -> Result<bool> {
        self.query_flag(Query::Output)
    }

    /// Reads the output bit of the operation status register.
    pub fn is_output_energized(&self) -> Result<bool> {
        let reply = self.get_register_operation()?;
        Query::decode_output_bit(&reply)
    }

    /// With autostart on, the supply re-powers to its last settings after a power cycle.
    pub fn set_autostart(&self, on: bool) -> Result<()> {
        self.send(Command::Autostart(on))
    }

    pub fn is_autostart_on(&self) -> Result<bool> {
        self.query_flag(Query::Autostart)
    }

    pub fn set_foldback(&self, state: Foldback) -> Result<()> {
        self.send(Command::Foldback(state))
    }

    pub fn get_foldback(&self) -> Result<Foldback> {
        Query::decode_foldback(&self.query(Query::Foldback)?)
    }

    pub fn set_remote_mode(&self, mode: RemoteMode) -> Result<()> {
        self.send(Command::Remote(mode))
    }

    pub fn get_remote_mode(&self) -> Result<RemoteMode> {
        Query::decode_remote(&self.query(Query::Remote)?)
    }

    pub fn is_remote_latched(&self) -> Result<bool> {
        Ok(self.get_remote_mode()? == RemoteMode::RemoteLatched)
    }

    /// Enables or disables unsolicited service requests for `kind`.
    ///
    /// Nothing here listens for them; supplies are polled instead, so leave these off.
    pub fn set_service_request(&self, kind: ServiceRequest, on: bool) -> Result<()> {
        self.send(Command::ServiceRequest(kind, on))
    }

    pub fn is_service_request_on(&self, kind: ServiceRequest) -> Result<bool> {
        self.query_flag(Query::ServiceRequest(kind))
    }

    pub fn get_model(&self) -> Result<String> {
        self.query(Query::Model)
    }

    pub fn get_revision(&self) -> Result<String> {
        self.query(Query::Revision)
    }

    /// Clears the communication buffer and the operation, alarm and programming registers.
    ///
    /// Registers latch until cleared, so clear before relying on a later read.
    pub fn clear_registers(&self) -> Result<()> {
        self.send(Command::ClearRegisters)
    }

    pub fn get_register_operation(&self) -> Result<String> {
        let reply = self.query(Query::OperationRegister)?;
        Query::OperationRegister.strip(&reply)?;
        Ok(reply)
    }

    pub fn get_register_program(&self) -> Result<String> {
        let reply = self.query(Query::ProgramRegister)?;
        Query::ProgramRegister.strip(&reply)?;
        Ok(reply)
    }

    pub fn get_register_alarm(&self) -> Result<String> {
        let reply = self.query(Query::AlarmRegister)?;
        Query::AlarmRegister.strip(&reply)?;
        Ok(reply)
    }

    /// Diagnostic dump attached to verification failures, as (command, reply) pairs.
    pub fn status(&self) -> Result<Vec<(String, String)>> {
        self.issue_queries(&STATUS_QUERIES)
    }

    /// Every readable setting and register, as (command, reply) pairs.
    pub fn all_statuses(&self) -> Result<Vec<(String, String)>> {
        self.issue_queries(&ALL_STATUS_QUERIES)
    }

    fn issue_queries(&self, queries: &[Query]) -> Result<Vec<(String, String)>> {
        let mut bus = lock(&self.bus)?;
        issue(&mut bus, self.address, queries.iter().map(|q| q.encode()))
    }

    /// Sends raw commands in order and collects their replies.
    ///
    /// Commands ending in `?;` or `!;` are read back; others are paired with `N/A`.
    pub fn issue_commands(&self, commands: &[&str]) -> Result<Vec<(String, String)>> {
        let mut bus = lock(&self.bus)?;
        issue(&mut bus, self.address, commands.iter().copied())
    }
}

/// Reads the [`Zup::status`] battery from `address` without resolving its model.
pub fn read_status(bus: &mut BusSession, address: BusAddress) -> Result<Vec<(String, String)>> {
    issue(bus, address, STATUS_QUERIES.iter().map(|q| q.encode()))
}

fn issue<'a>(
    bus: &mut BusSession,
    address: BusAddress,
    commands: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>> {
    let mut responses = Vec::new();
    for command in commands {
        let response = if Query::expects_reply(command) {
            bus.query(address, command)?
        } else {
            bus.send(address, command)?;
            "N/A".to_string()
        };
        responses.push((command.to_string(), response));
    }
    Ok(responses)
}

impl fmt::Display for Zup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZUP({}) at address {}", self.model.name, self.address)
    }
}

fn check_limit(quantity: Quantity, value: f64, limit: &Limit) -> Result<()> {
    if limit.contains(value) {
        Ok(())
    } else {
        Err(ZupError::OutOfRange {
            quantity,
            value,
            min: limit.min,
            max: limit.max,
        })
    }
}

fn check_present(quantity: Quantity, value: f64, min: f64, max: f64) -> Result<()> {
    if min <= value && value <= max {
        Ok(())
    } else {
        Err(ZupError::Conflict {
            quantity,
            value,
            min,
            max,
        })
    }
}
