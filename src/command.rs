//! Wire encoding of ZUp commands and decoding of their replies.
//!
//! Every command is `:KEYWORD[argument];`. Every query reply is one line carrying a
//! two-letter prefix followed by the value, e.g. `AV05.12` for `:VOL?;`.

use crate::bus::BusAddress;
use crate::error::{Result, ZupError};

/// Foldback protection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Foldback {
    Release,
    Arm,
    Cancel,
}

impl Foldback {
    fn code(&self) -> u8 {
        match self {
            Foldback::Release => 0,
            Foldback::Arm => 1,
            Foldback::Cancel => 2,
        }
    }
}

/// Who may operate the supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// Front panel only.
    Local,
    /// Programmatic control, front panel still usable.
    RemoteUnlatched,
    /// Programmatic control only, front panel locked out.
    RemoteLatched,
}

impl RemoteMode {
    fn code(&self) -> u8 {
        match self {
            RemoteMode::Local => 0,
            RemoteMode::RemoteUnlatched => 1,
            RemoteMode::RemoteLatched => 2,
        }
    }
}

/// Conditions for which a supply can raise unsolicited service requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRequest {
    OverVoltage,
    OverTemperature,
    Foldback,
}

impl ServiceRequest {
    fn keyword(&self) -> &'static str {
        match self {
            ServiceRequest::OverVoltage => "SRV",
            ServiceRequest::OverTemperature => "SRT",
            ServiceRequest::Foldback => "SRF",
        }
    }
}

/// Commands that change supply state. None of them produce a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Address(BusAddress),
    /// Arguments are already formatted for the supply's model.
    Voltage(String),
    Current(String),
    UnderVoltageProtection(String),
    OverVoltageProtection(String),
    Output(bool),
    Autostart(bool),
    Foldback(Foldback),
    Remote(RemoteMode),
    ServiceRequest(ServiceRequest, bool),
    ClearRegisters,
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Command::Address(address) => format!(":ADR{:02};", address.get()),
            Command::Voltage(arg) => format!(":VOL{};", arg),
            Command::Current(arg) => format!(":CUR{};", arg),
            Command::UnderVoltageProtection(arg) => format!(":UVP{};", arg),
            Command::OverVoltageProtection(arg) => format!(":OVP{};", arg),
            Command::Output(on) => format!(":OUT{};", u8::from(*on)),
            Command::Autostart(on) => format!(":AST{};", u8::from(*on)),
            Command::Foldback(state) => format!(":FLD{};", state.code()),
            Command::Remote(mode) => format!(":RMT{};", mode.code()),
            Command::ServiceRequest(kind, on) => format!(":{}{};", kind.keyword(), u8::from(*on)),
            Command::ClearRegisters => ":DCL;".to_string(),
        }
    }
}

/// Commands that produce exactly one reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    VoltageSet,
    VoltageActual,
    CurrentSet,
    CurrentActual,
    UnderVoltageProtection,
    OverVoltageProtection,
    Output,
    Autostart,
    Foldback,
    Remote,
    ServiceRequest(ServiceRequest),
    Model,
    Revision,
    OperationRegister,
    ProgramRegister,
    AlarmRegister,
}

impl Query {
    pub fn encode(&self) -> &'static str {
        match self {
            Query::VoltageSet => ":VOL!;",
            Query::VoltageActual => ":VOL?;",
            Query::CurrentSet => ":CUR!;",
            Query::CurrentActual => ":CUR?;",
            Query::UnderVoltageProtection => ":UVP?;",
            Query::OverVoltageProtection => ":OVP?;",
            Query::Output => ":OUT?;",
            Query::Autostart => ":AST?;",
            Query::Foldback => ":FLD?;",
            Query::Remote => ":RMT?;",
            Query::ServiceRequest(ServiceRequest::OverVoltage) => ":SRV?;",
            Query::ServiceRequest(ServiceRequest::OverTemperature) => ":SRT?;",
            Query::ServiceRequest(ServiceRequest::Foldback) => ":SRF?;",
            Query::Model => ":MDL?;",
            Query::Revision => ":REV?;",
            Query::OperationRegister => ":STA?;",
            Query::ProgramRegister => ":STP?;",
            Query::AlarmRegister => ":ALM?;",
        }
    }

    /// Prefix every reply to this query starts with. Model and revision replies are free text.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Query::VoltageSet => Some("SV"),
            Query::VoltageActual => Some("AV"),
            Query::CurrentSet => Some("SA"),
            Query::CurrentActual => Some("AA"),
            Query::UnderVoltageProtection => Some("UP"),
            Query::OverVoltageProtection => Some("OP"),
            Query::Output => Some("OT"),
            Query::Autostart => Some("AS"),
            Query::Foldback => Some("FD"),
            Query::Remote => Some("RM"),
            // Service-request replies come back wrapped as a command, e.g. `:QV1;`.
            Query::ServiceRequest(ServiceRequest::OverVoltage) => Some(":QV"),
            Query::ServiceRequest(ServiceRequest::OverTemperature) => Some(":QT"),
            Query::ServiceRequest(ServiceRequest::Foldback) => Some(":QF"),
            Query::Model | Query::Revision => None,
            Query::OperationRegister => Some("OS"),
            Query::ProgramRegister => Some("PS"),
            Query::AlarmRegister => Some("AL"),
        }
    }

    /// Returns the reply with this query's prefix removed.
    pub fn strip<'a>(&self, reply: &'a str) -> Result<&'a str> {
        match self.prefix() {
            None => Ok(reply),
            Some(prefix) => reply.strip_prefix(prefix).ok_or_else(|| self.mismatch(prefix, reply)),
        }
    }

    pub fn decode_float(&self, reply: &str) -> Result<f64> {
        let value = self.strip(reply)?;
        value.trim().parse::<f64>().map_err(|_| ZupError::ProtocolMismatch {
            command: self.encode().to_string(),
            expected: format!("{}<number>", self.prefix().unwrap_or_default()),
            reply: reply.to_string(),
        })
    }

    /// Compares the reply against the literal on/off replies of this query.
    pub fn decode_flag(&self, reply: &str) -> Result<bool> {
        let (on, off) = match self {
            Query::Output => ("OT1", "OT0"),
            Query::Autostart => ("AS1", "AS0"),
            Query::ServiceRequest(ServiceRequest::OverVoltage) => (":QV1;", ":QV0;"),
            Query::ServiceRequest(ServiceRequest::OverTemperature) => (":QT1;", ":QT0;"),
            Query::ServiceRequest(ServiceRequest::Foldback) => (":QF1;", ":QF0;"),
            _ => {
                return Err(ZupError::Parse(format!(
                    "{} does not reply with an on/off flag",
                    self.encode()
                )))
            }
        };
        match reply {
            r if r == on => Ok(true),
            r if r == off => Ok(false),
            _ => Err(self.mismatch(&format!("{}' or '{}", on, off), reply)),
        }
    }

    pub fn decode_foldback(reply: &str) -> Result<Foldback> {
        match reply {
            "FD0" => Ok(Foldback::Release),
            "FD1" => Ok(Foldback::Arm),
            "FD2" => Ok(Foldback::Cancel),
            _ => Err(Query::Foldback.mismatch("FD0', 'FD1' or 'FD2", reply)),
        }
    }

    pub fn decode_remote(reply: &str) -> Result<RemoteMode> {
        match reply {
            "RM0" => Ok(RemoteMode::Local),
            "RM1" => Ok(RemoteMode::RemoteUnlatched),
            "RM2" => Ok(RemoteMode::RemoteLatched),
            _ => Err(Query::Remote.mismatch("RM0', 'RM1' or 'RM2", reply)),
        }
    }

    /// Decodes the output bit of the operation status register, e.g. `OS00010000`.
    pub fn decode_output_bit(reply: &str) -> Result<bool> {
        let bits = Query::OperationRegister.strip(reply)?;
        match bits.as_bytes() {
            [_, _, _, b'1', ..] if bits.len() == 8 => Ok(true),
            [_, _, _, b'0', ..] if bits.len() == 8 => Ok(false),
            _ => Err(Query::OperationRegister.mismatch("OS<8 bits>", reply)),
        }
    }

    fn mismatch(&self, expected: &str, reply: &str) -> ZupError {
        ZupError::ProtocolMismatch {
            command: self.encode().to_string(),
            expected: expected.to_string(),
            reply: reply.to_string(),
        }
    }

    /// Whether a raw command string expects a reply, judged by its `?`/`!` suffix.
    pub fn expects_reply(command: &str) -> bool {
        let body = command.trim_end_matches(';');
        body.ends_with('?') || body.ends_with('!')
    }
}
