use crate::bus::BusAddress;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZupError>;

#[derive(Error, Debug)]
pub enum ZupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Invalid address {0}, must be in range [1..31]")]
    InvalidAddress(u8),

    #[error("Invalid baud rate {0}, must be one of 300, 600, 1200, 2400, 4800 or 9600")]
    InvalidBaudRate(u32),

    #[error("Invalid {quantity} {value}, must always be in range [{min}..{max}]")]
    OutOfRange {
        quantity: Quantity,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid {quantity} {value}, must presently be in range [{min}..{max}]")]
    Conflict {
        quantity: Quantity,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid power plan:\n{0}")]
    InvalidPlan(Violations),

    #[error("Reply to '{command}' should start with '{expected}', got '{reply}'")]
    ProtocolMismatch {
        command: String,
        expected: String,
        reply: String,
    },

    #[error("Unknown ZUP model '{0}'")]
    UnknownModel(String),

    #[error("Supply at address {address} did not reply to '{command}'")]
    DeviceNotResponding { address: BusAddress, command: String },

    #[error("Power verification failed:\n{0}")]
    PowerVerificationFailed(Failures),

    #[error("Setting verification failed:\n{0}")]
    SettingVerificationFailed(Failures),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// A programmable quantity of a supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    UnderVoltageProtection,
    OverVoltageProtection,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
            Quantity::UnderVoltageProtection => "under-voltage protection",
            Quantity::OverVoltageProtection => "over-voltage protection",
        })
    }
}

/// One problem found while validating a power plan, before any supply is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    PlanSize(usize),
    Address(u8),
    DuplicateAddress(u8),
    NotFinite { address: u8, quantity: Quantity },
    Negative { address: u8, quantity: Quantity, value: f64 },
    Envelope {
        address: u8,
        model: String,
        quantity: Quantity,
        value: f64,
        max: f64,
    },
}

impl Violation {
    /// Address the violation refers to, if any.
    pub fn address(&self) -> Option<u8> {
        match self {
            Violation::PlanSize(_) => None,
            Violation::Address(a) | Violation::DuplicateAddress(a) => Some(*a),
            Violation::NotFinite { address, .. }
            | Violation::Negative { address, .. }
            | Violation::Envelope { address, .. } => Some(*address),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::PlanSize(n) => write!(f, "Number of supplies {} must be in range [1..31]", n),
            Violation::Address(a) => write!(f, "Address {} must be in range [1..31]", a),
            Violation::DuplicateAddress(a) => write!(f, "Address {} appears more than once", a),
            Violation::NotFinite { address, quantity } => {
                write!(f, "Address {}: {} must be a finite number", address, quantity)
            }
            Violation::Negative { address, quantity, value } => {
                write!(f, "Address {}: {} {} must not be negative", address, quantity, value)
            }
            Violation::Envelope { address, model, quantity, value, max } => write!(
                f,
                "Address {}: ZUP model {} {} {} outside range [0..{}]",
                address, model, quantity, value, max
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violations(pub Vec<Violation>);

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in &self.0 {
            writeln!(f, "  {}", v)?;
        }
        Ok(())
    }
}

/// A supply whose read-back did not match what was commanded, with its status dump attached.
#[derive(Debug, Clone)]
pub struct VerificationFailure {
    pub address: BusAddress,
    pub expected: String,
    pub actual: String,
    pub status: Vec<(String, String)>,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  Supply at address {}: expected {}, measured {}",
            self.address, self.expected, self.actual
        )?;
        for (command, response) in &self.status {
            writeln!(f, "    {} {}", command, response)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Failures(pub Vec<VerificationFailure>);

impl Failures {
    pub fn addresses(&self) -> Vec<BusAddress> {
        self.0.iter().map(|f| f.address).collect()
    }
}

impl fmt::Display for Failures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in &self.0 {
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}
