//! Addressing on a shared multi-drop bus.
//!
//! Only one supply on a bus listens at a time. A supply keeps listening until another one is
//! addressed, so `:ADRnn;` is only sent when the target changes. The ZUp needs time to process
//! every command (manual section 5.6.1): at least 10 ms before an address command, 30 ms after
//! it, and about 15 ms after any other command. Sending faster silently drops or garbles
//! commands, so the delays below include a 5 ms margin and are not configurable.

use crate::command::Command;
use crate::connection::Connection;
use crate::error::{Result, ZupError};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

pub const PRE_ADDRESS_DELAY: Duration = Duration::from_millis(15);
pub const POST_ADDRESS_DELAY: Duration = Duration::from_millis(35);
pub const COMMAND_DELAY: Duration = Duration::from_millis(20);

/// Address of one supply on a bus, `1..=31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusAddress(u8);

impl BusAddress {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 31;

    pub fn new(address: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&address) {
            Ok(BusAddress(address))
        } else {
            Err(ZupError::InvalidAddress(address))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for BusAddress {
    type Error = ZupError;

    fn try_from(address: u8) -> Result<Self> {
        BusAddress::new(address)
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bus session shared by every [`crate::Zup`] on the same port.
pub type SharedBus = Arc<Mutex<BusSession>>;

/// Locks a shared bus for one exchange.
pub fn lock(bus: &SharedBus) -> Result<MutexGuard<'_, BusSession>> {
    bus.lock().map_err(|_e| {
        ZupError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "Bus session mutex poisoned",
        ))
    })
}

/// One physical bus: its connection plus the address currently listening.
pub struct BusSession {
    connection: Box<dyn Connection>,
    listening: Option<BusAddress>,
}

impl BusSession {
    pub fn new(connection: Box<dyn Connection>) -> Self {
        BusSession {
            connection,
            listening: None,
        }
    }

    pub fn shared(connection: Box<dyn Connection>) -> SharedBus {
        Arc::new(Mutex::new(BusSession::new(connection)))
    }

    /// Opens a serial port and wraps it in a shared session.
    #[cfg(feature = "serial")]
    pub fn open_serial(port_name: &str, baud_rate: u32) -> Result<SharedBus> {
        let connection = crate::connection::SerialConnection::new(port_name, baud_rate)?;
        Ok(BusSession::shared(Box::new(connection)))
    }

    pub fn listening(&self) -> Option<BusAddress> {
        self.listening
    }

    pub fn port_name(&self) -> &str {
        self.connection.port_name()
    }

    pub fn set_timeout(&mut self, duration: Duration) -> Result<()> {
        self.connection.set_timeout(duration)
    }

    /// Keeps the bus idle, e.g. while outputs settle.
    pub fn settle(&mut self, duration: Duration) {
        self.connection.pause(duration);
    }

    fn select(&mut self, address: BusAddress) -> Result<()> {
        if self.listening == Some(address) {
            return Ok(());
        }
        // Unknown until the address command has gone out in full.
        self.listening = None;
        let command = Command::Address(address).encode();
        debug!(port = self.connection.port_name(), %address, "addressing");
        self.connection.pause(PRE_ADDRESS_DELAY);
        self.connection.write_command(&command)?;
        self.connection.pause(POST_ADDRESS_DELAY);
        self.listening = Some(address);
        Ok(())
    }

    /// Sends a command that produces no reply to the supply at `address`.
    pub fn send(&mut self, address: BusAddress, command: &str) -> Result<()> {
        self.select(address)?;
        debug!(port = self.connection.port_name(), %address, command, "send");
        self.connection.write_command(command)?;
        self.connection.pause(COMMAND_DELAY);
        Ok(())
    }

    /// Sends a query to the supply at `address` and reads its one-line reply.
    pub fn query(&mut self, address: BusAddress, command: &str) -> Result<String> {
        self.send(address, command)?;
        let reply = self.connection.read_response().map_err(|e| match e {
            ZupError::Io(ref io) if io.kind() == std::io::ErrorKind::TimedOut => {
                ZupError::DeviceNotResponding {
                    address,
                    command: command.to_string(),
                }
            }
            other => other,
        })?;
        debug!(port = self.connection.port_name(), %address, command, reply = %reply, "reply");
        Ok(reply)
    }
}
