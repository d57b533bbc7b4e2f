use crate::error::ZupError;
#[cfg(feature = "serial")]
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

/// Replies can take a while from a struggling supply, so reads wait this long before failing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Baud rates a ZUp supply can be configured for.
pub const BAUD_RATES: [u32; 6] = [300, 600, 1200, 2400, 4800, 9600];

/// A byte-stream duplex channel to one physical bus.
///
/// Commands are written verbatim (the ZUp expects no terminator beyond the `;` inside the
/// command). Replies are read one CR/LF framed line at a time, with the framing removed.
pub trait Connection: Send {
    fn write_command(&mut self, command: &str) -> Result<(), ZupError>;
    /// Reads one reply line. A read that times out before a full line arrives fails with an
    /// [`std::io::ErrorKind::TimedOut`] I/O error.
    fn read_response(&mut self) -> Result<String, ZupError>;
    fn query(&mut self, command: &str) -> Result<String, ZupError> {
        self.write_command(command)?;
        self.read_response()
    }
    fn set_timeout(&mut self, duration: Duration) -> Result<(), ZupError>;
    /// Identity of the physical port, used in logs.
    fn port_name(&self) -> &str;
    /// Holds the bus idle. Every protocol delay goes through here.
    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub fn validate_baud_rate(baud_rate: u32) -> Result<u32, ZupError> {
    if BAUD_RATES.contains(&baud_rate) {
        Ok(baud_rate)
    } else {
        Err(ZupError::InvalidBaudRate(baud_rate))
    }
}

#[cfg(feature = "serial")]
pub struct SerialConnection {
    port: Box<dyn serialport::SerialPort>,
    port_name: String,
}

#[cfg(feature = "serial")]
impl SerialConnection {
    /// Opens `port_name` at 8N1 with XON/XOFF flow control, as the ZUp requires.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self, ZupError> {
        let baud_rate = validate_baud_rate(baud_rate)?;
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::Software)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;
        tracing::debug!(port = port_name, baud_rate, "opened serial port");
        Ok(SerialConnection {
            port,
            port_name: port_name.to_string(),
        })
    }
}

#[cfg(feature = "serial")]
impl Connection for SerialConnection {
    fn write_command(&mut self, command: &str) -> Result<(), ZupError> {
        self.port.write_all(command.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<String, ZupError> {
        let mut serial_buf: Vec<u8> = Vec::new();
        let mut byte_buf = [0; 1];
        loop {
            match self.port.read(&mut byte_buf) {
                Ok(0) => {
                    return Err(ZupError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "serial port closed mid-reply",
                    )));
                }
                Ok(_) => {
                    if byte_buf[0] == b'\n' {
                        break;
                    }
                    if byte_buf[0] != b'\r' {
                        serial_buf.push(byte_buf[0]);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                // A partial line is as useless as no line; both surface as TimedOut.
                Err(e) => return Err(ZupError::Io(e)),
            }
        }
        String::from_utf8(serial_buf)
            .map(|s| s.trim().to_string())
            .map_err(|e| ZupError::Parse(format!("Invalid UTF-8 sequence: {}", e)))
    }

    fn set_timeout(&mut self, duration: Duration) -> Result<(), ZupError> {
        self.port.set_timeout(duration)?;
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }
}
