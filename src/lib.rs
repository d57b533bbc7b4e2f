//! Control of TDK-Lambda ZUp power supplies sharing a multi-drop serial bus.
//!
//! A [`bus::BusSession`] owns one port and remembers which supply is listening. Every [`Zup`]
//! on that port shares the session through a [`SharedBus`]. [`PowerSequencer`] brings a group
//! of supplies on or off together and verifies the result.

pub mod bus;
pub mod command;
pub mod connection;
pub mod device;
pub mod error;
pub mod format;
pub mod model;
pub mod sequencer;

#[cfg(test)]
mod mock;

pub use bus::{BusAddress, BusSession, SharedBus};
pub use command::{Foldback, RemoteMode, ServiceRequest};
pub use device::Zup;
pub use error::{Result, ZupError};
pub use model::SupplyModel;
pub use sequencer::{power_off_buses, power_on_buses, PowerPlanEntry, PowerSequencer};
