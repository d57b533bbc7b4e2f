use std::env;
use std::time::Duration;
use tdk_zup::bus::lock;
use tdk_zup::{BusAddress, BusSession, PowerPlanEntry, PowerSequencer, Zup, ZupError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), ZupError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let port = env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let bus = BusSession::open_serial(&port, 9600)?;
    // Fail fast on a miswired bus instead of waiting out the default timeout.
    lock(&bus)?.set_timeout(Duration::from_secs(2))?;

    let zup = Zup::new(bus.clone(), BusAddress::new(1)?)?;
    println!("{} revision {}", zup, zup.get_revision()?);

    let sequencer = PowerSequencer::new(bus);
    sequencer.power_on(&[
        PowerPlanEntry::new(1, 3.3, 1.0, false),
        PowerPlanEntry::new(2, 5.0, 1.0, true),
    ])?;
    println!("Supplies 1 and 2 on.");

    sequencer.power_off(&[1, 2])?;
    println!("Supplies 1 and 2 off.");
    Ok(())
}
