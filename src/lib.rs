//! Bit-banged 1-Wire bus driver with a temperature conversion scheduler.
//!
//! The driver owns up to [`MAX_BUS`] single-pin multi-drop buses. On each it
//! performs device enumeration (the Search ROM tree walk), transactional
//! reads and writes of arbitrary device commands, the parasite power probe
//! and the strong pullup parasite powered devices draw current from. Layered
//! on top, DS18x20 family temperature conversions run without blocking: a
//! read arms a deadline and the host main loop calls [`OneWire::process`] to
//! collect results when the device specific conversion time has elapsed.
//!
//! The hardware is reached through the [`Platform`] trait only; each bus pin
//! must be externally pulled up with a 4.7kOhm resistor. Everything runs on
//! the caller's thread: bus operations block for their full wire time
//! (a reset is about 1ms, a byte about 0.5ms) and callbacks run inside
//! `process`.

pub use self::{
    bus::{Command, MAX_DEVICES},
    error::{Error, Result},
    pin::{PinId, Platform},
    rom::Rom,
    scratchpad::{ConfigurationRegister, Resolution, Scratchpad},
    sensor::{Callback, MAX_READS, Sensor, family},
};

use self::{bus::Bus, sensor::Pending};
use log::debug;

/// Number of bus slots.
pub const MAX_BUS: usize = 5;

/// Bus identifier, handed out by [`OneWire::create`].
pub type BusId = u8;

/// The driver: a fixed table of bus slots plus the in-flight conversion
/// table.
///
/// Single-threaded by design; there is no interior locking. Dropping the
/// driver releases every roster and pending slot.
pub struct OneWire<P> {
    pub(crate) platform: P,
    pub(crate) buses: [Option<Bus>; MAX_BUS],
    pub(crate) pending: [Option<Pending<P>>; MAX_READS],
}

impl<P: Platform> OneWire<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            buses: [const { None }; MAX_BUS],
            pending: core::array::from_fn(|_| None),
        }
    }

    /// Claims the first free bus slot for a bus on the given pin.
    pub fn create(&mut self, pin: PinId) -> Result<BusId> {
        let slot = self
            .buses
            .iter()
            .position(Option::is_none)
            .ok_or(Error::Full)?;
        self.platform.pin_init(pin);
        self.buses[slot] = Some(Bus::new(pin));
        debug!("bus created {{ bus={slot}, pin={pin} }}");
        Ok(slot as _)
    }

    /// Releases a bus slot and its roster. Unknown ids are ignored.
    ///
    /// Destroying a bus while one of its conversions is in flight is a
    /// contract violation; drain with [`OneWire::process`] first.
    pub fn destroy(&mut self, bus: BusId) {
        if let Some(slot) = self.buses.get_mut(usize::from(bus))
            && slot.take().is_some()
        {
            debug!("bus destroyed {{ bus={bus} }}");
        }
    }

    /// Enumerates the bus and replaces its roster.
    ///
    /// Returns the number of devices whose ROM passed its crc check; a
    /// failing device is dropped from the roster without aborting the walk.
    /// On error the previous roster stays in place.
    pub fn scan(&mut self, bus: BusId) -> Result<usize> {
        let (bus, platform) = self.ready(bus)?;
        bus.scan(platform)
    }

    /// The ROM address at `index` in the roster of the most recent scan.
    pub fn device(&self, bus: BusId, index: usize) -> Option<&Rom> {
        self.buses
            .get(usize::from(bus))?
            .as_ref()?
            .device(index)
    }

    /// Transactional read: reset, address (match when given, skip
    /// otherwise), send `command`, then fill `buffer` from the wire. Payload
    /// integrity is the caller's business.
    pub fn read(
        &mut self,
        bus: BusId,
        address: Option<&Rom>,
        command: u8,
        buffer: &mut [u8],
    ) -> Result<()> {
        let (bus, platform) = self.ready(bus)?;
        bus.select(platform, address)?;
        bus.write_byte(platform, command);
        for byte in buffer {
            *byte = bus.read_byte(platform);
        }
        Ok(())
    }

    /// Transactional write: reset, address, send `command`, then `payload`.
    pub fn write(
        &mut self,
        bus: BusId,
        address: Option<&Rom>,
        command: u8,
        payload: &[u8],
    ) -> Result<()> {
        let (bus, platform) = self.ready(bus)?;
        bus.select(platform, address)?;
        bus.write_byte(platform, command);
        for &byte in payload {
            bus.write_byte(platform, byte);
        }
        Ok(())
    }

    /// Whether the addressed device (or, without an address, any device on
    /// the bus) requires parasite power. The probe result is cached; repeat
    /// calls stay off the wire.
    pub fn parasite(&mut self, bus: BusId, address: Option<&Rom>) -> Result<bool> {
        let (bus, platform) = self.ready(bus)?;
        bus.parasite(platform, address)
    }

    /// Strong pullup. While it is on the bus refuses all other traffic.
    pub fn power(&mut self, bus: BusId, on: bool) -> Result<()> {
        let (bus, platform) = self.parts(bus)?;
        bus.power(platform, on)
    }

    /// Whether the bus is currently sourcing strong pullup.
    pub fn powered(&self, bus: BusId) -> bool {
        self.buses
            .get(usize::from(bus))
            .and_then(Option::as_ref)
            .is_some_and(Bus::powered)
    }

    fn parts(&mut self, bus: BusId) -> Result<(&mut Bus, &mut P)> {
        let Self {
            platform, buses, ..
        } = self;
        let bus = buses
            .get_mut(usize::from(bus))
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidBus)?;
        Ok((bus, platform))
    }

    /// Like [`OneWire::parts`], refusing buses that hold strong pullup.
    fn ready(&mut self, bus: BusId) -> Result<(&mut Bus, &mut P)> {
        let (bus, platform) = self.parts(bus)?;
        if bus.powered() {
            return Err(Error::BusPowered);
        }
        Ok((bus, platform))
    }
}

pub mod bus;
pub mod crc8;
pub mod error;
pub mod pin;
pub mod rom;
pub mod scratchpad;
pub mod sensor;
