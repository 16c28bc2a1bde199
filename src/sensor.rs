//! DS18x20 temperature sensors and the conversion scheduler.
//!
//! A conversion is not signalled by the device; it is done when the family
//! and resolution dependent time has elapsed. [`OneWire::read_temperature`]
//! issues ConvertTemperature and arms a deadline; the host drives
//! [`OneWire::process`] from its main loop, which reads the scratchpad of
//! every expired conversion and hands the decoded temperature to the
//! callback. Callbacks run on the caller's stack inside `process` and may
//! freely start bus traffic of their own.

use crate::{
    BusId, OneWire,
    bus::Command,
    error::{Error, Result},
    pin::Platform,
    rom::Rom,
    scratchpad::{self, ConfigurationRegister, Resolution, Scratchpad},
};
use log::debug;
use std::{cell::Cell, rc::Rc};

/// Number of in-flight conversion slots shared by all buses.
pub const MAX_READS: usize = 8;

/// Family codes of the supported sensors.
pub mod family {
    pub const DS18S20: u8 = 0x10;
    pub const DS1822: u8 = 0x22;
    pub const DS18B20: u8 = 0x28;
    pub const MAX31826: u8 = 0x3B;
}

/// Completion continuation of an asynchronous temperature read.
///
/// Invoked exactly once, from inside [`OneWire::process`], with the driver
/// borrowed back so the continuation can issue follow-up operations.
pub type Callback<P> = Box<dyn FnOnce(&mut OneWire<P>, Result<f32>)>;

/// A temperature sensor on a bus.
///
/// Holds the bus id and optionally the ROM address (without an address the
/// sensor is reached by skip-ROM, which assumes it is alone on its bus). The
/// sensor borrows the bus by id only; destroying a bus with live sensors is a
/// contract violation the caller must prevent.
#[derive(Debug)]
pub struct Sensor {
    bus: BusId,
    address: Option<Rom>,
    family_code: u8,
    resolution: Resolution,
    delay: u16,
    busy: Rc<Cell<bool>>,
}

impl Sensor {
    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn address(&self) -> Option<&Rom> {
        self.address.as_ref()
    }

    pub fn family_code(&self) -> u8 {
        self.family_code
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Conversion time (ms) a read of this sensor waits for.
    pub fn conversion_delay(&self) -> u16 {
        self.delay
    }

    /// A conversion is in flight and its callback has not run yet.
    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }
}

/// An armed conversion.
pub(crate) struct Pending<P> {
    bus: BusId,
    address: Option<Rom>,
    deadline: u64,
    callback: Callback<P>,
    busy: Rc<Cell<bool>>,
}

/// Conversion time (ms) by family. The DS18x20 families scale with the
/// configured resolution; the MAX31826 always converts at 12 bits.
fn conversion_delay(family_code: u8, resolution: Resolution) -> Result<u16> {
    match family_code {
        family::DS18S20 | family::DS1822 | family::DS18B20 => Ok(resolution.conversion_time()),
        family::MAX31826 => Ok(150),
        family_code => Err(Error::Family(family_code)),
    }
}

impl<P: Platform> OneWire<P> {
    /// Sets up a sensor.
    ///
    /// Reads the scratchpad to learn the current resolution (the crc must
    /// hold), then reconfigures the device if a different resolution was
    /// requested. Without an address the device is reached by skip-ROM and
    /// assumed to be a DS18B20.
    pub fn sensor(
        &mut self,
        bus: BusId,
        address: Option<Rom>,
        resolution: Option<Resolution>,
    ) -> Result<Sensor> {
        let family_code = address.map_or(family::DS18B20, |address| address.family_code());
        // an unsupported family is refused before any wire traffic
        conversion_delay(family_code, resolution.unwrap_or_default())?;
        let mut buffer = [0; scratchpad::LENGTH];
        self.read(bus, address.as_ref(), Command::ReadScratchpad as _, &mut buffer)?;
        let scratchpad = Scratchpad::parse(&buffer)?;
        let mut resolution = match resolution {
            Some(requested)
                if requested != scratchpad.configuration_register.resolution
                    && family_code != family::MAX31826 =>
            {
                self.configure(bus, address.as_ref(), requested)?;
                requested
            }
            _ => scratchpad.configuration_register.resolution,
        };
        if family_code == family::MAX31826 {
            resolution = Resolution::Twelve;
        }
        Ok(Sensor {
            bus,
            address,
            family_code,
            resolution,
            delay: conversion_delay(family_code, resolution)?,
            busy: Rc::new(Cell::new(false)),
        })
    }

    /// Writes TH, TL and the configuration register. The alarm triggers are
    /// parked wide open; only the resolution matters here.
    fn configure(
        &mut self,
        bus: BusId,
        address: Option<&Rom>,
        resolution: Resolution,
    ) -> Result<()> {
        let payload = [0xFF, 0xFF, ConfigurationRegister { resolution }.into()];
        self.write(bus, address, Command::WriteScratchpad as _, &payload)
    }

    /// Starts a conversion and arms its deadline.
    ///
    /// Returns promptly; the result reaches `callback` from a later
    /// [`OneWire::process`] call. If the device is parasite powered (per the
    /// cached probe, taken on first use) the bus is strong pulled for the
    /// whole conversion window and refuses other traffic until the deadline.
    /// On error nothing stays armed: the slot and the sensor are released and
    /// the callback is dropped unrun.
    pub fn read_temperature(
        &mut self,
        sensor: &Sensor,
        callback: impl FnOnce(&mut OneWire<P>, Result<f32>) + 'static,
    ) -> Result<()> {
        if sensor.busy.get() {
            return Err(Error::InvalidRequest);
        }
        let slot = self
            .pending
            .iter()
            .position(Option::is_none)
            .ok_or(Error::NoSlots)?;
        // the slot and the sensor are held for the whole wire sequence and
        // released again if any part of it fails
        sensor.busy.set(true);
        self.pending[slot] = Some(Pending {
            bus: sensor.bus,
            address: sensor.address,
            // armed below, once the wire sequence went through
            deadline: u64::MAX,
            callback: Box::new(callback),
            busy: Rc::clone(&sensor.busy),
        });
        match self.start_conversion(sensor) {
            Ok(()) => {
                let deadline = self.platform.now_ms() + u64::from(sensor.delay);
                if let Some(pending) = self.pending[slot].as_mut() {
                    pending.deadline = deadline;
                }
                debug!(
                    "conversion armed {{ bus={}, slot={slot}, deadline={deadline} }}",
                    sensor.bus,
                );
                Ok(())
            }
            Err(error) => {
                self.pending[slot] = None;
                sensor.busy.set(false);
                Err(error)
            }
        }
    }

    /// Convert-T, plus the strong pullup a parasite powered device draws its
    /// conversion current from.
    fn start_conversion(&mut self, sensor: &Sensor) -> Result<()> {
        self.write(
            sensor.bus,
            sensor.address.as_ref(),
            Command::ConvertTemperature as _,
            &[],
        )?;
        if self.parasite(sensor.bus, sensor.address.as_ref())? {
            self.power(sensor.bus, true)?;
        }
        Ok(())
    }

    /// Scheduler tick, to be called from the host main loop.
    ///
    /// Completes every expired conversion, earliest deadline first (slot
    /// order breaks ties): releases strong pullup if the bus holds it, reads
    /// and verifies the scratchpad and runs the callback. The slot is vacated
    /// and the sensor freed before the callback runs, so a callback may
    /// immediately request the next read.
    pub fn process(&mut self) {
        loop {
            let now = self.platform.now_ms();
            let expired = self
                .pending
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    slot.as_ref()
                        .filter(|pending| pending.deadline <= now)
                        .map(|pending| (pending.deadline, index))
                })
                .min();
            let Some((deadline, index)) = expired else {
                break;
            };
            let Some(pending) = self.pending[index].take() else {
                break;
            };
            let outcome = self.collect(pending.bus, pending.address.as_ref());
            pending.busy.set(false);
            debug!(
                "conversion done {{ bus={}, slot={index}, deadline={deadline}, ok={} }}",
                pending.bus,
                outcome.is_ok(),
            );
            (pending.callback)(self, outcome);
        }
    }

    fn collect(&mut self, bus: BusId, address: Option<&Rom>) -> Result<f32> {
        if self.powered(bus) {
            self.power(bus, false)?;
        }
        let mut buffer = [0; scratchpad::LENGTH];
        self.read(bus, address, Command::ReadScratchpad as _, &mut buffer)?;
        let scratchpad = Scratchpad::parse(&buffer)?;
        Ok(scratchpad.temperature)
    }
}
