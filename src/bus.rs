//! Wire-level engine for a single bus.
//!
//! Standard speed timing only. Every transaction starts with a reset pulse
//! and the presence check; bytes travel least significant bit first. The pin
//! is left driven high between slots and released when the engine is idle or
//! listening.

use crate::{
    crc8,
    error::{Error, Result},
    pin::{PinId, Platform},
    rom::Rom,
};
use log::debug;

/// Upper bound on roster size; enumeration stops once a scan has filled it.
pub const MAX_DEVICES: usize = 16;

/// Command codes
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum Command {
    /// Obtain IDs of all devices on the bus
    Search = 0xF0,
    /// Identification, single device only
    ReadRom = 0x33,
    /// Address a specific device
    MatchRom = 0x55,
    /// Skip addressing
    SkipRom = 0xCC,
    /// Conditional search for all devices in an alarm state
    SearchAlarm = 0xEC,
    ConvertTemperature = 0x44,
    WriteScratchpad = 0x4E,
    ReadScratchpad = 0xBE,
    CopyScratchpad = 0x48,
    RecallE2Memory = 0xB8,
    ReadPowerSupply = 0xB4,
}

/// A device enrolled by the most recent scan.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Device {
    pub(crate) rom: Rom,
    /// Cached ReadPowerSupply outcome, `None` until probed.
    pub(crate) parasite: Option<bool>,
}

/// One bus slot: the pin it is wired to, the device roster and the search
/// state that persists across the passes of a scan.
#[derive(Debug)]
pub(crate) struct Bus {
    pin: PinId,
    devices: Vec<Device>,
    /// Cached skip-ROM ReadPowerSupply outcome for the whole bus.
    parasite: Option<bool>,
    powered: bool,
    /// ROM under construction. Never cleared between passes: the tie-break
    /// rules read back bits chosen on the previous pass.
    search_rom: [u8; 8],
    last_discrepancy: u8,
}

impl Bus {
    pub(crate) fn new(pin: PinId) -> Self {
        Self {
            pin,
            devices: Vec::new(),
            parasite: None,
            powered: false,
            search_rom: [0; 8],
            last_discrepancy: 0,
        }
    }

    pub(crate) fn powered(&self) -> bool {
        self.powered
    }

    pub(crate) fn device(&self, index: usize) -> Option<&Rom> {
        self.devices.get(index).map(|device| &device.rom)
    }

    /// Reset pulse and presence check.
    ///
    /// Low for 480us, release, sample after 70us (any device pulling the line
    /// low announces itself), then sit out the rest of the 480us recovery
    /// window.
    pub(crate) fn reset(&self, platform: &mut impl Platform) -> bool {
        platform.set_output(self.pin);
        platform.write(self.pin, false);
        platform.delay_us(480);
        platform.set_input(self.pin);
        platform.delay_us(70);
        let presence = !platform.read(self.pin);
        platform.delay_us(410);
        presence
    }

    fn write_bit(&self, platform: &mut impl Platform, bit: bool) {
        platform.set_output(self.pin);
        platform.write(self.pin, false);
        platform.delay_us(3);
        if bit {
            platform.write(self.pin, true);
            platform.delay_us(55);
        } else {
            platform.delay_us(60);
            platform.write(self.pin, true);
            // let the bus float high before the next slot
            platform.delay_us(5);
        }
    }

    fn read_bit(&self, platform: &mut impl Platform) -> bool {
        platform.set_output(self.pin);
        platform.write(self.pin, false);
        platform.delay_us(3);
        platform.set_input(self.pin);
        platform.delay_us(3);
        let bit = platform.read(self.pin);
        platform.delay_us(45);
        bit
    }

    pub(crate) fn write_byte(&self, platform: &mut impl Platform, byte: u8) {
        for index in 0..u8::BITS {
            self.write_bit(platform, byte >> index & 0b1 != 0);
        }
    }

    pub(crate) fn read_byte(&self, platform: &mut impl Platform) -> u8 {
        let mut byte = 0;
        for index in 0..u8::BITS {
            if self.read_bit(platform) {
                byte |= 1 << index;
            }
        }
        byte
    }

    /// Addresses every device at once. Safe only when a single device is
    /// known to be present, or for commands every device may receive.
    fn skip_rom(&self, platform: &mut impl Platform) -> Result<()> {
        if !self.reset(platform) {
            return Err(Error::ResetFailed);
        }
        self.write_byte(platform, Command::SkipRom as _);
        Ok(())
    }

    /// Singles out one device by its 64-bit ROM address.
    fn match_rom(&self, platform: &mut impl Platform, address: &Rom) -> Result<()> {
        if !self.reset(platform) {
            return Err(Error::ResetFailed);
        }
        self.write_byte(platform, Command::MatchRom as _);
        for &byte in address.bytes() {
            self.write_byte(platform, byte);
        }
        Ok(())
    }

    /// Transaction prologue: reset, then match the address if one is given,
    /// skip otherwise.
    pub(crate) fn select(
        &self,
        platform: &mut impl Platform,
        address: Option<&Rom>,
    ) -> Result<()> {
        match address {
            Some(address) => self.match_rom(platform, address),
            None => self.skip_rom(platform),
        }
    }

    /// One pass of the search tree walk: reproduces the ROM found on the
    /// previous pass up to the deepest unexplored fork, takes the other arm
    /// there and follows zeroes below it. The result accumulates in
    /// `self.search_rom`; `self.last_discrepancy` holds the deepest position
    /// where a zero was taken at a fork, and reaches zero when the tree is
    /// exhausted.
    fn find_next(&mut self, platform: &mut impl Platform) -> Result<()> {
        if !self.reset(platform) {
            return Err(Error::ResetFailed);
        }
        self.write_byte(platform, Command::Search as _);
        let mut discrepancy_marker = 0;
        for index in 1..=64u8 {
            let byte = usize::from(index - 1) / 8;
            let mask: u8 = 1 << ((index - 1) % 8);
            // every device emits its bit, then the complement
            let bit_a = self.read_bit(platform);
            let bit_b = self.read_bit(platform);
            if bit_a && bit_b {
                // no device is transmitting at all
                return Err(Error::DataRead);
            }
            if bit_a || bit_b {
                // all transmitting devices agree
                if bit_a {
                    self.search_rom[byte] |= mask;
                } else {
                    self.search_rom[byte] &= !mask;
                }
            } else if index == self.last_discrepancy {
                self.search_rom[byte] |= mask;
            } else if index > self.last_discrepancy {
                self.search_rom[byte] &= !mask;
                discrepancy_marker = index;
            } else if self.search_rom[byte] & mask == 0 {
                // the bit kept from the previous pass is a zero: this fork
                // still has an unexplored one-arm
                discrepancy_marker = index;
            }
            // devices whose bit differs drop out for the rest of the pass
            self.write_bit(platform, self.search_rom[byte] & mask != 0);
        }
        self.last_discrepancy = discrepancy_marker;
        crc8::check(&self.search_rom)?;
        Ok(())
    }

    /// Full enumeration. The roster is replaced only when every pass went
    /// through; a device whose ROM fails its crc check is skipped without
    /// aborting the walk.
    pub(crate) fn scan(&mut self, platform: &mut impl Platform) -> Result<usize> {
        let mut found = Vec::new();
        self.last_discrepancy = 0;
        loop {
            match self.find_next(platform) {
                Ok(()) => {
                    let rom = Rom::new(self.search_rom);
                    found.push(Device {
                        rom,
                        parasite: None,
                    });
                }
                Err(Error::Crc(_)) => {}
                Err(error) => return Err(error),
            }
            if self.last_discrepancy == 0 || found.len() >= MAX_DEVICES {
                break;
            }
        }
        debug!("scan of pin {} found {} device(s)", self.pin, found.len());
        self.devices = found;
        Ok(self.devices.len())
    }

    /// ReadPowerSupply probe, cached.
    ///
    /// A parasite powered device holds the read slot low; a self powered one
    /// releases it. The outcome is cached on the bus record for a skip-ROM
    /// probe, or on the roster entry for a matched probe of an enrolled
    /// device, so repeat queries stay off the wire.
    pub(crate) fn parasite(
        &mut self,
        platform: &mut impl Platform,
        address: Option<&Rom>,
    ) -> Result<bool> {
        let cached = match address {
            None => self.parasite,
            Some(address) => self
                .devices
                .iter()
                .find(|device| device.rom == *address)
                .and_then(|device| device.parasite),
        };
        if let Some(required) = cached {
            return Ok(required);
        }
        self.select(platform, address)?;
        self.write_byte(platform, Command::ReadPowerSupply as _);
        let required = !self.read_bit(platform);
        match address {
            None => self.parasite = Some(required),
            Some(address) => {
                if let Some(device) = self
                    .devices
                    .iter_mut()
                    .find(|device| device.rom == *address)
                {
                    device.parasite = Some(required);
                }
            }
        }
        Ok(required)
    }

    /// Turns strong pullup on (pin becomes an output driven high, sourcing
    /// current for parasite powered devices) or off (pin released). Anything
    /// else is refused.
    pub(crate) fn power(&mut self, platform: &mut impl Platform, on: bool) -> Result<()> {
        match (on, self.powered) {
            (true, false) => {
                platform.set_output(self.pin);
                platform.write(self.pin, true);
                self.powered = true;
                Ok(())
            }
            (false, true) => {
                platform.set_input(self.pin);
                self.powered = false;
                Ok(())
            }
            _ => Err(Error::InvalidRequest),
        }
    }
}
