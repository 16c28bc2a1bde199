use crate::{
    crc8,
    error::{CrcError, Error},
};
use core::{fmt, str::FromStr};

/// A 64-bit ROM address.
///
/// Byte 0 is the family code, bytes 1..=6 the unique serial number (least
/// significant byte first, as transmitted on the wire), byte 7 the crc of the
/// preceding seven bytes.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Rom([u8; 8]);

impl Rom {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Builds an address from a family code and serial number, filling in the
    /// crc byte.
    pub fn with_crc(family_code: u8, serial: [u8; 6]) -> Self {
        let mut bytes = [0; 8];
        bytes[0] = family_code;
        bytes[1..7].copy_from_slice(&serial);
        bytes[7] = crc8::calculate(&bytes[..7]);
        Self(bytes)
    }

    pub const fn bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub const fn family_code(&self) -> u8 {
        self.0[0]
    }

    /// The 48-bit serial number.
    pub fn serial(&self) -> u64 {
        let mut bytes = [0; 8];
        bytes[..6].copy_from_slice(&self.0[1..7]);
        u64::from_le_bytes(bytes)
    }

    pub const fn crc(&self) -> u8 {
        self.0[7]
    }

    /// Verifies the crc byte against the family code and serial number.
    pub fn check(&self) -> Result<(), CrcError> {
        crc8::check(&self.0)
    }
}

impl fmt::Display for Rom {
    /// Canonical form: `0x28-5F4E3D2C1B0A`, family code first, then the
    /// serial number most significant byte first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04X}-", self.0[0])?;
        for byte in self.0[1..7].iter().rev() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for Rom {
    type Err = Error;

    /// Parses the canonical form (the `0x` prefix and the dash are both
    /// optional): 14 hex digits, family code first, serial number most
    /// significant byte first. The crc byte is computed, not read.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: Vec<_> = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s)
            .chars()
            .filter(|&char| char != '-')
            .map(|char| char.to_digit(16).ok_or(Error::Address))
            .collect::<Result<_, _>>()?;
        if digits.len() != 14 {
            return Err(Error::Address);
        }
        let mut bytes = [0; 8];
        for (index, pair) in digits.chunks(2).enumerate() {
            let byte = (pair[0] << 4 | pair[1]) as u8;
            // the serial number reverses into wire order
            bytes[if index == 0 { 0 } else { 7 - index }] = byte;
        }
        bytes[7] = crc8::calculate(&bytes[..7]);
        Ok(Self(bytes))
    }
}
