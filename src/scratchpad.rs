use crate::{crc8, error::Result};

/// Scratchpad size in bytes, crc included.
pub const LENGTH: usize = 9;

/// Scratchpad
///
/// Layout on the wire: temperature LSB, temperature MSB, TH, TL,
/// configuration register, three reserved bytes, crc.
#[derive(Clone, Copy, Debug, Default)]
pub struct Scratchpad {
    pub temperature: f32,
    /// Alarm high trigger register (TH)
    pub alarm_high_trigger_register: i8,
    /// Alarm low trigger register (TL)
    pub alarm_low_trigger_register: i8,
    /// Configuration register
    pub configuration_register: ConfigurationRegister,
    pub crc: u8,
}

impl Scratchpad {
    /// Parses the nine raw bytes read by a ReadScratchpad transaction,
    /// verifying the trailing crc first.
    pub fn parse(buffer: &[u8; LENGTH]) -> Result<Self> {
        crc8::check(buffer)?;
        Ok(Self {
            temperature: temperature(buffer[0], buffer[1]),
            alarm_high_trigger_register: buffer[2] as _,
            alarm_low_trigger_register: buffer[3] as _,
            configuration_register: ConfigurationRegister::from(buffer[4]),
            crc: buffer[8],
        })
    }
}

/// Configuration register
///
/// The resolution lives in bits 5 and 6; the remaining bits are reserved and
/// read as an undefined pattern on some families, so they are masked off
/// rather than matched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigurationRegister {
    pub resolution: Resolution,
}

impl From<u8> for ConfigurationRegister {
    fn from(value: u8) -> Self {
        Self {
            resolution: match (value >> 5) & 0b11 {
                0b00 => Resolution::Nine,
                0b01 => Resolution::Ten,
                0b10 => Resolution::Eleven,
                _ => Resolution::Twelve,
            },
        }
    }
}

impl From<ConfigurationRegister> for u8 {
    fn from(value: ConfigurationRegister) -> Self {
        (value.resolution.bits() - 9) << 5
    }
}

/// Temperature resolution: 9, 10, 11 or 12 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Resolution {
    /// 9-bit, equates to a temperature resolution of 0.5°C
    Nine,
    /// 10-bit, equates to a temperature resolution of 0.25°C
    Ten,
    /// 11-bit, equates to a temperature resolution of 0.125°C
    Eleven,
    /// 12-bit, equates to a temperature resolution of 0.0625°C
    #[default]
    Twelve,
}

impl Resolution {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            9 => Some(Self::Nine),
            10 => Some(Self::Ten),
            11 => Some(Self::Eleven),
            12 => Some(Self::Twelve),
            _ => None,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            Self::Nine => 9,
            Self::Ten => 10,
            Self::Eleven => 11,
            Self::Twelve => 12,
        }
    }

    /// Conversion time (ms) for the DS18x20 families.
    pub fn conversion_time(&self) -> u16 {
        match self {
            Self::Nine => 94,
            Self::Ten => 188,
            Self::Eleven => 375,
            Self::Twelve => 750,
        }
    }
}

/// Decodes the 16-bit little-endian temperature count to °C.
///
/// All supported families share the DS18B20 scaling of 16 counts per degree;
/// the DS18S20 natively steps in 0.5°C and comes out at that granularity.
pub fn temperature(lsb: u8, msb: u8) -> f32 {
    (i16::from_le_bytes([lsb, msb]) as i32 + 8) as f32 / 16.0
}
