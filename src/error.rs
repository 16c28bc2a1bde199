use thiserror::Error;

/// Result
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Error
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// No device answered the reset pulse with a presence pulse.
    #[error("no presence pulse on the bus")]
    ResetFailed,
    /// Both the bit and its complement read back as one during a search pass.
    #[error("conflicting bits during search")]
    DataRead,
    #[error(transparent)]
    Crc(#[from] CrcError),
    /// The bus id does not name a created bus.
    #[error("unknown bus")]
    InvalidBus,
    /// The bus is sourcing strong pullup; traffic would collide with it.
    #[error("bus is powered")]
    BusPowered,
    #[error("invalid request")]
    InvalidRequest,
    /// Every in-flight conversion slot is taken.
    #[error("no free conversion slots")]
    NoSlots,
    /// Every bus slot is taken.
    #[error("all bus slots are in use")]
    Full,
    #[error("unsupported family code {{ family_code={0:#04x} }}")]
    Family(u8),
    #[error("malformed ROM address string")]
    Address,
}

/// The CRC error
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("unexpected CRC {{ crc={crc}, expected=0 }}")]
pub struct CrcError {
    pub(crate) crc: u8,
}
