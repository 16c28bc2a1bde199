//! Board contract for the bit-banged bus.
//!
//! The driver touches the hardware through this trait only. A bus pin must be
//! wired open-drain style: externally pulled up with a 4.7kOhm resistor, so
//! that releasing the pin ([`Platform::set_input`]) lets the line float high
//! and any device may pull it low.

/// Board-level pin identifier.
pub type PinId = u8;

/// The platform primitives consumed by the driver.
///
/// Pin operations are infallible: a pin that cannot be driven is a wiring
/// fault, not a protocol condition. [`Platform::delay_us`] is a busy-wait and
/// must last *at least* the requested time; a few microseconds of jitter are
/// tolerable at standard speed. [`Platform::now_ms`] must be monotonic.
pub trait Platform {
    /// Prepares the pin for bus usage. Called once per bus creation.
    fn pin_init(&mut self, pin: PinId);

    /// Switches the pin to output. The level is whatever was last written.
    fn set_output(&mut self, pin: PinId);

    /// Releases the pin (tri-state). The pull-up returns the line high.
    fn set_input(&mut self, pin: PinId);

    /// Drives the output level. Only meaningful while the pin is an output.
    fn write(&mut self, pin: PinId, level: bool);

    /// Samples the line.
    fn read(&mut self, pin: PinId) -> bool;

    /// Busy-waits for at least `us` microseconds.
    fn delay_us(&mut self, us: u32);

    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;
}
