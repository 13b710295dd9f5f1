//! Boundary between the probe core and the EHCI debug-port hardware
//!
//! The enclosing firmware implements [`DebugPort`] on top of the
//! debug-port register window; the probe core only ever issues
//! synchronous transfers through it and never touches registers
//! directly.

use crate::pipe::Pipe;

/// USB transfer error.
///
/// The probe core treats every variant the same way (the transfer
/// failed and the current step is abandoned); the variants exist so
/// implementations can report what the bus saw and logs stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer did not complete within the per-transfer timeout
    Timeout,
    /// Endpoint answered with a STALL handshake
    Stall,
    /// Transaction error (CRC, babble, missing handshake)
    TransactionError,
    /// Controller or port is not in a usable state
    NotReady,
}

/// Synchronous transfer primitives of one EHCI debug port.
///
/// Every call blocks until the hardware responds or the
/// implementation's own per-transfer timeout elapses. There is no
/// cancellation path.
pub trait DebugPort {
    /// Perform one control transfer against endpoint 0 of `devnum`.
    ///
    /// The data stage direction is encoded in `request_type`. Returns
    /// the number of bytes moved in the data stage.
    fn control_transfer(
        &mut self,
        devnum: u8,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: Option<&mut [u8]>,
    ) -> Result<usize, UsbError>;

    /// Perform one bulk OUT transfer on `pipe`.
    ///
    /// Uses the pipe's current device address and DATA toggle and
    /// advances the toggle on success.
    fn bulk_write(&mut self, pipe: &mut Pipe, data: &[u8]) -> Result<usize, UsbError>;

    /// Busy-wait for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}
