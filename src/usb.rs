//! USB chapter 9 protocol definitions
//!
//! Only the subset needed to talk to an EHCI debug gadget is defined
//! here: standard request codes, request-type bits, the DATA toggle PID
//! tokens and the debug descriptor layout.
//!
//! # References
//! - USB 2.0 Specification, chapter 9
//! - EHCI Specification 1.0, appendix C (Debug Port)

use zerocopy::{FromBytes, Immutable, KnownLayout};

/// bmRequestType bit fields
pub mod req_type {
    /// Device-to-host (IN) data stage
    pub const DIR_IN: u8 = 0x80;
    /// Host-to-device (OUT) data stage
    pub const DIR_OUT: u8 = 0x00;
    /// Standard request
    pub const TYPE_STANDARD: u8 = 0 << 5;
    /// Class request
    pub const TYPE_CLASS: u8 = 1 << 5;
    /// Recipient: device
    pub const RCPT_DEVICE: u8 = 0;
    /// Recipient: other (a hub's downstream port)
    pub const RCPT_OTHER: u8 = 3;
}

/// Standard request codes
pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_CONFIGURATION: u8 = 0x09;
}

/// Descriptor type codes
pub mod desc_type {
    /// Debug descriptor
    pub const DEBUG: u8 = 0x0A;
}

/// Feature selectors for device-recipient SET_FEATURE
pub mod feature {
    /// DEVICE_DEBUG_MODE, arms the debug endpoints
    pub const DEVICE_DEBUG_MODE: u16 = 6;
}

/// DATA toggle PID token values
///
/// The debug-port data register takes the literal token byte, so the
/// pipe state keeps the encoded form rather than a bool.
pub mod pid {
    pub const DATA0: u8 = 0xC3;
    pub const DATA1: u8 = 0x4B;
}

/// Well-known address the debug device is moved to once located.
///
/// An intermediate hub, when present, gets `USB_DEBUG_DEVNUM - 1`.
pub const USB_DEBUG_DEVNUM: u8 = 127;

/// Debug descriptor as returned by GET_DESCRIPTOR(DEBUG)
///
/// Names the two bulk endpoints the debug console runs over.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct DebugDescriptor {
    /// bLength, must equal [`DebugDescriptor::SIZE`]
    pub length: u8,
    /// bDescriptorType, must equal [`desc_type::DEBUG`]
    pub descriptor_type: u8,
    /// Bulk IN endpoint number for debug traffic
    pub debug_in_endpoint: u8,
    /// Bulk OUT endpoint number for debug traffic
    pub debug_out_endpoint: u8,
}

impl DebugDescriptor {
    /// Wire size of the descriptor.
    pub const SIZE: usize = size_of::<Self>();

    /// Parse a descriptor out of a fully transferred buffer.
    ///
    /// Returns `None` when the length field or the type tag does not
    /// match what a debug descriptor must carry.
    pub fn parse(buf: &[u8; Self::SIZE]) -> Option<Self> {
        let desc = Self::read_from_bytes(buf.as_slice()).ok()?;
        if desc.length as usize != Self::SIZE || desc.descriptor_type != desc_type::DEBUG {
            return None;
        }
        Some(desc)
    }
}
