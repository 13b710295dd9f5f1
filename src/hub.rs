//! Intermediate hub traversal
//!
//! When the debug device sits behind a hub, the hub's downstream port
//! has to be powered, reset and enabled before the device answers on
//! the bus. Only the minimal subset of the hub class protocol that an
//! otherwise unconfigured hub accepts is used here.

use log::debug;

use crate::controller::{DebugPort, UsbError};
use crate::usb::{req_type, request};

/// Hub port feature selectors.
///
/// The same values double as bit positions inside the 4-byte
/// wPortStatus/wPortChange bitmap a GET_STATUS on the port returns.
pub mod port_feature {
    /// A device is present on the port
    pub const CONNECTION: u8 = 0;
    /// Port is enabled
    pub const ENABLED: u8 = 1;
    /// Reset signaling is in progress
    pub const RESET: u8 = 4;
    /// Port power is on
    pub const POWER: u8 = 8;
    /// Connection status changed
    pub const C_CONNECTION: u8 = 16;
    /// Reset sequencing completed
    pub const C_RESET: u8 = 20;
}

/// Attempts per status wait loop; with the 10 ms cadence this bounds
/// each wait to roughly one second.
const PORT_POLL_ATTEMPTS: u32 = 100;

/// Delay before each status poll, in milliseconds.
const PORT_POLL_DELAY_MS: u32 = 10;

/// Test one feature bit of a 4-byte port status bitmap.
pub fn port_feature_set(status: &[u8; 4], feature: u8) -> bool {
    status[(feature >> 3) as usize] & (1 << (feature & 0x7)) != 0
}

/// Bring one downstream hub port into the connected and enabled state.
///
/// The hub is expected to still sit at the default address; it is
/// assigned `hub_addr` and put into configuration 1 first, then the
/// 1-based `hub_port` is powered and reset. Any failing transfer or
/// exhausted wait aborts immediately.
pub fn enable_hub_port<P: DebugPort>(
    port: &mut P,
    hub_addr: u8,
    hub_port: u8,
) -> Result<(), UsbError> {
    let mut status = [0u8; 4];

    // Assign a device number to the hub.
    port.control_transfer(
        0,
        req_type::DIR_OUT | req_type::TYPE_STANDARD | req_type::RCPT_DEVICE,
        request::SET_ADDRESS,
        hub_addr as u16,
        0,
        None,
    )?;

    // Enter the configured state on the hub.
    port.control_transfer(
        hub_addr,
        req_type::DIR_OUT | req_type::TYPE_STANDARD | req_type::RCPT_DEVICE,
        request::SET_CONFIGURATION,
        1,
        0,
        None,
    )?;

    // Power the port, then wait for a connection.
    set_port_feature(port, hub_addr, hub_port, port_feature::POWER)?;
    wait_port_feature(port, hub_addr, hub_port, &mut status, port_feature::CONNECTION)?;
    clear_port_feature(port, hub_addr, hub_port, port_feature::C_CONNECTION)?;

    // Reset the port and wait for the reset to complete.
    set_port_feature(port, hub_addr, hub_port, port_feature::RESET)?;
    wait_port_feature(port, hub_addr, hub_port, &mut status, port_feature::C_RESET)?;
    clear_port_feature(port, hub_addr, hub_port, port_feature::C_RESET)?;

    // The enable state is reported in the same status word the reset
    // wait last fetched.
    if port_feature_set(&status, port_feature::ENABLED) {
        Ok(())
    } else {
        debug!("hub port {} not enabled after reset", hub_port);
        Err(UsbError::NotReady)
    }
}

fn set_port_feature<P: DebugPort>(
    port: &mut P,
    hub_addr: u8,
    hub_port: u8,
    feature: u8,
) -> Result<(), UsbError> {
    port.control_transfer(
        hub_addr,
        req_type::DIR_OUT | req_type::TYPE_CLASS | req_type::RCPT_OTHER,
        request::SET_FEATURE,
        feature as u16,
        hub_port as u16,
        None,
    )?;
    Ok(())
}

fn clear_port_feature<P: DebugPort>(
    port: &mut P,
    hub_addr: u8,
    hub_port: u8,
    feature: u8,
) -> Result<(), UsbError> {
    port.control_transfer(
        hub_addr,
        req_type::DIR_OUT | req_type::TYPE_CLASS | req_type::RCPT_OTHER,
        request::CLEAR_FEATURE,
        feature as u16,
        hub_port as u16,
        None,
    )?;
    Ok(())
}

/// Poll the port status until `feature` reads as set.
///
/// The last fetched bitmap stays in `status` for the caller to inspect
/// further.
fn wait_port_feature<P: DebugPort>(
    port: &mut P,
    hub_addr: u8,
    hub_port: u8,
    status: &mut [u8; 4],
    feature: u8,
) -> Result<(), UsbError> {
    for _ in 0..PORT_POLL_ATTEMPTS {
        port.delay_ms(PORT_POLL_DELAY_MS);
        port.control_transfer(
            hub_addr,
            req_type::DIR_IN | req_type::TYPE_CLASS | req_type::RCPT_OTHER,
            request::GET_STATUS,
            0,
            hub_port as u16,
            Some(&mut status[..]),
        )?;
        if port_feature_set(status, feature) {
            return Ok(());
        }
    }
    debug!(
        "hub port {} status bit {} never came up",
        hub_port, feature
    );
    Err(UsbError::Timeout)
}
