//! Debug gadget discovery and activation
//!
//! Finds the debug-capable device on the bus, moves it to the
//! well-known debug address, arms its debug mode and populates the
//! pipe table with the console endpoints. The final activation step is
//! the commit point after which the surrounding system may run console
//! traffic through the table; a failed probe never leaves a pipe
//! marked usable.

use log::{debug, info};

use crate::controller::DebugPort;
use crate::hub;
use crate::pipe::{PipeId, PipeStatus, PipeTable};
use crate::usb::{desc_type, feature, pid, req_type, request, DebugDescriptor, USB_DEBUG_DEVNUM};

/// Terminal probe outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// The intermediate hub port could not be powered and enabled
    HubEnableFailed,
    /// No device answered with a valid debug descriptor
    DeviceNotFound,
    /// The device refused the move to the debug address
    AddressAssignFailed,
    /// SET_FEATURE(DEBUG_MODE) was rejected
    DebugModeFailed,
    /// The test write failed even after a configuration attempt
    TestWriteFailed,
}

/// Default per-pipe timeout handed out at configuration time, milliseconds.
const PIPE_TIMEOUT_MS: u32 = 1000;

/// Payload of the pipe validation write.
const TEST_PAYLOAD: &[u8] = b"USB\r\n";

/// Probe and activate the debug gadget behind `port`.
///
/// With `hub_port` nonzero the device is assumed to sit behind an
/// intermediate hub whose 1-based downstream port of that number is
/// traversed first; 0 means the device hangs directly off the debug
/// port. On success the pipe table is fully populated and activated.
pub fn probe_gadget<P: DebugPort>(
    port: &mut P,
    pipes: &mut PipeTable,
    hub_port: u8,
) -> Result<(), ProbeError> {
    if hub_port != 0 {
        if let Err(err) = hub::enable_hub_port(port, USB_DEBUG_DEVNUM - 1, hub_port) {
            info!("Could not enable USB hub on debug port: {:?}", err);
            return Err(ProbeError::HubEnableFailed);
        }
    }

    if let Err(err) = locate_gadget(port, pipes) {
        info!("Could not enable gadget using debug descriptor");
        return Err(err);
    }

    activate_endpoints(pipes);
    Ok(())
}

/// Fetch the debug descriptor from `devnum`.
///
/// A device counts as found only when the transfer moves the full
/// descriptor and both the length field and the type tag validate.
fn fetch_debug_descriptor<P: DebugPort>(port: &mut P, devnum: u8) -> Option<DebugDescriptor> {
    let mut buf = [0u8; DebugDescriptor::SIZE];
    match port.control_transfer(
        devnum,
        req_type::DIR_IN | req_type::TYPE_STANDARD | req_type::RCPT_DEVICE,
        request::GET_DESCRIPTOR,
        (desc_type::DEBUG as u16) << 8,
        0,
        Some(&mut buf),
    ) {
        Ok(n) if n == DebugDescriptor::SIZE => {
            let desc = DebugDescriptor::parse(&buf);
            if desc.is_none() {
                info!("Invalid debug device descriptor");
            }
            desc
        }
        _ => None,
    }
}

/// Find the debug device, move it to the debug address and validate
/// the console OUT pipe with a small write.
fn locate_gadget<P: DebugPort>(port: &mut P, pipes: &mut PipeTable) -> Result<(), ProbeError> {
    // Try the default address first, then the debug address in case an
    // earlier probe already moved the device there.
    let mut devnum = 0;
    let desc = loop {
        if let Some(desc) = fetch_debug_descriptor(port, devnum) {
            break desc;
        }
        if devnum == 0 {
            devnum = USB_DEBUG_DEVNUM;
        } else {
            info!("Could not find attached debug device");
            return Err(ProbeError::DeviceNotFound);
        }
    };

    if devnum != USB_DEBUG_DEVNUM {
        let moved = port.control_transfer(
            devnum,
            req_type::DIR_OUT | req_type::TYPE_STANDARD | req_type::RCPT_DEVICE,
            request::SET_ADDRESS,
            USB_DEBUG_DEVNUM as u16,
            0,
            None,
        );
        if moved.is_err() {
            info!("Could not move attached device to {}", USB_DEBUG_DEVNUM);
            return Err(ProbeError::AddressAssignFailed);
        }
        info!("EHCI debug device renamed to {}", USB_DEBUG_DEVNUM);
    }

    // Arm the debug interface.
    let armed = port.control_transfer(
        USB_DEBUG_DEVNUM,
        req_type::DIR_OUT | req_type::TYPE_STANDARD | req_type::RCPT_DEVICE,
        request::SET_FEATURE,
        feature::DEVICE_DEBUG_MODE,
        0,
        None,
    );
    if armed.is_err() {
        info!("Could not enable EHCI debug device");
        return Err(ProbeError::DebugModeFailed);
    }
    info!("EHCI debug interface enabled");

    pipes[PipeId::ConsoleOut].endpoint = desc.debug_out_endpoint;
    pipes[PipeId::ConsoleIn].endpoint = desc.debug_in_endpoint;

    ack_set_configuration(pipes, USB_DEBUG_DEVNUM, PIPE_TIMEOUT_MS);

    // Validate the OUT pipe with a small write. Devices that stay in
    // the addressed USB state until SET_CONFIGURATION (the FX2 among
    // them) legitimately fail the first attempt, so one configuration
    // round is allowed before giving up.
    let mut configured = false;
    loop {
        match port.bulk_write(&mut pipes[PipeId::ConsoleOut], TEST_PAYLOAD) {
            Ok(_) => break,
            Err(err) => {
                debug!("debug console test write failed: {:?}", err);
                let retry = !configured
                    && port
                        .control_transfer(
                            USB_DEBUG_DEVNUM,
                            req_type::DIR_OUT | req_type::TYPE_STANDARD | req_type::RCPT_DEVICE,
                            request::SET_CONFIGURATION,
                            1,
                            0,
                            None,
                        )
                        .is_ok();
                if !retry {
                    return Err(ProbeError::TestWriteFailed);
                }
                configured = true;
            }
        }
    }
    debug!("Test write done");
    Ok(())
}

/// Fan the negotiated device number out to every assigned pipe and
/// reset the DATA toggles, the endpoint state a freshly configured
/// device starts from. Must run before any transfer on these pipes.
fn ack_set_configuration(pipes: &mut PipeTable, devnum: u8, timeout_ms: u32) {
    for slot in pipes.data_slots_mut() {
        if slot.endpoint != 0 {
            slot.devnum = devnum;
            slot.pid = pid::DATA0;
            slot.timeout_ms = timeout_ms;
        }
    }
}

/// Commit point: mark the control slot and every assigned pipe as
/// ready for console traffic. A slot without an endpoint stays
/// inactive.
fn activate_endpoints(pipes: &mut PipeTable) {
    pipes[PipeId::SetupEp0].status |= PipeStatus::ENABLED | PipeStatus::VALID;
    for slot in pipes.data_slots_mut() {
        if slot.endpoint != 0 {
            slot.status |= PipeStatus::ENABLED | PipeStatus::VALID;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mock::{ControlReply, MockPort};
    use crate::controller::UsbError;

    /// Debug descriptor bytes: length 4, tag 0x0A, IN endpoint 2, OUT
    /// endpoint 1.
    const DESC: [u8; 4] = [4, 0x0A, 0x02, 0x01];

    #[test]
    fn device_found_at_default_address_is_moved_directly() {
        let mut port = MockPort::new().script([ControlReply::data(DESC)]);
        let mut pipes = PipeTable::new();

        locate_gadget(&mut port, &mut pipes).unwrap();

        // No detour through the debug address before SET_ADDRESS.
        assert_eq!(port.count_request(request::GET_DESCRIPTOR), 1);
        assert_eq!(port.control_calls[0].devnum, 0);
        assert_eq!(port.control_calls[1].request, request::SET_ADDRESS);
        assert_eq!(port.control_calls[1].value, USB_DEBUG_DEVNUM as u16);
        assert_eq!(port.control_calls[2].request, request::SET_FEATURE);
        assert_eq!(port.control_calls[2].value, feature::DEVICE_DEBUG_MODE);
        assert_eq!(port.control_calls[2].devnum, USB_DEBUG_DEVNUM);
    }

    #[test]
    fn device_already_at_debug_address_skips_set_address() {
        let mut port = MockPort::new().script([
            ControlReply::err(UsbError::Timeout),
            ControlReply::data(DESC),
        ]);
        let mut pipes = PipeTable::new();

        locate_gadget(&mut port, &mut pipes).unwrap();

        assert_eq!(port.count_request(request::GET_DESCRIPTOR), 2);
        assert_eq!(port.control_calls[1].devnum, USB_DEBUG_DEVNUM);
        assert_eq!(port.count_request(request::SET_ADDRESS), 0);
    }

    #[test]
    fn missing_device_is_terminal_after_two_attempts() {
        // The default reply transfers zero bytes, which never validates
        // as a descriptor.
        let mut port = MockPort::new();
        let mut pipes = PipeTable::new();

        assert_eq!(
            locate_gadget(&mut port, &mut pipes),
            Err(ProbeError::DeviceNotFound)
        );
        assert_eq!(port.control_calls.len(), 2);
        assert!(port.bulk_calls.is_empty());
    }

    #[test]
    fn invalid_descriptor_content_triggers_the_address_retry() {
        let mut port = MockPort::new().script([
            ControlReply::data([4, 0x0B, 0x02, 0x01]),
            ControlReply::data(DESC),
        ]);
        let mut pipes = PipeTable::new();

        locate_gadget(&mut port, &mut pipes).unwrap();
        assert_eq!(port.control_calls[1].devnum, USB_DEBUG_DEVNUM);
    }

    #[test]
    fn relocation_failure_is_terminal() {
        let mut port = MockPort::new().script([
            ControlReply::data(DESC),
            ControlReply::err(UsbError::Stall),
        ]);
        let mut pipes = PipeTable::new();

        assert_eq!(
            locate_gadget(&mut port, &mut pipes),
            Err(ProbeError::AddressAssignFailed)
        );
        assert_eq!(port.control_calls.len(), 2);
    }

    #[test]
    fn debug_mode_failure_is_terminal() {
        let mut port = MockPort::new().script([
            ControlReply::data(DESC),
            ControlReply::ok(),
            ControlReply::err(UsbError::Stall),
        ]);
        let mut pipes = PipeTable::new();

        assert_eq!(
            locate_gadget(&mut port, &mut pipes),
            Err(ProbeError::DebugModeFailed)
        );
        assert!(port.bulk_calls.is_empty());
    }

    #[test]
    fn failed_test_write_is_retried_once_after_set_configuration() {
        let mut port = MockPort::new()
            .script([ControlReply::data(DESC)])
            .script_bulk([Err(UsbError::Stall), Ok(TEST_PAYLOAD.len())]);
        let mut pipes = PipeTable::new();

        locate_gadget(&mut port, &mut pipes).unwrap();

        assert_eq!(port.bulk_calls.len(), 2);
        assert_eq!(port.count_request(request::SET_CONFIGURATION), 1);
        assert_eq!(port.bulk_calls[0].1, TEST_PAYLOAD);
    }

    #[test]
    fn second_write_failure_is_terminal_without_a_third_attempt() {
        let mut port = MockPort::new()
            .script([ControlReply::data(DESC)])
            .script_bulk([Err(UsbError::Stall), Err(UsbError::Stall)]);
        let mut pipes = PipeTable::new();

        assert_eq!(
            locate_gadget(&mut port, &mut pipes),
            Err(ProbeError::TestWriteFailed)
        );
        assert_eq!(port.bulk_calls.len(), 2);
        assert_eq!(port.count_request(request::SET_CONFIGURATION), 1);
    }

    #[test]
    fn set_configuration_failure_skips_the_write_retry() {
        let mut port = MockPort::new()
            .script([
                ControlReply::data(DESC),
                ControlReply::ok(),
                ControlReply::ok(),
                ControlReply::err(UsbError::Stall),
            ])
            .script_bulk([Err(UsbError::Stall)]);
        let mut pipes = PipeTable::new();

        assert_eq!(
            locate_gadget(&mut port, &mut pipes),
            Err(ProbeError::TestWriteFailed)
        );
        assert_eq!(port.bulk_calls.len(), 1);
    }

    #[test]
    fn activation_flags_assigned_slots_and_the_control_slot() {
        let mut pipes = PipeTable::new();
        pipes[PipeId::ConsoleOut].endpoint = 1;

        activate_endpoints(&mut pipes);

        let ready = PipeStatus::ENABLED | PipeStatus::VALID;
        assert_eq!(pipes[PipeId::SetupEp0].status, ready);
        assert_eq!(pipes[PipeId::ConsoleOut].status, ready);
        // Unassigned slot stays inactive.
        assert_eq!(pipes[PipeId::ConsoleIn].status, PipeStatus::empty());
    }

    #[test]
    fn probe_without_hub_skips_hub_traversal() {
        let mut port = MockPort::new().script([ControlReply::data(DESC)]);
        let mut pipes = PipeTable::new();

        probe_gadget(&mut port, &mut pipes, 0).unwrap();

        // First thing on the wire is the descriptor fetch, and no
        // class request ever goes out.
        assert_eq!(port.control_calls[0].request, request::GET_DESCRIPTOR);
        assert!(port
            .control_calls
            .iter()
            .all(|c| c.request_type & req_type::TYPE_CLASS == 0));
    }

    #[test]
    fn probe_end_to_end_populates_and_activates_the_table() {
        let mut port = MockPort::new().script([ControlReply::data(DESC)]);
        let mut pipes = PipeTable::new();

        probe_gadget(&mut port, &mut pipes, 0).unwrap();

        assert_eq!(pipes[PipeId::ConsoleOut].endpoint, 1);
        assert_eq!(pipes[PipeId::ConsoleIn].endpoint, 2);
        assert_eq!(pipes[PipeId::ConsoleOut].devnum, USB_DEBUG_DEVNUM);
        assert_eq!(pipes[PipeId::ConsoleIn].devnum, USB_DEBUG_DEVNUM);
        assert_eq!(pipes[PipeId::ConsoleOut].timeout_ms, 1000);
        assert!(pipes[PipeId::ConsoleOut].is_active());
        assert!(pipes[PipeId::ConsoleIn].is_active());
        // The successful test write advanced the OUT toggle.
        assert_eq!(pipes[PipeId::ConsoleOut].pid, pid::DATA1);
        assert_eq!(pipes[PipeId::ConsoleIn].pid, pid::DATA0);
    }

    #[test]
    fn probe_with_hub_runs_traversal_first() {
        let mut port = MockPort::new().script([
            ControlReply::ok(),
            ControlReply::ok(),
            ControlReply::ok(),
            ControlReply::data([0x01, 0x00, 0x00, 0x00]),
            ControlReply::ok(),
            ControlReply::ok(),
            ControlReply::data([0x03, 0x00, 0x10, 0x00]),
            ControlReply::ok(),
            ControlReply::data(DESC),
        ]);
        let mut pipes = PipeTable::new();

        probe_gadget(&mut port, &mut pipes, 2).unwrap();

        // Hub goes to the address just below the debug device.
        assert_eq!(port.control_calls[0].request, request::SET_ADDRESS);
        assert_eq!(port.control_calls[0].value, (USB_DEBUG_DEVNUM - 1) as u16);
        assert_eq!(port.control_calls[3].index, 2);
        assert!(pipes[PipeId::ConsoleOut].is_active());
    }

    #[test]
    fn failed_hub_traversal_reports_hub_enable_failed() {
        let mut port = MockPort::new().script([ControlReply::err(UsbError::Timeout)]);
        let mut pipes = PipeTable::new();

        assert_eq!(
            probe_gadget(&mut port, &mut pipes, 1),
            Err(ProbeError::HubEnableFailed)
        );
        // Device location never started.
        assert_eq!(port.count_request(request::GET_DESCRIPTOR), 0);
    }

    #[test]
    fn failed_probe_never_marks_a_pipe_usable() {
        let mut port = MockPort::new()
            .script([ControlReply::data(DESC)])
            .script_bulk([Err(UsbError::Stall), Err(UsbError::Stall)]);
        let mut pipes = PipeTable::new();

        assert!(probe_gadget(&mut port, &mut pipes, 0).is_err());
        assert!(pipes.iter().all(|p| !p.is_active()));
        assert!(pipes.iter().all(|p| p.status == PipeStatus::empty()));
    }
}
