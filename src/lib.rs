//! EHCI debug-port gadget probe
//!
//! Brings a USB debug-capable device attached behind an EHCI
//! controller's debug port from an unknown bus state into a
//! configured, ready-to-transfer state, optionally traversing one
//! intermediate hub. Designed for pre-OS environments: no heap, no
//! interrupts, no OS USB stack; waiting is busy-wait delays and every
//! transfer is a synchronous call through the [`DebugPort`] boundary
//! the embedding firmware implements on top of the debug-port register
//! window.
//!
//! The caller allocates a [`PipeTable`] (typically in a `static`),
//! hands it to [`probe_gadget`] together with its `DebugPort`
//! implementation and the configured hub port number (0 for none), and
//! on success runs debug-console I/O through the activated pipes.

#![cfg_attr(not(test), no_std)]

pub mod controller;
pub mod gadget;
pub mod hub;
pub mod pipe;
pub mod usb;

pub use controller::{DebugPort, UsbError};
pub use gadget::{probe_gadget, ProbeError};
pub use pipe::{Pipe, PipeId, PipeStatus, PipeTable, MAX_PIPES};
pub use usb::{DebugDescriptor, USB_DEBUG_DEVNUM};
