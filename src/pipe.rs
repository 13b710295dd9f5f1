//! Pipe table shared between the probe core and the console I/O path
//!
//! The table is allocated by the caller (typically in a `static`)
//! before probing begins and mutated in place while the gadget is
//! brought up. Once a probe succeeds, the console layer performs all
//! debug traffic through these entries.

use core::ops::{Index, IndexMut};

use bitflags::bitflags;

use crate::usb::pid;

bitflags! {
    /// Pipe readiness flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PipeStatus: u8 {
        /// Slot carries a usable endpoint assignment
        const VALID = 1 << 0;
        /// Traffic is permitted on the pipe
        const ENABLED = 1 << 1;
    }
}

/// Roles of the fixed pipe slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum PipeId {
    /// Default control endpoint 0
    SetupEp0 = 0,
    /// Debug console bulk OUT
    ConsoleOut = 1,
    /// Debug console bulk IN
    ConsoleIn = 2,
}

/// Number of pipe slots in the table.
pub const MAX_PIPES: usize = 3;

/// One USB pipe used by the debug console.
#[derive(Debug, Clone, Copy)]
pub struct Pipe {
    /// Device address the pipe currently targets
    pub devnum: u8,
    /// Endpoint number, 0 means unassigned
    pub endpoint: u8,
    /// Current DATA toggle token, [`pid::DATA0`] or [`pid::DATA1`]
    pub pid: u8,
    /// Per-transfer timeout in milliseconds
    pub timeout_ms: u32,
    /// Readiness flags
    pub status: PipeStatus,
}

impl Pipe {
    pub const fn new() -> Self {
        Self {
            devnum: 0,
            endpoint: 0,
            pid: pid::DATA0,
            timeout_ms: 0,
            status: PipeStatus::empty(),
        }
    }

    /// Flip the DATA toggle after a successfully acknowledged transaction.
    pub fn advance_toggle(&mut self) {
        self.pid = if self.pid == pid::DATA0 {
            pid::DATA1
        } else {
            pid::DATA0
        };
    }

    /// Whether the console layer may run traffic over this pipe.
    pub fn is_active(&self) -> bool {
        self.endpoint != 0 && self.status.contains(PipeStatus::ENABLED | PipeStatus::VALID)
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed table of pipes, one slot per [`PipeId`].
#[derive(Debug, Clone, Copy)]
pub struct PipeTable([Pipe; MAX_PIPES]);

impl PipeTable {
    /// An empty table; every slot unassigned and inactive.
    pub const fn new() -> Self {
        Self([Pipe::new(); MAX_PIPES])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pipe> {
        self.0.iter()
    }

    /// All slots except the dedicated control slot.
    pub(crate) fn data_slots_mut(&mut self) -> impl Iterator<Item = &mut Pipe> {
        self.0[PipeId::SetupEp0 as usize + 1..].iter_mut()
    }
}

impl Default for PipeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<PipeId> for PipeTable {
    type Output = Pipe;

    fn index(&self, id: PipeId) -> &Pipe {
        &self.0[id as usize]
    }
}

impl IndexMut<PipeId> for PipeTable {
    fn index_mut(&mut self, id: PipeId) -> &mut Pipe {
        &mut self.0[id as usize]
    }
}
