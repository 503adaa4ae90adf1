// This module provides arena-based compilation session management using the bumpalo
// crate to simplify lifetime management in avrmc. CompilationSession is the per-unit
// hub: it holds the arena that program graphs allocate their node storage from, the
// read-only Subtarget feature set shared by every function in the unit, a counter for
// virtual-register allocation, and running statistics (functions lowered, nodes
// selected, instructions encoded, fixups emitted). All per-function lowering objects
// share the session lifetime, which keeps the selector free of lifetime plumbing.
// The session is single-threaded by construction; the only state that outlives a
// function's lowering is the statistics and the vreg counter, both behind Cells.
// SessionStats mirrors the kind of counters the surrounding driver reports after a
// unit finishes.

//! Arena-based compilation session management.

use std::cell::{Cell, RefCell};

use bumpalo::Bump;

use crate::core::registers::{RegClass, VirtReg};
use crate::core::subtarget::Subtarget;

/// Counters gathered across one compilation unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub functions_lowered: usize,
    pub nodes_selected: usize,
    pub insts_encoded: usize,
    pub bytes_emitted: usize,
    pub fixups_emitted: usize,
}

/// Per-compilation-unit session.
///
/// Owns nothing mutable that crosses function boundaries except statistics
/// and the virtual-register counter; the subtarget is fixed at construction.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    subtarget: Subtarget,
    next_vreg: Cell<u32>,
    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump, subtarget: Subtarget) -> CompilationSession<'arena> {
        CompilationSession {
            arena,
            subtarget,
            next_vreg: Cell::new(0),
            stats: RefCell::new(SessionStats::default()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn subtarget(&self) -> &Subtarget {
        &self.subtarget
    }

    /// Allocate a fresh virtual register of the given class.
    pub fn alloc_vreg(&self, class: RegClass) -> VirtReg {
        let id = self.next_vreg.get();
        self.next_vreg.set(id + 1);
        VirtReg { id, class }
    }

    pub fn stats(&self) -> SessionStats {
        *self.stats.borrow()
    }

    pub(crate) fn record_function_lowered(&self) {
        self.stats.borrow_mut().functions_lowered += 1;
    }

    pub(crate) fn record_nodes_selected(&self, count: usize) {
        self.stats.borrow_mut().nodes_selected += count;
    }

    pub(crate) fn record_encoded(&self, bytes: usize, fixups: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.insts_encoded += 1;
        stats.bytes_emitted += bytes;
        stats.fixups_emitted += fixups;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vregs_are_unique_and_classed() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena, Subtarget::enhanced());
        let a = session.alloc_vreg(RegClass::Gpr8);
        let b = session.alloc_vreg(RegClass::PtrRegs);
        assert_ne!(a.id, b.id);
        assert_eq!(b.class, RegClass::PtrRegs);
    }
}
