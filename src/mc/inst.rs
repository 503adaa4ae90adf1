// This module defines the selected-instruction form that sits between instruction
// selection and encoding in the avrmc backend. MachineInst names a catalogue opcode
// and carries a fixed-arity operand list; MachineOperand tags each operand as a
// physical register, a virtual register awaiting allocation, an immediate, a
// floating bit-pattern immediate, a symbolic expression, or a frame index awaiting
// the frame-lowering pass. Instructions are produced exactly once per matched graph
// node, streamed to the encoder in final order, and not retained afterwards. The
// shape intentionally mirrors the operand-list machine instruction the encoder's
// catalogue describes rather than the graph the selector consumes.

//! Machine instructions: catalogue opcode plus bound operands.

use std::fmt;

use crate::core::registers::{Reg, VirtReg};
use crate::mc::catalogue::Opcode;
use crate::mc::fixup::SymbolExpr;

/// One operand of a selected instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineOperand {
    /// A physical register.
    Reg(Reg),
    /// A virtual register, to be assigned by the allocator.
    VReg(VirtReg),
    /// A concrete immediate.
    Imm(i64),
    /// A floating-point immediate carried as its bit pattern.
    FpImm(f64),
    /// A not-yet-concrete symbolic expression.
    Expr(SymbolExpr),
    /// A frame slot, resolved by the frame-lowering pass.
    Frame(i32),
}

impl MachineOperand {
    pub fn is_reg(&self) -> bool {
        matches!(self, MachineOperand::Reg(_) | MachineOperand::VReg(_))
    }

    pub fn as_phys_reg(&self) -> Option<Reg> {
        match self {
            MachineOperand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_imm(&self) -> Option<i64> {
        match self {
            MachineOperand::Imm(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for MachineOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineOperand::Reg(r) => write!(f, "{r}"),
            MachineOperand::VReg(v) => write!(f, "{v}"),
            MachineOperand::Imm(v) => write!(f, "{v}"),
            MachineOperand::FpImm(v) => write!(f, "{v}"),
            MachineOperand::Expr(e) => write!(f, "{e}"),
            MachineOperand::Frame(fi) => write!(f, "fi#{fi}"),
        }
    }
}

/// A catalogue-identified, fully-operand-bound instruction.
///
/// Copies bridging a combined `Gpr8Quad` register to its 8-bit halves carry
/// no lane operand; schedule position is the convention. The low-half copy
/// comes first, on both the copy-in and the copy-out side, and passes that
/// split such a register must preserve the adjacency.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineInst {
    pub opcode: Opcode,
    pub operands: Vec<MachineOperand>,
}

impl MachineInst {
    pub fn new(opcode: Opcode, operands: Vec<MachineOperand>) -> MachineInst {
        MachineInst { opcode, operands }
    }

    pub fn operand(&self, index: usize) -> Option<&MachineOperand> {
        self.operands.get(index)
    }
}

impl fmt::Display for MachineInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}
