// This module expands register-pair constraints on inline-assembly nodes. An
// inline-assembly node carries its operands as groups: one flag word describing the
// group (operand kind, register count, optional register-class constraint) followed
// by that many register operands. When a group constrains two Gpr8 registers as one
// double-width value, no base register class can express the pairing, so the
// expansion allocates a synthetic Gpr8Quad virtual register, inserts mov copies
// bridging the two halves (copy-in before the block for uses, copy-out after it for
// defs, low half first), and rewrites the flag word to name the combined class with
// a single register. Groups that do not request pairing pass through untouched, and
// a block with no pairing anywhere is reported as unchanged, which also makes the
// expansion idempotent: a rewritten group names Gpr8Quad and never re-triggers.

//! Inline-assembly register-pair constraint expansion.

use crate::core::error::{SelectionError, SelectionResult};
use crate::core::graph::{IrOpKind, NodeId, Operand, ProgramGraph, ValueType};
use crate::core::registers::RegClass;
use crate::core::session::CompilationSession;
use crate::mc::catalogue::Opcode;
use crate::mc::inst::{MachineInst, MachineOperand};

/// What an inline-assembly operand group is, per its flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmOperandKind {
    RegUse,
    RegDef,
    RegDefEarlyClobber,
    Imm,
    Mem,
}

impl AsmOperandKind {
    fn from_bits(bits: u32) -> Option<AsmOperandKind> {
        match bits {
            1 => Some(AsmOperandKind::RegUse),
            2 => Some(AsmOperandKind::RegDef),
            3 => Some(AsmOperandKind::RegDefEarlyClobber),
            4 => Some(AsmOperandKind::Imm),
            5 => Some(AsmOperandKind::Mem),
            _ => None,
        }
    }

    fn bits(self) -> u32 {
        match self {
            AsmOperandKind::RegUse => 1,
            AsmOperandKind::RegDef => 2,
            AsmOperandKind::RegDefEarlyClobber => 3,
            AsmOperandKind::Imm => 4,
            AsmOperandKind::Mem => 5,
        }
    }

    fn is_reg(self) -> bool {
        matches!(
            self,
            AsmOperandKind::RegUse | AsmOperandKind::RegDef | AsmOperandKind::RegDefEarlyClobber
        )
    }

    fn is_def(self) -> bool {
        matches!(
            self,
            AsmOperandKind::RegDef | AsmOperandKind::RegDefEarlyClobber
        )
    }
}

fn class_id(class: RegClass) -> u32 {
    match class {
        RegClass::Gpr8 => 0,
        RegClass::Ld8 => 1,
        RegClass::Dreg => 2,
        RegClass::PtrRegs => 3,
        RegClass::PtrDispRegs => 4,
        RegClass::Gpr8Quad => 5,
    }
}

fn class_from_id(id: u32) -> Option<RegClass> {
    match id {
        0 => Some(RegClass::Gpr8),
        1 => Some(RegClass::Ld8),
        2 => Some(RegClass::Dreg),
        3 => Some(RegClass::PtrRegs),
        4 => Some(RegClass::PtrDispRegs),
        5 => Some(RegClass::Gpr8Quad),
        _ => None,
    }
}

/// Decoded view of one inline-assembly flag word.
///
/// Layout: bits 0..=2 operand kind, bits 3..=15 operand count, bit 16 marks a
/// register-class constraint, bits 17.. the constrained class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsmFlag {
    pub kind: AsmOperandKind,
    pub num_operands: u32,
    pub class: Option<RegClass>,
}

impl AsmFlag {
    pub fn decode(word: u32) -> Option<AsmFlag> {
        let kind = AsmOperandKind::from_bits(word & 0x7)?;
        let num_operands = (word >> 3) & 0x1FFF;
        let class = if word & (1 << 16) != 0 {
            Some(class_from_id(word >> 17)?)
        } else {
            None
        };
        Some(AsmFlag {
            kind,
            num_operands,
            class,
        })
    }

    pub fn encode(self) -> u32 {
        let mut word = self.kind.bits() | (self.num_operands << 3);
        if let Some(class) = self.class {
            word |= (1 << 16) | (class_id(class) << 17);
        }
        word
    }

    /// Whether this group asks for two Gpr8 halves bound as one value, the
    /// one shape the base classes cannot express.
    fn wants_pairing(self) -> bool {
        self.kind.is_reg() && self.num_operands == 2 && self.class == Some(RegClass::Gpr8)
    }
}

fn reg_operand(op: &Operand) -> Option<MachineOperand> {
    match op {
        Operand::Reg(r) => Some(MachineOperand::Reg(*r)),
        Operand::VReg(v) => Some(MachineOperand::VReg(*v)),
        _ => None,
    }
}

/// Rewrite every paired register group of the inline-assembly node at `id`.
///
/// Returns `true` when any group was rewritten; `false` reports "no change"
/// and leaves the node untouched.
pub fn expand_pairs(
    session: &CompilationSession<'_>,
    graph: &mut ProgramGraph<'_>,
    id: NodeId,
) -> SelectionResult<bool> {
    let operands = graph.node(id).operands.clone();
    let mut rewritten = Vec::with_capacity(operands.len());
    let mut changed = false;
    let mut copy_out_anchor = id;

    let mut i = 0;
    while i < operands.len() {
        let flag_word = match &operands[i] {
            Operand::Imm(v) => *v as u32,
            _ => {
                return Err(SelectionError::InvalidOperandShape {
                    op: IrOpKind::InlineAsm,
                    index: i,
                    expected: "flag word immediate",
                })
            }
        };
        let flag = AsmFlag::decode(flag_word).ok_or(SelectionError::InvalidOperandShape {
            op: IrOpKind::InlineAsm,
            index: i,
            expected: "well-formed flag word",
        })?;
        let end = i + 1 + flag.num_operands as usize;
        if end > operands.len() {
            return Err(SelectionError::InvalidOperandShape {
                op: IrOpKind::InlineAsm,
                index: i,
                expected: "flag word covering its operand group",
            });
        }
        let group = &operands[i + 1..end];

        if flag.wants_pairing() {
            let lo = reg_operand(&group[0]);
            let hi = reg_operand(&group[1]);
            let (lo, hi) = match (lo, hi) {
                (Some(lo), Some(hi)) => (lo, hi),
                _ => {
                    return Err(SelectionError::InvalidOperandShape {
                        op: IrOpKind::InlineAsm,
                        index: i + 1,
                        expected: "register pair halves",
                    })
                }
            };
            let quad = session.alloc_vreg(RegClass::Gpr8Quad);
            if flag.kind.is_def() {
                // Copy-out: halves read the combined register after the block.
                let lo_copy = graph.insert_machine_after(
                    copy_out_anchor,
                    MachineInst::new(Opcode::Mov, vec![lo, MachineOperand::VReg(quad)]),
                    ValueType::I8,
                    None,
                );
                copy_out_anchor = graph.insert_machine_after(
                    lo_copy,
                    MachineInst::new(Opcode::Mov, vec![hi, MachineOperand::VReg(quad)]),
                    ValueType::I8,
                    None,
                );
            } else {
                // Copy-in: halves feed the combined register before the block.
                graph.insert_machine_before(
                    id,
                    MachineInst::new(Opcode::Mov, vec![MachineOperand::VReg(quad), lo]),
                    ValueType::I8,
                    None,
                );
                graph.insert_machine_before(
                    id,
                    MachineInst::new(Opcode::Mov, vec![MachineOperand::VReg(quad), hi]),
                    ValueType::I8,
                    None,
                );
            }
            let new_flag = AsmFlag {
                kind: flag.kind,
                num_operands: 1,
                class: Some(RegClass::Gpr8Quad),
            };
            rewritten.push(Operand::Imm(new_flag.encode() as i64));
            rewritten.push(Operand::VReg(quad));
            changed = true;
        } else {
            rewritten.push(operands[i].clone());
            rewritten.extend(group.iter().cloned());
        }
        i = end;
    }

    if changed {
        graph.node_mut(id).operands = rewritten;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::IrOp;
    use crate::core::registers::Reg;
    use crate::core::subtarget::Subtarget;
    use bumpalo::Bump;

    fn flag(kind: AsmOperandKind, n: u32, class: Option<RegClass>) -> Operand {
        Operand::Imm(
            AsmFlag {
                kind,
                num_operands: n,
                class,
            }
            .encode() as i64,
        )
    }

    #[test]
    fn flag_word_round_trips() {
        let f = AsmFlag {
            kind: AsmOperandKind::RegDefEarlyClobber,
            num_operands: 2,
            class: Some(RegClass::Gpr8),
        };
        assert_eq!(AsmFlag::decode(f.encode()), Some(f));
    }

    #[test]
    fn pairing_expands_once_then_reports_no_change() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena, Subtarget::enhanced());
        let mut graph = ProgramGraph::new_in(&arena);
        let asm = graph.add(
            IrOp::InlineAsm,
            ValueType::I8,
            vec![
                flag(AsmOperandKind::RegUse, 2, Some(RegClass::Gpr8)),
                Operand::Reg(Reg::R24),
                Operand::Reg(Reg::R25),
            ],
        );

        assert!(expand_pairs(&session, &mut graph, asm).unwrap());
        let ops = graph.node(asm).operands.clone();
        assert_eq!(ops.len(), 2);
        let rewritten = match ops[0] {
            Operand::Imm(v) => AsmFlag::decode(v as u32).unwrap(),
            _ => panic!("flag word expected"),
        };
        assert_eq!(rewritten.class, Some(RegClass::Gpr8Quad));
        assert_eq!(rewritten.num_operands, 1);

        // The bridging copies identify the halves by position, low first.
        let copies = graph.machine_insts();
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].opcode, Opcode::Mov);
        assert_eq!(copies[0].operand(1), Some(&MachineOperand::Reg(Reg::R24)));
        assert_eq!(copies[1].operand(1), Some(&MachineOperand::Reg(Reg::R25)));

        // Second run sees the combined class and leaves the block alone.
        assert!(!expand_pairs(&session, &mut graph, asm).unwrap());
    }

    #[test]
    fn unconstrained_groups_pass_through() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena, Subtarget::enhanced());
        let mut graph = ProgramGraph::new_in(&arena);
        let asm = graph.add(
            IrOp::InlineAsm,
            ValueType::I8,
            vec![
                flag(AsmOperandKind::RegUse, 1, Some(RegClass::Ld8)),
                Operand::Reg(Reg::R16),
                flag(AsmOperandKind::Imm, 1, None),
                Operand::Imm(42),
            ],
        );
        assert!(!expand_pairs(&session, &mut graph, asm).unwrap());
        assert_eq!(graph.node(asm).operands.len(), 4);
    }
}
