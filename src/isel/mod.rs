// This module implements instruction selection for the avrmc backend. The Selector
// walks one function's Program Graph in reverse topological order (users before the
// values they consume), so every node either folds into a consumer as an immediate,
// a symbol, or an address component, or is visited later and selected on its own.
// Custom rules run first, in fixed precedence: frame-index materialization,
// addressing-mode recognition, indexed loads, program-memory loads, stores through
// the stack pointer, indirect calls and branches (both force their target into Z),
// and inline-assembly register-pair expansion. Whatever the custom rules decline
// falls through to a generic pattern table keyed on operation and value type.
// A node no rule and no table row covers is a fatal NoMatchingPattern; a rule
// declining is not an error, it only signals fallthrough. Matched nodes are
// replaced in place, and pure leaves whose last consumer folded them are retired
// without selecting anything.

//! Instruction selection: Program Graph in, machine instructions out.

pub mod inline_asm;

use crate::core::error::{SelectionError, SelectionResult};
use crate::core::graph::{
    AddrSpace, IndexMode, IrOp, IrOpKind, LoadExt, MemAccess, NodeId, Operand, ProgramGraph,
    ValueType,
};
use crate::core::registers::{Reg, RegClass, VirtReg, Z};
use crate::core::session::CompilationSession;
use crate::core::subtarget::Feature;
use crate::mc::catalogue::Opcode;
use crate::mc::inst::{MachineInst, MachineOperand};

/// Per-function instruction selector.
pub struct Selector<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
}

fn default_class(vt: ValueType) -> RegClass {
    match vt {
        ValueType::I8 => RegClass::Gpr8,
        ValueType::I16 => RegClass::Dreg,
    }
}

fn no_match<T>(op: IrOpKind, vt: ValueType) -> SelectionResult<T> {
    Err(SelectionError::NoMatchingPattern { op, vt: vt.bits() })
}

fn shape_err<T>(op: IrOpKind, index: usize, expected: &'static str) -> SelectionResult<T> {
    Err(SelectionError::InvalidOperandShape {
        op,
        index,
        expected,
    })
}

/// Nodes with no side effects; retired instead of selected once their last
/// consumer has folded them.
fn is_pure(op: &IrOp) -> bool {
    matches!(
        op,
        IrOp::Const(_)
            | IrOp::FrameIndex(_)
            | IrOp::Symbol(_)
            | IrOp::Add
            | IrOp::Sub
            | IrOp::And
            | IrOp::Or
            | IrOp::Eor
            | IrOp::Mul
            | IrOp::CopyFromReg
    )
}

/// The dedicated indexed-load opcode for an access, if its increment magnitude
/// exactly matches the value's byte width. Any other magnitude declines and
/// leaves the load to the generic matcher.
fn indexed_load_opcode(access: &MemAccess) -> Option<Opcode> {
    if access.ext != LoadExt::None {
        return None;
    }
    // Builders may carry the pre-decrement step as a negative offset; only
    // the magnitude selects.
    match (access.index, access.vt, access.offset.abs()) {
        (IndexMode::PostInc, ValueType::I8, 1) => Some(Opcode::LdRdPtrPi),
        (IndexMode::PreDec, ValueType::I8, 1) => Some(Opcode::LdRdPtrPd),
        (IndexMode::PostInc, ValueType::I16, 2) => Some(Opcode::LdwRdPtrPi),
        (IndexMode::PreDec, ValueType::I16, 2) => Some(Opcode::LdwRdPtrPd),
        _ => None,
    }
}

/// Maximum displacement the reg+displacement forms accept for an access: the
/// full 6-bit field for byte accesses, one less for word accesses so the
/// high-byte half still fits.
fn disp_fits(disp: i64, vt: ValueType) -> bool {
    match vt {
        ValueType::I8 => (0..=63).contains(&disp),
        ValueType::I16 => (0..63).contains(&disp),
    }
}

impl<'s, 'arena> Selector<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>) -> Selector<'s, 'arena> {
        Selector { session }
    }

    /// Select every live node of `graph`, users before defs.
    ///
    /// After this returns, every live node is a machine node and
    /// `graph.machine_insts()` yields the function's instructions in schedule
    /// order.
    pub fn select_function(&self, graph: &mut ProgramGraph<'_>) -> SelectionResult<()> {
        let order = graph.schedule();
        let mut selected = 0usize;
        for &id in order.iter().rev() {
            let node = graph.node(id);
            if node.is_dead() || node.machine().is_some() {
                continue;
            }
            let retire = match node.ir_op() {
                Some(op) => {
                    is_pure(op) && node.result.is_none() && graph.use_count(id) == 0
                }
                None => false,
            };
            if retire {
                graph.mark_dead(id);
                continue;
            }
            self.select_node(graph, id)?;
            selected += 1;
        }
        self.session.record_nodes_selected(selected);
        self.session.record_function_lowered();
        log::debug!("selection finished: {selected} nodes matched");
        Ok(())
    }

    fn select_node(&self, graph: &mut ProgramGraph<'_>, id: NodeId) -> SelectionResult<()> {
        let node = graph.node(id);
        let Some(op) = node.ir_op().cloned() else {
            return Ok(());
        };
        let vt = node.vt;
        let operands = node.operands.clone();
        log::trace!("selecting node {} ({:?}, i{})", id.0, op.kind(), vt.bits());

        match op {
            IrOp::FrameIndex(fi) => {
                // Bare frame reference: materialize the slot address through
                // the pseudo a later frame pass expands, zero displacement.
                let d = self.result_vreg(graph, id, RegClass::Dreg);
                self.emit(
                    graph,
                    id,
                    MachineInst::new(
                        Opcode::Frmidx,
                        vec![
                            MachineOperand::VReg(d),
                            MachineOperand::Frame(fi),
                            MachineOperand::Imm(0),
                        ],
                    ),
                    Some(d),
                );
                Ok(())
            }
            IrOp::Load(access) => self.select_load(graph, id, access, &operands),
            IrOp::Store(access) => self.select_store(graph, id, access, &operands),
            IrOp::Call => self.select_call(graph, id, vt, &operands),
            IrOp::BrInd => self.select_brind(graph, id, vt, &operands),
            IrOp::Jmp => self.select_jmp(graph, id, &operands),
            IrOp::Ret => {
                self.emit(graph, id, MachineInst::new(Opcode::Ret, vec![]), None);
                Ok(())
            }
            IrOp::InlineAsm => self.select_inline_asm(graph, id),
            IrOp::CopyToReg => self.select_copy_to_reg(graph, id, vt, &operands),
            IrOp::CopyFromReg => self.select_copy_from_reg(graph, id, vt, &operands),
            other => self.select_generic(graph, id, other, vt, &operands),
        }
    }

    // ---- custom rules ----------------------------------------------------

    /// Addressing-mode recognition for the reg+displacement forms. Returns
    /// the (base, displacement) pair, or `None` when the expression has no
    /// such shape and the caller must fall through.
    fn select_addr(
        &self,
        graph: &mut ProgramGraph<'_>,
        addr: &Operand,
        vt: ValueType,
    ) -> Option<(MachineOperand, MachineOperand)> {
        if let Operand::Frame(fi) = addr {
            return Some((MachineOperand::Frame(*fi), MachineOperand::Imm(0)));
        }
        let Operand::Node(nid) = addr else {
            return None;
        };
        match graph.node(*nid).ir_op() {
            Some(IrOp::FrameIndex(fi)) => {
                Some((MachineOperand::Frame(*fi), MachineOperand::Imm(0)))
            }
            Some(IrOp::Add) => {
                let addends = graph.node(*nid).operands.clone();
                if addends.len() != 2 {
                    return None;
                }
                let disp = fold_imm(graph, &addends[1])?;
                // Frame base: fold the whole constant into a wide pseudo
                // displacement rather than adjusting the frame pointer for
                // every access.
                if let Operand::Node(base) = &addends[0] {
                    if let Some(IrOp::FrameIndex(fi)) = graph.node(*base).ir_op() {
                        if disp >= 0 {
                            return Some((MachineOperand::Frame(*fi), MachineOperand::Imm(disp)));
                        }
                    }
                }
                if !disp_fits(disp, vt) {
                    return None;
                }
                let base = self.addr_base(graph, &addends[0], RegClass::PtrDispRegs)?;
                Some((base, MachineOperand::Imm(disp)))
            }
            _ => None,
        }
    }

    /// A register-valued base for an address expression; constants and
    /// symbols are not bases.
    fn addr_base(
        &self,
        graph: &mut ProgramGraph<'_>,
        op: &Operand,
        class: RegClass,
    ) -> Option<MachineOperand> {
        match op {
            Operand::Reg(r) => Some(MachineOperand::Reg(*r)),
            Operand::VReg(v) => Some(MachineOperand::VReg(*v)),
            Operand::Node(nid) => match graph.node(*nid).ir_op() {
                Some(IrOp::Const(_)) | Some(IrOp::Symbol(_)) => None,
                _ => Some(MachineOperand::VReg(self.result_vreg(graph, *nid, class))),
            },
            _ => None,
        }
    }

    fn select_load(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        access: MemAccess,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        let Some(addr) = operands.first().cloned() else {
            return shape_err(IrOpKind::Load, 0, "address operand");
        };
        if access.ext != LoadExt::None && indexed_load_opcode(&access).is_none() {
            // No dedicated pattern covers extending loads.
            return no_match(IrOpKind::Load, access.vt);
        }
        if access.space == AddrSpace::Program {
            return self.select_progmem_load(graph, id, access, &addr);
        }
        let d = self.result_vreg(graph, id, default_class(access.vt));

        if access.index != IndexMode::None {
            let Some(ptr) = self.addr_base(graph, &addr, RegClass::PtrRegs) else {
                return shape_err(IrOpKind::Load, 0, "pointer register");
            };
            if let Some(opcode) = indexed_load_opcode(&access) {
                self.emit(
                    graph,
                    id,
                    MachineInst::new(opcode, vec![MachineOperand::VReg(d), ptr]),
                    Some(d),
                );
                return Ok(());
            }
            // Magnitude does not match the access width; split into a plain
            // load and a separate pointer update, the same shape generic
            // matching would pick for an add + load.
            let step = access.offset.abs();
            if !(1..64).contains(&step) || !self.session.subtarget().has(Feature::AddSubIw) {
                return no_match(IrOpKind::Load, access.vt);
            }
            let update_opcode = match access.index {
                IndexMode::PreDec => Opcode::Sbiw,
                _ => Opcode::Adiw,
            };
            let update = MachineInst::new(
                update_opcode,
                vec![ptr.clone(), ptr.clone(), MachineOperand::Imm(step)],
            );
            let load = MachineInst::new(
                match access.vt {
                    ValueType::I8 => Opcode::LdRdPtr,
                    ValueType::I16 => Opcode::LdwRdPtr,
                },
                vec![MachineOperand::VReg(d), ptr],
            );
            match access.index {
                IndexMode::PreDec => {
                    graph.insert_machine_before(id, update, ValueType::I16, None);
                    self.emit(graph, id, load, Some(d));
                }
                _ => {
                    self.emit(graph, id, load, Some(d));
                    graph.insert_machine_after(id, update, ValueType::I16, None);
                }
            }
            return Ok(());
        }

        // Absolute data-space address, byte loads only.
        if access.vt == ValueType::I8 && self.session.subtarget().has(Feature::Sram) {
            if let Some(k) = fold_imm(graph, &addr) {
                self.emit(
                    graph,
                    id,
                    MachineInst::new(
                        Opcode::LdsRdK,
                        vec![MachineOperand::VReg(d), MachineOperand::Imm(k)],
                    ),
                    Some(d),
                );
                return Ok(());
            }
            if let Some(sym) = fold_sym(graph, &addr) {
                self.emit(
                    graph,
                    id,
                    MachineInst::new(
                        Opcode::LdsRdK,
                        vec![MachineOperand::VReg(d), MachineOperand::Expr(sym)],
                    ),
                    Some(d),
                );
                return Ok(());
            }
        }

        if let Some((base, disp)) = self.select_addr(graph, &addr, access.vt) {
            let opcode = match access.vt {
                ValueType::I8 => Opcode::LddRdPtrQ,
                ValueType::I16 => Opcode::LddwRdPtrQ,
            };
            self.emit(
                graph,
                id,
                MachineInst::new(opcode, vec![MachineOperand::VReg(d), base, disp]),
                Some(d),
            );
            return Ok(());
        }

        let Some(ptr) = self.addr_base(graph, &addr, RegClass::PtrRegs) else {
            return no_match(IrOpKind::Load, access.vt);
        };
        let opcode = match access.vt {
            ValueType::I8 => Opcode::LdRdPtr,
            ValueType::I16 => Opcode::LdwRdPtr,
        };
        self.emit(
            graph,
            id,
            MachineInst::new(opcode, vec![MachineOperand::VReg(d), ptr]),
            Some(d),
        );
        Ok(())
    }

    /// Program-memory loads read through Z only; the pointer is copied there
    /// first.
    fn select_progmem_load(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        access: MemAccess,
        addr: &Operand,
    ) -> SelectionResult<()> {
        let subtarget = self.session.subtarget();
        let opcode = match access.index {
            IndexMode::None => {
                if !subtarget.has(Feature::Lpm) {
                    return no_match(IrOpKind::Load, access.vt);
                }
                match access.vt {
                    ValueType::I8 => Opcode::LpmRdZ,
                    ValueType::I16 => Opcode::LpmwRdZ,
                }
            }
            IndexMode::PostInc => {
                let widths_match = access.offset == access.vt.bytes();
                if !widths_match || !subtarget.has(Feature::Lpmx) {
                    return no_match(IrOpKind::Load, access.vt);
                }
                match access.vt {
                    ValueType::I8 => Opcode::LpmRdZPi,
                    ValueType::I16 => Opcode::LpmwRdZPi,
                }
            }
            IndexMode::PreDec => return no_match(IrOpKind::Load, access.vt),
        };
        let Some(ptr) = self.addr_base(graph, addr, RegClass::PtrRegs) else {
            return shape_err(IrOpKind::Load, 0, "pointer register");
        };
        graph.insert_machine_before(
            id,
            MachineInst::new(Opcode::Movw, vec![MachineOperand::Reg(Z), ptr]),
            ValueType::I16,
            None,
        );
        let d = self.result_vreg(graph, id, default_class(access.vt));
        self.emit(
            graph,
            id,
            MachineInst::new(opcode, vec![MachineOperand::VReg(d)]),
            Some(d),
        );
        Ok(())
    }

    fn select_store(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        access: MemAccess,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        if operands.len() != 2 {
            return shape_err(IrOpKind::Store, 0, "value and address operands");
        }
        if access.space == AddrSpace::Program {
            return no_match(IrOpKind::Store, access.vt);
        }
        let value = self.value_operand(graph, &operands[0], IrOpKind::Store, 0)?;
        // Stores take registers only; materialize constant values first.
        let value = match value {
            MachineOperand::Imm(v) if access.vt == ValueType::I8 => {
                let t = self.session.alloc_vreg(RegClass::Ld8);
                graph.insert_machine_before(
                    id,
                    MachineInst::new(
                        Opcode::Ldi,
                        vec![MachineOperand::VReg(t), MachineOperand::Imm(v & 0xFF)],
                    ),
                    ValueType::I8,
                    None,
                );
                MachineOperand::VReg(t)
            }
            MachineOperand::Imm(_) | MachineOperand::Expr(_) => {
                return no_match(IrOpKind::Store, access.vt)
            }
            other => other,
        };
        let addr = operands[1].clone();

        // Stores relative to SP go through a frame pseudo; the stack pointer
        // has no reg+displacement encoding of its own.
        if let Some(offset) = sp_offset(graph, &addr) {
            let opcode = match access.vt {
                ValueType::I8 => Opcode::StdSpqRr,
                ValueType::I16 => Opcode::StdwSpqRr,
            };
            self.emit(
                graph,
                id,
                MachineInst::new(
                    opcode,
                    vec![
                        MachineOperand::Reg(Reg::SP),
                        MachineOperand::Imm(offset),
                        value,
                    ],
                ),
                None,
            );
            return Ok(());
        }

        if access.index != IndexMode::None {
            let opcode = match (access.index, access.vt, access.offset.abs()) {
                (IndexMode::PostInc, ValueType::I8, 1) => Opcode::StPtrPiRr,
                (IndexMode::PreDec, ValueType::I8, 1) => Opcode::StPtrPdRr,
                _ => return no_match(IrOpKind::Store, access.vt),
            };
            let Some(ptr) = self.addr_base(graph, &addr, RegClass::PtrRegs) else {
                return shape_err(IrOpKind::Store, 1, "pointer register");
            };
            self.emit(graph, id, MachineInst::new(opcode, vec![ptr, value]), None);
            return Ok(());
        }

        if access.vt == ValueType::I8 && self.session.subtarget().has(Feature::Sram) {
            if let Some(k) = fold_imm(graph, &addr) {
                self.emit(
                    graph,
                    id,
                    MachineInst::new(Opcode::StsKRr, vec![MachineOperand::Imm(k), value]),
                    None,
                );
                return Ok(());
            }
            if let Some(sym) = fold_sym(graph, &addr) {
                self.emit(
                    graph,
                    id,
                    MachineInst::new(Opcode::StsKRr, vec![MachineOperand::Expr(sym), value]),
                    None,
                );
                return Ok(());
            }
        }

        if let Some((base, disp)) = self.select_addr(graph, &addr, access.vt) {
            let opcode = match access.vt {
                ValueType::I8 => Opcode::StdPtrQRr,
                ValueType::I16 => Opcode::StdwPtrQRr,
            };
            self.emit(
                graph,
                id,
                MachineInst::new(opcode, vec![base, disp, value]),
                None,
            );
            return Ok(());
        }

        let Some(ptr) = self.addr_base(graph, &addr, RegClass::PtrRegs) else {
            return no_match(IrOpKind::Store, access.vt);
        };
        match access.vt {
            ValueType::I8 => {
                self.emit(
                    graph,
                    id,
                    MachineInst::new(Opcode::StPtrRr, vec![ptr, value]),
                    None,
                );
            }
            ValueType::I16 => {
                // No plain word-store form; the zero-displacement pseudo
                // covers it.
                self.emit(
                    graph,
                    id,
                    MachineInst::new(
                        Opcode::StdwPtrQRr,
                        vec![ptr, MachineOperand::Imm(0), value],
                    ),
                    None,
                );
            }
        }
        Ok(())
    }

    fn select_call(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        vt: ValueType,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        let Some(callee) = operands.first().cloned() else {
            return shape_err(IrOpKind::Call, 0, "callee operand");
        };
        let subtarget = self.session.subtarget();
        if let Some(sym) = fold_sym(graph, &callee) {
            let opcode = if subtarget.has(Feature::JmpCall) {
                Opcode::Call
            } else {
                Opcode::Rcall
            };
            self.emit(
                graph,
                id,
                MachineInst::new(opcode, vec![MachineOperand::Expr(sym)]),
                None,
            );
            return Ok(());
        }
        if let Some(target) = fold_imm(graph, &callee) {
            let opcode = if subtarget.has(Feature::JmpCall) {
                Opcode::Call
            } else {
                Opcode::Rcall
            };
            self.emit(
                graph,
                id,
                MachineInst::new(opcode, vec![MachineOperand::Imm(target)]),
                None,
            );
            return Ok(());
        }
        // Indirect call: the target must sit in Z first.
        if !subtarget.has(Feature::IjmpCall) {
            return no_match(IrOpKind::Call, vt);
        }
        let Some(target) = self.addr_base(graph, &callee, RegClass::PtrRegs) else {
            return shape_err(IrOpKind::Call, 0, "register-valued callee");
        };
        graph.insert_machine_before(
            id,
            MachineInst::new(Opcode::Movw, vec![MachineOperand::Reg(Z), target]),
            ValueType::I16,
            None,
        );
        self.emit(graph, id, MachineInst::new(Opcode::Icall, vec![]), None);
        Ok(())
    }

    fn select_brind(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        vt: ValueType,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        let Some(target) = operands.first().cloned() else {
            return shape_err(IrOpKind::BrInd, 0, "target operand");
        };
        if !self.session.subtarget().has(Feature::IjmpCall) {
            return no_match(IrOpKind::BrInd, vt);
        }
        let Some(target) = self.addr_base(graph, &target, RegClass::PtrRegs) else {
            return shape_err(IrOpKind::BrInd, 0, "register-valued target");
        };
        graph.insert_machine_before(
            id,
            MachineInst::new(Opcode::Movw, vec![MachineOperand::Reg(Z), target]),
            ValueType::I16,
            None,
        );
        self.emit(graph, id, MachineInst::new(Opcode::Ijmp, vec![]), None);
        Ok(())
    }

    fn select_jmp(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        let Some(target) = operands.first() else {
            return shape_err(IrOpKind::Jmp, 0, "branch label");
        };
        let Some(sym) = fold_sym(graph, target) else {
            return shape_err(IrOpKind::Jmp, 0, "branch label");
        };
        let opcode = if self.session.subtarget().has(Feature::JmpCall) {
            Opcode::Jmp
        } else {
            Opcode::Rjmp
        };
        self.emit(
            graph,
            id,
            MachineInst::new(opcode, vec![MachineOperand::Expr(sym)]),
            None,
        );
        Ok(())
    }

    fn select_inline_asm(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
    ) -> SelectionResult<()> {
        let changed = inline_asm::expand_pairs(self.session, graph, id)?;
        if changed {
            log::trace!("inline-asm node {} rewritten for register pairing", id.0);
        }
        let operands = graph
            .node(id)
            .operands
            .iter()
            .map(|op| match op {
                Operand::Imm(v) => Ok(MachineOperand::Imm(*v)),
                Operand::Reg(r) => Ok(MachineOperand::Reg(*r)),
                Operand::VReg(v) => Ok(MachineOperand::VReg(*v)),
                _ => shape_err(IrOpKind::InlineAsm, 0, "flag word or register"),
            })
            .collect::<SelectionResult<Vec<_>>>()?;
        self.emit(
            graph,
            id,
            MachineInst::new(Opcode::InlineAsm, operands),
            None,
        );
        Ok(())
    }

    fn select_copy_to_reg(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        vt: ValueType,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        if operands.len() != 2 {
            return shape_err(IrOpKind::CopyToReg, 0, "destination and value operands");
        }
        let dest = match &operands[0] {
            Operand::Reg(r) => MachineOperand::Reg(*r),
            Operand::VReg(v) => MachineOperand::VReg(*v),
            _ => return shape_err(IrOpKind::CopyToReg, 0, "register destination"),
        };
        let src = self.value_operand(graph, &operands[1], IrOpKind::CopyToReg, 1)?;
        let opcode = match (&src, vt) {
            (MachineOperand::Imm(_) | MachineOperand::Expr(_), ValueType::I8) => Opcode::Ldi,
            // Wide immediates need an ldi pair; no single-instruction copy.
            (MachineOperand::Imm(_) | MachineOperand::Expr(_), ValueType::I16) => {
                return no_match(IrOpKind::CopyToReg, vt)
            }
            (_, ValueType::I8) => Opcode::Mov,
            (_, ValueType::I16) => Opcode::Movw,
        };
        self.emit(graph, id, MachineInst::new(opcode, vec![dest, src]), None);
        Ok(())
    }

    fn select_copy_from_reg(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        vt: ValueType,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        let src = match operands.first() {
            Some(Operand::Reg(r)) => MachineOperand::Reg(*r),
            Some(Operand::VReg(v)) => MachineOperand::VReg(*v),
            _ => return shape_err(IrOpKind::CopyFromReg, 0, "register source"),
        };
        let d = self.result_vreg(graph, id, default_class(vt));
        let opcode = match vt {
            ValueType::I8 => Opcode::Mov,
            ValueType::I16 => Opcode::Movw,
        };
        self.emit(
            graph,
            id,
            MachineInst::new(opcode, vec![MachineOperand::VReg(d), src]),
            Some(d),
        );
        Ok(())
    }

    // ---- generic fallback ------------------------------------------------

    /// The fixed pattern table standing in for the generated matcher.
    fn select_generic(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        op: IrOp,
        vt: ValueType,
        operands: &[Operand],
    ) -> SelectionResult<()> {
        let kind = op.kind();
        if let IrOp::Const(v) = op {
            if vt != ValueType::I8 {
                return no_match(kind, vt);
            }
            let d = self.result_vreg(graph, id, RegClass::Ld8);
            self.emit(
                graph,
                id,
                MachineInst::new(
                    Opcode::Ldi,
                    vec![MachineOperand::VReg(d), MachineOperand::Imm(v & 0xFF)],
                ),
                Some(d),
            );
            return Ok(());
        }

        if !matches!(
            kind,
            IrOpKind::Add | IrOpKind::Sub | IrOpKind::And | IrOpKind::Or | IrOpKind::Eor
                | IrOpKind::Mul
        ) {
            return no_match(kind, vt);
        }
        if operands.len() != 2 {
            return shape_err(kind, 0, "two value operands");
        }
        let lhs = self.value_operand(graph, &operands[0], kind, 0)?;
        let imm = fold_imm(graph, &operands[1]);

        if vt == ValueType::I16 {
            // Only the upper-pair immediate word forms exist at this width.
            let Some(k) = imm else {
                return no_match(kind, vt);
            };
            if !(0..64).contains(&k) || !self.session.subtarget().has(Feature::AddSubIw) {
                return no_match(kind, vt);
            }
            let opcode = match kind {
                IrOpKind::Add => Opcode::Adiw,
                IrOpKind::Sub => Opcode::Sbiw,
                _ => return no_match(kind, vt),
            };
            let d = self.result_vreg(graph, id, RegClass::Dreg);
            self.emit(
                graph,
                id,
                MachineInst::new(
                    opcode,
                    vec![MachineOperand::VReg(d), lhs, MachineOperand::Imm(k)],
                ),
                Some(d),
            );
            return Ok(());
        }

        if let Some(k) = imm {
            // No add-with-immediate: subtract the negated constant instead.
            let (opcode, field) = match kind {
                IrOpKind::Add => (Opcode::Subi, k.wrapping_neg() & 0xFF),
                IrOpKind::Sub => (Opcode::Subi, k & 0xFF),
                IrOpKind::And => (Opcode::Andi, k & 0xFF),
                IrOpKind::Or => (Opcode::Ori, k & 0xFF),
                _ => return no_match(kind, vt),
            };
            let d = self.result_vreg(graph, id, RegClass::Ld8);
            self.emit(
                graph,
                id,
                MachineInst::new(
                    opcode,
                    vec![MachineOperand::VReg(d), lhs, MachineOperand::Imm(field)],
                ),
                Some(d),
            );
            return Ok(());
        }

        let rhs = self.value_operand(graph, &operands[1], kind, 1)?;
        if kind == IrOpKind::Mul {
            if !self.session.subtarget().has(Feature::Mul) {
                return no_match(kind, vt);
            }
            // Result is implicitly r1:r0; the instruction names only the
            // factors.
            let d = self.result_vreg(graph, id, RegClass::Gpr8);
            self.emit(
                graph,
                id,
                MachineInst::new(Opcode::Mul, vec![lhs, rhs]),
                Some(d),
            );
            return Ok(());
        }
        let opcode = match kind {
            IrOpKind::Add => Opcode::Add,
            IrOpKind::Sub => Opcode::Sub,
            IrOpKind::And => Opcode::And,
            IrOpKind::Or => Opcode::Or,
            IrOpKind::Eor => Opcode::Eor,
            _ => return no_match(kind, vt),
        };
        let d = self.result_vreg(graph, id, RegClass::Gpr8);
        self.emit(
            graph,
            id,
            MachineInst::new(opcode, vec![MachineOperand::VReg(d), lhs, rhs]),
            Some(d),
        );
        Ok(())
    }

    // ---- shared helpers --------------------------------------------------

    fn emit(
        &self,
        graph: &mut ProgramGraph<'_>,
        id: NodeId,
        inst: MachineInst,
        result: Option<VirtReg>,
    ) {
        log::trace!("node {} -> {inst}", id.0);
        graph.replace_with_machine(id, inst, result);
    }

    /// The virtual register consumers read this node's value from; assigned
    /// once, on first demand.
    fn result_vreg(&self, graph: &mut ProgramGraph<'_>, id: NodeId, class: RegClass) -> VirtReg {
        if let Some(v) = graph.node(id).result {
            return v;
        }
        let v = self.session.alloc_vreg(class);
        graph.node_mut(id).result = Some(v);
        v
    }

    /// Lower a graph operand to a machine operand, folding constant and
    /// symbol producers.
    fn value_operand(
        &self,
        graph: &mut ProgramGraph<'_>,
        op: &Operand,
        owner: IrOpKind,
        index: usize,
    ) -> SelectionResult<MachineOperand> {
        match op {
            Operand::Imm(v) => Ok(MachineOperand::Imm(*v)),
            Operand::Reg(r) => Ok(MachineOperand::Reg(*r)),
            Operand::VReg(v) => Ok(MachineOperand::VReg(*v)),
            Operand::Frame(fi) => Ok(MachineOperand::Frame(*fi)),
            Operand::Sym(e) => Ok(MachineOperand::Expr(e.clone())),
            Operand::Node(nid) => {
                let producer = graph.node(*nid);
                if producer.is_dead() {
                    return shape_err(owner, index, "live producer node");
                }
                match producer.ir_op() {
                    Some(IrOp::Const(v)) => Ok(MachineOperand::Imm(*v)),
                    Some(IrOp::Symbol(e)) => Ok(MachineOperand::Expr(e.clone())),
                    _ => {
                        let class = default_class(producer.vt);
                        Ok(MachineOperand::VReg(self.result_vreg(graph, *nid, class)))
                    }
                }
            }
        }
    }
}

fn fold_imm(graph: &ProgramGraph<'_>, op: &Operand) -> Option<i64> {
    match op {
        Operand::Imm(v) => Some(*v),
        Operand::Node(nid) => match graph.node(*nid).ir_op() {
            Some(IrOp::Const(v)) => Some(*v),
            _ => None,
        },
        _ => None,
    }
}

fn fold_sym(graph: &ProgramGraph<'_>, op: &Operand) -> Option<crate::mc::fixup::SymbolExpr> {
    match op {
        Operand::Sym(e) => Some(e.clone()),
        Operand::Node(nid) => match graph.node(*nid).ir_op() {
            Some(IrOp::Symbol(e)) => Some(e.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Recognize an address of the form SP or SP + constant.
fn sp_offset(graph: &ProgramGraph<'_>, addr: &Operand) -> Option<i64> {
    fn is_sp(graph: &ProgramGraph<'_>, op: &Operand) -> bool {
        match op {
            Operand::Reg(Reg::SP) => true,
            Operand::Node(nid) => match graph.node(*nid).ir_op() {
                Some(IrOp::CopyFromReg) => {
                    matches!(graph.node(*nid).operands.first(), Some(Operand::Reg(Reg::SP)))
                }
                _ => false,
            },
            _ => false,
        }
    }

    if is_sp(graph, addr) {
        return Some(0);
    }
    if let Operand::Node(nid) = addr {
        if let Some(IrOp::Add) = graph.node(*nid).ir_op() {
            let addends = graph.node(*nid).operands.clone();
            if addends.len() == 2 && is_sp(graph, &addends[0]) {
                return fold_imm(graph, &addends[1]);
            }
        }
    }
    None
}
