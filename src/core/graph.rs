// This module implements the Program Graph the selector consumes: a per-function DAG
// of architecture-neutral operations held in an index-addressed arena. Nodes are
// appended in topological order (operands before users) and addressed by stable
// NodeIds, so "replacing" a matched subgraph never moves memory: the matched node's
// slot is overwritten with the selected machine instruction, consumers keep their
// indices, and interior nodes swallowed by a larger match are marked dead. Node
// storage lives in the compilation session's bumpalo arena, giving every node the
// session lifetime without per-node allocation churn. The graph is mutated only by
// the selector, single-writer, within one function's lowering; nothing outside this
// crate reads it concurrently. Operands are either other nodes, immediates, physical
// or virtual registers, frame slots, or symbolic expressions.

//! The per-function program graph.

use bumpalo::collections::Vec as ArenaVec;
use bumpalo::Bump;

use crate::core::registers::{Reg, VirtReg};
use crate::mc::fixup::SymbolExpr;
use crate::mc::inst::MachineInst;

/// Stable index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Value type of a node's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I8,
    I16,
}

impl ValueType {
    pub fn bits(self) -> u8 {
        match self {
            ValueType::I8 => 8,
            ValueType::I16 => 16,
        }
    }

    /// Byte width of one access of this type.
    pub fn bytes(self) -> i64 {
        match self {
            ValueType::I8 => 1,
            ValueType::I16 => 2,
        }
    }
}

/// Which memory a load/store touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrSpace {
    /// SRAM data space.
    Data,
    /// Flash program memory (only loadable, via the LPM family).
    Program,
}

/// Indexed-addressing mode attached to a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    None,
    /// Base pointer is incremented by the offset after the access.
    PostInc,
    /// Base pointer is decremented by the offset before the access.
    PreDec,
}

/// Extension applied by a load narrower than its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadExt {
    None,
    ZExt,
    SExt,
}

/// Memory-access facts carried by load and store nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    pub vt: ValueType,
    pub space: AddrSpace,
    pub index: IndexMode,
    /// Increment/decrement step for indexed modes; 0 otherwise. Pre-decrement
    /// steps may arrive negative; only the magnitude is significant.
    pub offset: i64,
    pub ext: LoadExt,
}

impl MemAccess {
    pub fn plain(vt: ValueType) -> MemAccess {
        MemAccess {
            vt,
            space: AddrSpace::Data,
            index: IndexMode::None,
            offset: 0,
            ext: LoadExt::None,
        }
    }
}

/// One operand of a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The value produced by another node.
    Node(NodeId),
    Imm(i64),
    Reg(Reg),
    VReg(VirtReg),
    Frame(i32),
    Sym(SymbolExpr),
}

/// Architecture-neutral operation of a node still awaiting selection.
#[derive(Debug, Clone, PartialEq)]
pub enum IrOp {
    Const(i64),
    FrameIndex(i32),
    Symbol(SymbolExpr),
    Add,
    Sub,
    And,
    Or,
    Eor,
    Mul,
    Load(MemAccess),
    Store(MemAccess),
    /// Call; operand 0 is the callee (symbol or computed address).
    Call,
    /// Indirect branch; operand 0 is the computed target.
    BrInd,
    /// Unconditional branch to a symbolic label (operand 0).
    Jmp,
    Ret,
    /// Inline assembly; operands are flag words followed by their registers.
    InlineAsm,
    /// Copy a value (operand 1) into a register (operand 0).
    CopyToReg,
    /// Read a register (operand 0).
    CopyFromReg,
}

/// Payload-free discriminant of `IrOp`, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOpKind {
    Const,
    FrameIndex,
    Symbol,
    Add,
    Sub,
    And,
    Or,
    Eor,
    Mul,
    Load,
    Store,
    Call,
    BrInd,
    Jmp,
    Ret,
    InlineAsm,
    CopyToReg,
    CopyFromReg,
}

impl IrOp {
    pub fn kind(&self) -> IrOpKind {
        match self {
            IrOp::Const(_) => IrOpKind::Const,
            IrOp::FrameIndex(_) => IrOpKind::FrameIndex,
            IrOp::Symbol(_) => IrOpKind::Symbol,
            IrOp::Add => IrOpKind::Add,
            IrOp::Sub => IrOpKind::Sub,
            IrOp::And => IrOpKind::And,
            IrOp::Or => IrOpKind::Or,
            IrOp::Eor => IrOpKind::Eor,
            IrOp::Mul => IrOpKind::Mul,
            IrOp::Load(_) => IrOpKind::Load,
            IrOp::Store(_) => IrOpKind::Store,
            IrOp::Call => IrOpKind::Call,
            IrOp::BrInd => IrOpKind::BrInd,
            IrOp::Jmp => IrOpKind::Jmp,
            IrOp::Ret => IrOpKind::Ret,
            IrOp::InlineAsm => IrOpKind::InlineAsm,
            IrOp::CopyToReg => IrOpKind::CopyToReg,
            IrOp::CopyFromReg => IrOpKind::CopyFromReg,
        }
    }
}

/// What a graph slot currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Still architecture-neutral.
    Ir(IrOp),
    /// Replaced by a selected machine instruction.
    Machine(MachineInst),
}

/// A node in the program graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub vt: ValueType,
    pub operands: Vec<Operand>,
    /// The virtual register consumers of this node's value read, assigned at
    /// selection time for value-producing nodes.
    pub result: Option<VirtReg>,
    dead: bool,
}

impl Node {
    pub fn ir_op(&self) -> Option<&IrOp> {
        match &self.kind {
            NodeKind::Ir(op) => Some(op),
            NodeKind::Machine(_) => None,
        }
    }

    pub fn machine(&self) -> Option<&MachineInst> {
        match &self.kind {
            NodeKind::Machine(mi) => Some(mi),
            NodeKind::Ir(_) => None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }
}

/// Index-addressed node arena for one function's lowering.
///
/// Storage is append-only; `order` carries the schedule, so selection rules
/// can splice copy instructions in front of an anchor without moving nodes.
pub struct ProgramGraph<'arena> {
    nodes: ArenaVec<'arena, Node>,
    order: ArenaVec<'arena, NodeId>,
}

impl<'arena> ProgramGraph<'arena> {
    pub fn new_in(arena: &'arena Bump) -> ProgramGraph<'arena> {
        ProgramGraph {
            nodes: ArenaVec::new_in(arena),
            order: ArenaVec::new_in(arena),
        }
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Append a node. Builders must add operands before their users; the
    /// selector relies on schedule order being topological.
    pub fn add(&mut self, op: IrOp, vt: ValueType, operands: Vec<Operand>) -> NodeId {
        let id = self.push_node(Node {
            kind: NodeKind::Ir(op),
            vt,
            operands,
            result: None,
            dead: false,
        });
        self.order.push(id);
        id
    }

    fn machine_node(inst: MachineInst, vt: ValueType, result: Option<VirtReg>) -> Node {
        Node {
            kind: NodeKind::Machine(inst),
            vt,
            operands: Vec::new(),
            result,
            dead: false,
        }
    }

    /// Insert an already-selected instruction immediately before `anchor` in
    /// the schedule (copy-in instructions bridging a custom rule).
    pub fn insert_machine_before(
        &mut self,
        anchor: NodeId,
        inst: MachineInst,
        vt: ValueType,
        result: Option<VirtReg>,
    ) -> NodeId {
        let id = self.push_node(Self::machine_node(inst, vt, result));
        let pos = self
            .order
            .iter()
            .position(|&n| n == anchor)
            .unwrap_or(self.order.len());
        self.order.insert(pos, id);
        id
    }

    /// Insert an already-selected instruction immediately after `anchor`
    /// (copy-out instructions bridging a custom rule).
    pub fn insert_machine_after(
        &mut self,
        anchor: NodeId,
        inst: MachineInst,
        vt: ValueType,
        result: Option<VirtReg>,
    ) -> NodeId {
        let id = self.push_node(Self::machine_node(inst, vt, result));
        let pos = self
            .order
            .iter()
            .position(|&n| n == anchor)
            .map(|p| p + 1)
            .unwrap_or(self.order.len());
        self.order.insert(pos, id);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Snapshot of the schedule, topological order.
    pub fn schedule(&self) -> Vec<NodeId> {
        self.order.to_vec()
    }

    /// Replace a matched node in place with its selected instruction.
    ///
    /// The slot keeps its index, so consumer edges stay valid and now point
    /// at the machine node's result.
    pub fn replace_with_machine(
        &mut self,
        id: NodeId,
        inst: MachineInst,
        result: Option<VirtReg>,
    ) {
        let node = &mut self.nodes[id.index()];
        node.kind = NodeKind::Machine(inst);
        node.result = result;
        // The machine instruction owns its operands now; clearing the graph
        // edges lets folded leaves fall out of use counts.
        node.operands.clear();
    }

    /// Mark a node consumed as part of a larger matched subgraph.
    pub fn mark_dead(&mut self, id: NodeId) {
        self.nodes[id.index()].dead = true;
    }

    /// Number of live nodes using `id` as an operand.
    pub fn use_count(&self, id: NodeId) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.dead)
            .flat_map(|n| n.operands.iter())
            .filter(|op| **op == Operand::Node(id))
            .count()
    }

    /// The selected instructions of all live machine nodes, in schedule
    /// order.
    pub fn machine_insts(&self) -> Vec<MachineInst> {
        self.order
            .iter()
            .map(|&id| &self.nodes[id.index()])
            .filter(|n| !n.dead)
            .filter_map(|n| n.machine().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc::catalogue::Opcode;

    #[test]
    fn replacement_keeps_indices_stable() {
        let arena = Bump::new();
        let mut g = ProgramGraph::new_in(&arena);
        let a = g.add(IrOp::Const(1), ValueType::I8, vec![]);
        let b = g.add(IrOp::Add, ValueType::I8, vec![Operand::Node(a), Operand::Imm(2)]);

        g.replace_with_machine(a, MachineInst::new(Opcode::Ldi, vec![]), None);
        assert!(g.node(a).machine().is_some());
        assert_eq!(g.node(b).operands[0], Operand::Node(a));
        assert_eq!(g.use_count(a), 1);
    }

    #[test]
    fn dead_nodes_drop_out_of_use_counts() {
        let arena = Bump::new();
        let mut g = ProgramGraph::new_in(&arena);
        let a = g.add(IrOp::Const(1), ValueType::I8, vec![]);
        let b = g.add(IrOp::Add, ValueType::I8, vec![Operand::Node(a), Operand::Node(a)]);
        assert_eq!(g.use_count(a), 2);
        g.mark_dead(b);
        assert_eq!(g.use_count(a), 0);
    }
}
