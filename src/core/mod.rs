// This module serves as the central hub for avrmc's shared infrastructure,
// providing the building blocks both pipeline stages sit on: error types (thiserror
// enums covering the selection and encoding taxonomies), session management
// (arena-based allocation via bumpalo plus per-unit statistics), the Program Graph
// (index-addressed node arena with in-place replacement), the register model
// (physical registers, register classes, encoding indices), and the subtarget
// feature bitset that gates instruction availability. Everything here is immutable
// for the duration of a compilation unit except the graph, which is mutated only by
// the selector under single-writer discipline, and the session's statistics.

//! Shared infrastructure: session, graph, registers, subtarget, errors.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based memory allocation using `bumpalo`
//! - Virtual-register allocation and compilation statistics
//!
//! ## Program Graph (`graph`)
//! - Index-addressed node arena with stable ids
//! - In-place replacement of matched nodes, use redirection
//!
//! ## Register Model (`registers`)
//! - Physical registers, pointer pairs, encoding indices
//! - Register classes driving addressing-mode legality
//!
//! ## Subtarget (`subtarget`)
//! - Read-only feature bitset, fixed at unit start

pub mod error;
pub mod graph;
pub mod registers;
pub mod session;
pub mod subtarget;

pub use error::{EncodingError, EncodingResult, SelectionError, SelectionResult};
pub use graph::{
    AddrSpace, IndexMode, IrOp, IrOpKind, LoadExt, MemAccess, Node, NodeId, NodeKind, Operand,
    ProgramGraph, ValueType,
};
pub use registers::{Reg, RegClass, VirtReg};
pub use session::{CompilationSession, SessionStats};
pub use subtarget::{Feature, Subtarget};
