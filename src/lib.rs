//! avrmc - AVR instruction selection and machine-code emission.
//!
//! This crate lowers an architecture-neutral per-function program graph to AVR
//! machine code in two synchronous stages: the [`isel::Selector`] rewrites the
//! graph into catalogue-identified machine instructions, and the
//! [`mc::CodeEmitter`] packs those instructions into their dense 16-bit-word
//! encodings, appending fixup records for operands that are not yet concrete.
//!
//! # Primary Usage
//!
//! ```ignore
//! use avrmc::core::{CompilationSession, ProgramGraph, Subtarget};
//! use avrmc::isel::Selector;
//! use avrmc::mc::CodeEmitter;
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena, Subtarget::enhanced());
//!
//! let mut graph = ProgramGraph::new_in(&arena);
//! // ... build the function's nodes ...
//!
//! Selector::new(&session).select_function(&mut graph)?;
//! let encoded = CodeEmitter::new(&session).encode_function(&graph.machine_insts())?;
//! // encoded.code holds the bytes, encoded.fixups the relocation records.
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (session, graph, registers, subtarget)
//! - [`isel`] - The selector: custom rules first, generic catalogue fallback
//! - [`mc`] - Machine instructions, the catalogue, fixups, and the encoder
//!
//! Both stages are single-threaded per function; the only state shared across
//! functions is the read-only subtarget and the static catalogue, so an outer
//! driver may process functions in parallel.

pub mod core;
pub mod isel;
pub mod mc;

pub use crate::core::{
    CompilationSession, EncodingError, EncodingResult, ProgramGraph, SelectionError,
    SelectionResult, SessionStats, Subtarget,
};
pub use crate::isel::Selector;
pub use crate::mc::{CodeEmitter, EncodeResult, FixupRecord, MachineInst, MachineOperand};
