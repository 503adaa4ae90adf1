// This module defines error types for the avrmc backend core using the thiserror crate
// for idiomatic Rust error handling. SelectionError covers instruction-selection failures:
// NoMatchingPattern when neither a custom rule nor the generic catalogue table applies to
// a graph node, and InvalidOperandShape when an assumed structural invariant on a node is
// violated (an upstream bug, not a user error). EncodingError covers machine-code emission
// failures: UnsizedInstruction for catalogue entries declaring a zero byte length (pseudo
// instructions must be expanded before emission), UnknownEncodingTableEntry for registers
// or opcodes outside the encoding tables, and InvalidOperandShape for operand-kind
// mismatches detected during field packing. Every variant is fatal; the core performs no
// local recovery. SelectionResult<T> and EncodingResult<T> are convenience aliases.

//! Error types for the selection and encoding pipeline.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use crate::core::graph::IrOpKind;
use crate::mc::catalogue::Opcode;

/// Errors raised during instruction selection.
///
/// Selection has exactly one soft outcome, a custom rule declining to match,
/// which the rules express as `None`, never as an error. Everything here
/// aborts compilation of the enclosing function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no selection rule or catalogue pattern matches {op:?} (i{vt})")]
    NoMatchingPattern { op: IrOpKind, vt: u8 },

    #[error("operand {index} of {op:?} has an unexpected shape: expected {expected}")]
    InvalidOperandShape {
        op: IrOpKind,
        index: usize,
        expected: &'static str,
    },
}

/// Errors raised during machine-code emission.
///
/// All of these indicate a defect in the instruction tables or in the
/// instructions handed to the encoder, never a recoverable condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("instruction {opcode:?} has no byte size; pseudos must be expanded before emission")]
    UnsizedInstruction { opcode: Opcode },

    #[error("no encoding table entry for {what}")]
    UnknownEncodingTableEntry { what: String },

    #[error("operand {index} of {opcode:?} has an unexpected shape: expected {expected}")]
    InvalidOperandShape {
        opcode: Opcode,
        index: usize,
        expected: &'static str,
    },
}

/// Result type alias for selection.
pub type SelectionResult<T> = Result<T, SelectionError>;

/// Result type alias for encoding.
pub type EncodingResult<T> = Result<T, EncodingError>;
