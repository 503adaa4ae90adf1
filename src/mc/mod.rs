// This module groups the machine-code side of the avrmc pipeline: the selected
// instruction form (inst), the static instruction catalogue with its bit-scatter
// tables and decode support (catalogue), fixup kinds and symbolic expressions for
// operands that are not concrete at encode time (fixup), and the encoder itself
// with its per-operand encoding functions, post-encoding correction, and 16-bit
// word serialization (encoder). The catalogue is immutable process-global data;
// the encoder streams one instruction at a time and retains nothing.

//! Machine instructions, the instruction catalogue, fixups, and the encoder.

pub mod catalogue;
pub mod encoder;
pub mod fixup;
pub mod inst;

pub use catalogue::{CatalogueEntry, FieldKind, Opcode, OperandField, PostEncode};
pub use encoder::{CodeEmitter, EncodeResult};
pub use fixup::{ExprModifier, FixupKind, FixupRecord, SymbolExpr};
pub use inst::{MachineInst, MachineOperand};
