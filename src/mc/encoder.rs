// This module converts selected machine instructions into AVR machine code. The
// CodeEmitter drives a catalogue-declared bit-packing step: every operand field is
// encoded by a per-kind function (register index lookup, immediate masking with a
// fixup fallback for symbolic operands, the 2-bit pointer-register code, the 7-bit
// reg+displacement composite, one's-complemented immediates, end-relative branch and
// call targets, f64 bit-pattern immediates) and scattered into the instruction word
// at the positions the catalogue declares. The ld/st register-indirect family then
// gets its post-encoding correction: one bit of the encoding depends jointly on the
// pointer register identity and the addressing mode, so it cannot be a per-operand
// field and is set after packing. Serialization follows the target's natural 16-bit
// word: multi-word instructions are emitted highest word first, each word
// little-endian internally. Unresolved operands produce FixupRecords at offset 0;
// encode_function rebases them to function byte offsets for the fixup consumer.

//! Machine-code emission for selected instructions.

use crate::core::error::{EncodingError, EncodingResult};
use crate::core::registers::{X, Y, Z};
use crate::core::session::CompilationSession;
use crate::mc::catalogue::{self, CatalogueEntry, FieldKind, OperandField, PostEncode};
use crate::mc::fixup::{adjust_branch_target, FixupKind, FixupRecord, SymbolExpr};
use crate::mc::inst::{MachineInst, MachineOperand};

/// Encoded output of one function: the byte stream plus its fixups, offsets
/// rebased to the function start.
#[derive(Debug, Clone, Default)]
pub struct EncodeResult {
    pub code: Vec<u8>,
    pub fixups: Vec<FixupRecord>,
}

/// Streaming encoder for selected instructions.
pub struct CodeEmitter<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
}

impl<'s, 'arena> CodeEmitter<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>) -> CodeEmitter<'s, 'arena> {
        CodeEmitter { session }
    }

    /// Encode one instruction, appending its fixups (offsets relative to the
    /// instruction start; multi-instruction-wide fixups are not supported).
    pub fn encode(
        &self,
        mi: &MachineInst,
        fixups: &mut Vec<FixupRecord>,
    ) -> EncodingResult<Vec<u8>> {
        let entry = catalogue::entry(mi.opcode).ok_or_else(|| {
            EncodingError::UnknownEncodingTableEntry {
                what: format!("opcode {:?}", mi.opcode),
            }
        })?;

        if entry.is_pseudo() {
            return Err(EncodingError::UnsizedInstruction { opcode: mi.opcode });
        }

        let fixups_before = fixups.len();
        let mut word = entry.base;
        for field in entry.fields {
            let mask = (1u64 << field.width()) - 1;
            let value = self.encode_field(mi, entry, field, fixups)?;
            catalogue::deposit(value & mask, field.bits, &mut word);
        }

        if let Some(PostEncode::LoadStore) = entry.post_encode {
            word = post_encode_load_store(mi, word)?;
        }

        let mut bytes = Vec::with_capacity(entry.size as usize);
        emit_words(word, entry.size, &mut bytes);
        log::trace!(
            "encoded {} -> {:02x?} ({} fixups)",
            mi,
            bytes,
            fixups.len() - fixups_before
        );
        self.session
            .record_encoded(bytes.len(), fixups.len() - fixups_before);

        Ok(bytes)
    }

    /// Encode a function's instructions in final order, rebasing fixup
    /// offsets to the function's byte stream.
    pub fn encode_function(&self, insts: &[MachineInst]) -> EncodingResult<EncodeResult> {
        let mut result = EncodeResult::default();
        for mi in insts {
            let mut inst_fixups = Vec::new();
            let bytes = self.encode(mi, &mut inst_fixups)?;
            let base = result.code.len() as u32;
            for mut fixup in inst_fixups {
                fixup.offset += base;
                result.fixups.push(fixup);
            }
            result.code.extend_from_slice(&bytes);
        }
        Ok(result)
    }

    fn encode_field(
        &self,
        mi: &MachineInst,
        entry: &CatalogueEntry,
        field: &OperandField,
        fixups: &mut Vec<FixupRecord>,
    ) -> EncodingResult<u64> {
        let index = field.op_index as usize;
        let operand = mi.operand(index).ok_or(EncodingError::InvalidOperandShape {
            opcode: mi.opcode,
            index,
            expected: "an operand for every declared field",
        })?;

        match field.kind {
            FieldKind::Reg => encode_reg(mi, index, operand),
            FieldKind::Imm(kind) => self.encode_imm(mi, index, operand, kind, fixups),
            FieldKind::Complement => {
                let imm = operand.as_imm().ok_or(EncodingError::InvalidOperandShape {
                    opcode: mi.opcode,
                    index,
                    expected: "an immediate",
                })?;
                Ok(!0u64 - imm as u64)
            }
            FieldKind::PtrReg => encode_ldst_ptr_reg(mi, index, operand),
            FieldKind::Memri => self.encode_memri(mi, index, fixups),
            FieldKind::RelBranch(kind) => {
                self.encode_rel_target(mi, index, operand, entry.size, kind, fixups)
            }
            FieldKind::CallTarget => {
                self.encode_rel_target(mi, index, operand, entry.size, FixupKind::Call, fixups)
            }
        }
    }

    /// Plain immediate field. Symbolic operands that cannot fold to a
    /// constant become a fixup at offset 0 with a zero placeholder.
    fn encode_imm(
        &self,
        mi: &MachineInst,
        index: usize,
        operand: &MachineOperand,
        kind: FixupKind,
        fixups: &mut Vec<FixupRecord>,
    ) -> EncodingResult<u64> {
        match operand {
            MachineOperand::Imm(v) => Ok(*v as u64),
            // Constant bit patterns encode by their high bits.
            MachineOperand::FpImm(f) => Ok(f.to_bits() >> 32),
            MachineOperand::Expr(expr) => Ok(self.expr_value(expr, kind, fixups)),
            _ => Err(EncodingError::InvalidOperandShape {
                opcode: mi.opcode,
                index,
                expected: "an immediate or symbolic expression",
            }),
        }
    }

    /// Reg+displacement composite: 1-bit register selector in the high bit
    /// (Z=0, Y=1), 6-bit displacement in the low bits. The selector alone
    /// decides well-formedness; X has no encoding in this field.
    fn encode_memri(
        &self,
        mi: &MachineInst,
        index: usize,
        fixups: &mut Vec<FixupRecord>,
    ) -> EncodingResult<u64> {
        let reg_op = mi.operand(index).ok_or(EncodingError::InvalidOperandShape {
            opcode: mi.opcode,
            index,
            expected: "a base register",
        })?;
        let offset_op = mi
            .operand(index + 1)
            .ok_or(EncodingError::InvalidOperandShape {
                opcode: mi.opcode,
                index: index + 1,
                expected: "a displacement",
            })?;

        let reg_bit: u64 = match reg_op {
            MachineOperand::Reg(r) if *r == Z => 0,
            MachineOperand::Reg(r) if *r == Y => 1,
            MachineOperand::Reg(r) => {
                return Err(EncodingError::UnknownEncodingTableEntry {
                    what: format!("reg+disp base register {r}, expected Y or Z"),
                })
            }
            // Frame-index bases must be resolved by frame lowering first.
            _ => {
                return Err(EncodingError::InvalidOperandShape {
                    opcode: mi.opcode,
                    index,
                    expected: "a physical base register",
                })
            }
        };

        let offset_bits: u64 = match offset_op {
            MachineOperand::Imm(v) => *v as u64 & 0x3f,
            MachineOperand::Expr(expr) => self.expr_value(expr, FixupKind::Disp6, fixups) & 0x3f,
            _ => {
                return Err(EncodingError::InvalidOperandShape {
                    opcode: mi.opcode,
                    index: index + 1,
                    expected: "an immediate or symbolic displacement",
                })
            }
        };

        Ok((reg_bit << 6) | offset_bits)
    }

    /// Branch/call target. Resolved targets are stored relative to the end
    /// of the instruction; unresolved ones emit the field's fixup kind.
    fn encode_rel_target(
        &self,
        mi: &MachineInst,
        index: usize,
        operand: &MachineOperand,
        inst_size: u8,
        kind: FixupKind,
        fixups: &mut Vec<FixupRecord>,
    ) -> EncodingResult<u64> {
        match operand {
            MachineOperand::Imm(target) => {
                Ok(adjust_branch_target(*target, inst_size) as u64)
            }
            MachineOperand::Expr(expr) => {
                fixups.push(FixupRecord::at_start(kind, expr.clone()));
                Ok(0)
            }
            _ => Err(EncodingError::InvalidOperandShape {
                opcode: mi.opcode,
                index,
                expected: "an immediate or symbolic target",
            }),
        }
    }

    /// Value of a symbolic expression: a foldable expression encodes
    /// directly, anything else becomes a fixup with a zero placeholder.
    fn expr_value(
        &self,
        expr: &SymbolExpr,
        default_kind: FixupKind,
        fixups: &mut Vec<FixupRecord>,
    ) -> u64 {
        if let Some(v) = expr.evaluate_as_constant() {
            return v as u64;
        }
        let kind = expr.modifier.map_or(default_kind, |m| m.fixup_kind());
        fixups.push(FixupRecord::at_start(kind, expr.clone()));
        0
    }
}

/// Plain register field: the register's hardware encoding index.
fn encode_reg(mi: &MachineInst, index: usize, operand: &MachineOperand) -> EncodingResult<u64> {
    match operand {
        MachineOperand::Reg(r) => {
            r.encoding()
                .map(u64::from)
                .ok_or(EncodingError::UnknownEncodingTableEntry {
                    what: format!("register {r} has no encoding index"),
                })
        }
        _ => Err(EncodingError::InvalidOperandShape {
            opcode: mi.opcode,
            index,
            expected: "a physical register",
        }),
    }
}

/// 2-bit pointer-register code of the ld/st family.
fn encode_ldst_ptr_reg(
    mi: &MachineInst,
    index: usize,
    operand: &MachineOperand,
) -> EncodingResult<u64> {
    let reg = operand
        .as_phys_reg()
        .ok_or(EncodingError::InvalidOperandShape {
            opcode: mi.opcode,
            index,
            expected: "a pointer register",
        })?;
    match reg {
        r if r == X => Ok(0b11),
        r if r == Y => Ok(0b10),
        r if r == Z => Ok(0b00),
        other => Err(EncodingError::UnknownEncodingTableEntry {
            what: format!("pointer register {other}"),
        }),
    }
}

/// Post-encoding step for the ld/st register-indirect family.
///
/// The encoding of this family is inconsistent w.r.t. the pointer register
/// and the addressing mode: one bit is 1 sometimes and 0 at other times with
/// no per-field pattern. The truth table reduces to
/// `bit12 = is_predec OR is_postinc OR is_reg_x`, set here after packing.
fn post_encode_load_store(mi: &MachineInst, word: u32) -> EncodingResult<u32> {
    use crate::mc::catalogue::Opcode;

    let reg0 = mi.operand(0).and_then(MachineOperand::as_phys_reg);
    let reg1 = mi.operand(1).and_then(MachineOperand::as_phys_reg);
    if reg0.is_none() || reg1.is_none() {
        return Err(EncodingError::InvalidOperandShape {
            opcode: mi.opcode,
            index: if reg0.is_none() { 0 } else { 1 },
            expected: "register operands on a load/store",
        });
    }

    let is_reg_x = reg0 == Some(X) || reg1 == Some(X);
    let is_predec = matches!(mi.opcode, Opcode::LdRdPtrPd | Opcode::StPtrPdRr);
    let is_postinc = matches!(mi.opcode, Opcode::LdRdPtrPi | Opcode::StPtrPiRr);

    if is_reg_x || is_predec || is_postinc {
        Ok(word | (1 << 12))
    } else {
        Ok(word)
    }
}

/// Serialize an encoded value: 16-bit words, highest word first, each word
/// little-endian internally.
fn emit_words(value: u32, size: u8, out: &mut Vec<u8>) {
    let words = size / 2;
    for i in (0..words).rev() {
        let word = (value >> (16 * u32::from(i))) as u16;
        out.extend_from_slice(&word.to_le_bytes());
    }
}

/// Reassemble the encoded value from emitted bytes (inverse of the word
/// serialization), for catalogue-driven re-decoding.
pub fn raw_from_bytes(bytes: &[u8]) -> u32 {
    let mut value = 0u32;
    for chunk in bytes.chunks_exact(2) {
        let word = u16::from_le_bytes([chunk[0], chunk[1]]);
        value = (value << 16) | u32::from(word);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registers::Reg;
    use crate::core::subtarget::Subtarget;
    use crate::mc::catalogue::Opcode;
    use bumpalo::Bump;

    fn emitter_fixture(arena: &Bump) -> CompilationSession<'_> {
        CompilationSession::new(arena, Subtarget::enhanced())
    }

    #[test]
    fn word_serialization_is_high_word_first_little_endian() {
        let mut out = Vec::new();
        emit_words(0x940E_1234, 4, &mut out);
        assert_eq!(out, [0x0E, 0x94, 0x34, 0x12]);
        assert_eq!(raw_from_bytes(&out), 0x940E_1234);
    }

    #[test]
    fn memri_selector_high_convention() {
        let arena = Bump::new();
        let session = emitter_fixture(&arena);
        let emitter = CodeEmitter::new(&session);
        let mi = MachineInst::new(
            Opcode::LddRdPtrQ,
            vec![
                MachineOperand::Reg(Reg::R0),
                MachineOperand::Reg(Y),
                MachineOperand::Imm(5),
            ],
        );
        let mut fixups = Vec::new();
        let field = catalogue::entry(Opcode::LddRdPtrQ).unwrap().fields[1];
        let value = emitter.encode_memri(&mi, field.op_index as usize, &mut fixups).unwrap();
        assert_eq!(value, (1 << 6) | 5);
        assert_eq!(value, 0x45);
        assert!(fixups.is_empty());
    }

    #[test]
    fn memri_rejects_x_base() {
        let arena = Bump::new();
        let session = emitter_fixture(&arena);
        let emitter = CodeEmitter::new(&session);
        let mi = MachineInst::new(
            Opcode::LddRdPtrQ,
            vec![
                MachineOperand::Reg(Reg::R0),
                MachineOperand::Reg(X),
                MachineOperand::Imm(5),
            ],
        );
        let mut fixups = Vec::new();
        let err = emitter.encode_memri(&mi, 1, &mut fixups).unwrap_err();
        assert!(matches!(err, EncodingError::UnknownEncodingTableEntry { .. }));
    }

    #[test]
    fn complement_is_ones_complement_of_the_field() {
        let arena = Bump::new();
        let session = emitter_fixture(&arena);
        let emitter = CodeEmitter::new(&session);
        let mi = MachineInst::new(
            Opcode::Cbr,
            vec![
                MachineOperand::Reg(Reg::R16),
                MachineOperand::Reg(Reg::R16),
                MachineOperand::Imm(0x0F),
            ],
        );
        let mut fixups = Vec::new();
        let bytes = emitter.encode(&mi, &mut fixups).unwrap();
        // cbr r16, 0x0F == andi r16, 0xF0.
        let word = raw_from_bytes(&bytes);
        let fields = catalogue::decode_fields(catalogue::entry(Opcode::Cbr).unwrap(), word);
        assert_eq!(fields[1], 0xF0);
    }

    #[test]
    fn pseudos_are_unsized() {
        let arena = Bump::new();
        let session = emitter_fixture(&arena);
        let emitter = CodeEmitter::new(&session);
        let mi = MachineInst::new(Opcode::Frmidx, vec![]);
        let mut fixups = Vec::new();
        assert_eq!(
            emitter.encode(&mi, &mut fixups),
            Err(EncodingError::UnsizedInstruction {
                opcode: Opcode::Frmidx
            })
        );
    }
}
