//! Test machine-code emission against the instruction catalogue.
//!
//! These tests drive the encoder with fully-bound instructions and check the
//! emitted bytes, the catalogue round-trip, the ld/st post-encoding bit, and
//! fixup emission for unresolved operands.

use bumpalo::Bump;
use avrmc::core::{CompilationSession, Subtarget};
use avrmc::core::registers::{Reg, X, Y, Z};
use avrmc::mc::encoder::raw_from_bytes;
use avrmc::mc::{catalogue, CodeEmitter, FixupKind, MachineInst, MachineOperand, Opcode, SymbolExpr};

fn encode_one(mi: &MachineInst) -> (Vec<u8>, Vec<avrmc::FixupRecord>) {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena, Subtarget::enhanced());
    let emitter = CodeEmitter::new(&session);
    let mut fixups = Vec::new();
    let bytes = emitter.encode(mi, &mut fixups).unwrap();
    (bytes, fixups)
}

#[test]
fn resolved_operands_round_trip_through_the_catalogue() {
    // add r24, r7: rd=24, rr=7.
    let mi = MachineInst::new(
        Opcode::Add,
        vec![
            MachineOperand::Reg(Reg::R24),
            MachineOperand::Reg(Reg::R24),
            MachineOperand::Reg(Reg::R7),
        ],
    );
    let (bytes, fixups) = encode_one(&mi);
    assert!(fixups.is_empty());
    let entry = catalogue::entry(Opcode::Add).unwrap();
    assert_eq!(bytes.len(), entry.size as usize);
    let fields = catalogue::decode_fields(entry, raw_from_bytes(&bytes));
    assert_eq!(fields, vec![24, 7]);
}

#[test]
fn in_out_and_push_round_trip() {
    let mi = MachineInst::new(
        Opcode::Out,
        vec![MachineOperand::Imm(0x3F), MachineOperand::Reg(Reg::R16)],
    );
    let (bytes, _) = encode_one(&mi);
    let entry = catalogue::entry(Opcode::Out).unwrap();
    let fields = catalogue::decode_fields(entry, raw_from_bytes(&bytes));
    assert_eq!(fields, vec![0x3F, 16]);

    let mi = MachineInst::new(Opcode::Push, vec![MachineOperand::Reg(Reg::R31)]);
    let (bytes, _) = encode_one(&mi);
    let entry = catalogue::entry(Opcode::Push).unwrap();
    assert_eq!(
        catalogue::decode_fields(entry, raw_from_bytes(&bytes)),
        vec![31]
    );
}

#[test]
fn ldi_matches_reference_encoding() {
    // ldi r16, 0xCA == 0xEC0A.
    let mi = MachineInst::new(
        Opcode::Ldi,
        vec![MachineOperand::Reg(Reg::R16), MachineOperand::Imm(0xCA)],
    );
    let (bytes, _) = encode_one(&mi);
    assert_eq!(bytes, [0x0A, 0xEC]);
}

#[test]
fn ld_x_predec_sets_the_inconsistent_bit() {
    let mi = MachineInst::new(
        Opcode::LdRdPtrPd,
        vec![MachineOperand::Reg(Reg::R24), MachineOperand::Reg(X)],
    );
    let (bytes, _) = encode_one(&mi);
    let word = raw_from_bytes(&bytes);
    assert_ne!(word & (1 << 12), 0);
}

#[test]
fn ld_y_plain_leaves_the_inconsistent_bit_clear() {
    for ptr in [Y, Z] {
        let mi = MachineInst::new(
            Opcode::LdRdPtr,
            vec![MachineOperand::Reg(Reg::R24), MachineOperand::Reg(ptr)],
        );
        let (bytes, _) = encode_one(&mi);
        let word = raw_from_bytes(&bytes);
        assert_eq!(word & (1 << 12), 0, "bit 12 set for plain ld through {ptr}");
    }
}

#[test]
fn ld_x_plain_still_sets_the_bit() {
    // X has no displacement encoding waiting room, so even the plain form
    // carries the bit.
    let mi = MachineInst::new(
        Opcode::LdRdPtr,
        vec![MachineOperand::Reg(Reg::R24), MachineOperand::Reg(X)],
    );
    let (bytes, _) = encode_one(&mi);
    assert_ne!(raw_from_bytes(&bytes) & (1 << 12), 0);
}

#[test]
fn ldd_through_y_with_displacement_five() {
    // ldd r0, Y+5: the 7-bit composite must read (1 << 6) | 5 = 0x45 under
    // the selector-high convention.
    let mi = MachineInst::new(
        Opcode::LddRdPtrQ,
        vec![
            MachineOperand::Reg(Reg::R0),
            MachineOperand::Reg(Y),
            MachineOperand::Imm(5),
        ],
    );
    let (bytes, _) = encode_one(&mi);
    let entry = catalogue::entry(Opcode::LddRdPtrQ).unwrap();
    let fields = catalogue::decode_fields(entry, raw_from_bytes(&bytes));
    assert_eq!(fields[1], 0x45);
}

#[test]
fn unresolved_call_emits_one_call_fixup_at_offset_zero() {
    let mi = MachineInst::new(
        Opcode::Call,
        vec![MachineOperand::Expr(SymbolExpr::new("external_fn"))],
    );
    let (bytes, fixups) = encode_one(&mi);
    // The target field stays zero; only the opcode bits survive.
    assert_eq!(raw_from_bytes(&bytes), 0x940E_0000);
    assert_eq!(fixups.len(), 1);
    assert_eq!(fixups[0].offset, 0);
    assert_eq!(fixups[0].kind, FixupKind::Call);
    assert_eq!(fixups[0].expr.symbol, "external_fn");
}

#[test]
fn branch_targets_are_end_relative() {
    // rjmp .+6 stores (6 - 2) / 2 instruction words... the field itself holds
    // the end-relative byte delta; check the adjustment against the raw word.
    let mi = MachineInst::new(Opcode::Rjmp, vec![MachineOperand::Imm(6)]);
    let (bytes, fixups) = encode_one(&mi);
    assert!(fixups.is_empty());
    let entry = catalogue::entry(Opcode::Rjmp).unwrap();
    let fields = catalogue::decode_fields(entry, raw_from_bytes(&bytes));
    assert_eq!(fields[0], 4); // 6 minus the instruction's own 2 bytes
}

#[test]
fn function_encoding_rebases_fixup_offsets() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena, Subtarget::enhanced());
    let emitter = CodeEmitter::new(&session);
    let insts = vec![
        MachineInst::new(
            Opcode::Ldi,
            vec![MachineOperand::Reg(Reg::R24), MachineOperand::Imm(1)],
        ),
        MachineInst::new(
            Opcode::Call,
            vec![MachineOperand::Expr(SymbolExpr::new("callee"))],
        ),
        MachineInst::new(Opcode::Ret, vec![]),
    ];
    let result = emitter.encode_function(&insts).unwrap();
    assert_eq!(result.code.len(), 2 + 4 + 2);
    assert_eq!(result.fixups.len(), 1);
    // The call starts after the 2-byte ldi.
    assert_eq!(result.fixups[0].offset, 2);

    let stats = session.stats();
    assert_eq!(stats.insts_encoded, 3);
    assert_eq!(stats.bytes_emitted, 8);
    assert_eq!(stats.fixups_emitted, 1);
}
