// This module defines the deferred-resolution machinery of the avrmc encoder: fixup
// kinds, fixup records, and the symbolic expressions they carry. Whenever the encoder
// meets an operand that is not yet a concrete value (a forward branch target, an
// external symbol, a lo8/hi8 fragment of an address) it emits a placeholder of zero
// bits and appends a FixupRecord naming the field's kind and the unresolved
// expression. Records are append-only output; the downstream linker/relocation stage
// consumes them after a whole function has been encoded, and nothing in this crate
// ever resolves one. SymbolExpr models symbol+addend with an optional lo8/hi8
// modifier; a modified expression over a known constant can still fold to a concrete
// value, which the encoder checks before falling back to a fixup.

//! Fixup records and symbolic expressions.

use std::fmt;

/// The kind of field a fixup patches, fixing its width and placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixupKind {
    /// 7-bit PC-relative conditional branch displacement.
    Branch7PcRel,
    /// 13-bit PC-relative `rjmp`/`rcall` displacement.
    Branch13PcRel,
    /// 22-bit absolute `jmp`/`call` target.
    Call,
    /// 6-bit displacement field of the reg+disp addressing form.
    Disp6,
    /// 6-bit immediate of `adiw`/`sbiw`.
    Imm6AddSubIw,
    /// 8-bit immediate field (`ldi` and friends).
    Imm8,
    /// 16-bit absolute data address (`lds`/`sts`).
    Abs16,
    /// 8-bit low fragment of an address, `lo8(sym)`.
    Lo8Ldi,
    /// 8-bit high fragment of an address, `hi8(sym)`.
    Hi8Ldi,
}

/// Modifier applied to a symbol reference before it lands in a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprModifier {
    /// Low byte of the value.
    Lo8,
    /// High byte of the value.
    Hi8,
}

impl ExprModifier {
    /// The fixup kind a modified 8-bit immediate field needs.
    pub fn fixup_kind(self) -> FixupKind {
        match self {
            ExprModifier::Lo8 => FixupKind::Lo8Ldi,
            ExprModifier::Hi8 => FixupKind::Hi8Ldi,
        }
    }
}

/// A not-yet-concrete operand value: `modifier(symbol + addend)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolExpr {
    pub symbol: String,
    pub addend: i64,
    pub modifier: Option<ExprModifier>,
}

impl SymbolExpr {
    pub fn new(symbol: impl Into<String>) -> SymbolExpr {
        SymbolExpr {
            symbol: symbol.into(),
            addend: 0,
            modifier: None,
        }
    }

    pub fn with_addend(mut self, addend: i64) -> SymbolExpr {
        self.addend = addend;
        self
    }

    pub fn with_modifier(mut self, modifier: ExprModifier) -> SymbolExpr {
        self.modifier = Some(modifier);
        self
    }

    /// Fold to a constant if the symbol part is absent.
    ///
    /// An expression with an empty symbol is a bare modified constant, which
    /// lo8/hi8 can evaluate immediately; anything naming a real symbol stays
    /// unresolved here.
    pub fn evaluate_as_constant(&self) -> Option<i64> {
        if !self.symbol.is_empty() {
            return None;
        }
        let value = self.addend;
        Some(match self.modifier {
            None => value,
            Some(ExprModifier::Lo8) => value & 0xff,
            Some(ExprModifier::Hi8) => (value >> 8) & 0xff,
        })
    }
}

impl fmt::Display for SymbolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = if self.addend == 0 {
            self.symbol.clone()
        } else {
            format!("{}{:+}", self.symbol, self.addend)
        };
        match self.modifier {
            None => f.write_str(&body),
            Some(ExprModifier::Lo8) => write!(f, "lo8({body})"),
            Some(ExprModifier::Hi8) => write!(f, "hi8({body})"),
        }
    }
}

/// A deferred-resolution marker attached to an encoded instruction.
///
/// `offset` is the byte offset of the patched field. Per-instruction encoding
/// always records offset 0 (multi-instruction-wide fixups are not supported);
/// function-level encoding rebases it to the instruction's position in the
/// byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixupRecord {
    pub offset: u32,
    pub kind: FixupKind,
    pub expr: SymbolExpr,
}

impl FixupRecord {
    pub fn at_start(kind: FixupKind, expr: SymbolExpr) -> FixupRecord {
        FixupRecord {
            offset: 0,
            kind,
            expr,
        }
    }
}

/// Adjust a resolved branch or call target so the stored displacement is
/// relative to the end of the instruction, not its start.
pub fn adjust_branch_target(target: i64, inst_size: u8) -> i64 {
    target - i64::from(inst_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_folding_applies_modifiers() {
        let e = SymbolExpr::new("").with_addend(0x1234);
        assert_eq!(e.evaluate_as_constant(), Some(0x1234));
        let lo = SymbolExpr::new("")
            .with_addend(0x1234)
            .with_modifier(ExprModifier::Lo8);
        assert_eq!(lo.evaluate_as_constant(), Some(0x34));
        let hi = SymbolExpr::new("")
            .with_addend(0x1234)
            .with_modifier(ExprModifier::Hi8);
        assert_eq!(hi.evaluate_as_constant(), Some(0x12));
    }

    #[test]
    fn symbols_do_not_fold() {
        let e = SymbolExpr::new("external").with_modifier(ExprModifier::Lo8);
        assert_eq!(e.evaluate_as_constant(), None);
        assert_eq!(e.to_string(), "lo8(external)");
    }

    #[test]
    fn branch_targets_are_end_relative() {
        assert_eq!(adjust_branch_target(10, 2), 8);
        assert_eq!(adjust_branch_target(0, 4), -4);
    }
}
