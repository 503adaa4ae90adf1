// This module defines the AVR physical register set and register classes for the
// avrmc backend. Reg enumerates the thirty-two 8-bit general purpose registers, the
// four adjacent 16-bit pairs the ISA addresses as units (W, X, Y, Z), and the stack
// pointer. RegClass describes the asymmetric class structure that drives selection
// and encoding legality: Gpr8 (everything), Ld8 (r16-r31, the only registers
// immediate-form instructions accept), PtrRegs (X/Y/Z, the only pairs usable in
// register-indirect addressing), PtrDispRegs (Y/Z, the pairs that also accept a
// displacement), and the synthetic Gpr8Quad class manufactured by inline-assembly
// pair expansion. Each register knows its hardware encoding index; pairs encode as
// their even half divided by two, matching the MOVW/ADIW field conventions. VirtReg
// carries a class so later passes know what a placeholder may be assigned to.

//! AVR registers and register classes.

use std::fmt;

/// An AVR physical register.
///
/// The 16-bit pairs are first-class registers here because the ISA addresses
/// them as units in pointer roles; they are not shorthand for two `Reg`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Reg {
    R0, R1, R2, R3, R4, R5, R6, R7,
    R8, R9, R10, R11, R12, R13, R14, R15,
    R16, R17, R18, R19, R20, R21, R22, R23,
    R24, R25, R26, R27, R28, R29, R30, R31,
    /// W pair (r25:r24), the ADIW-capable accumulator pair.
    R25R24,
    /// X pointer pair (r27:r26).
    R27R26,
    /// Y pointer pair (r29:r28).
    R29R28,
    /// Z pointer pair (r31:r30), the only pair ICALL/IJMP/LPM can use.
    R31R30,
    /// Stack pointer (SPH:SPL io pair).
    SP,
}

/// The X pointer pair.
pub const X: Reg = Reg::R27R26;
/// The Y pointer pair.
pub const Y: Reg = Reg::R29R28;
/// The Z pointer pair.
pub const Z: Reg = Reg::R31R30;

impl Reg {
    /// Hardware encoding index for register fields.
    ///
    /// Single registers encode as their number; pairs encode as the even half
    /// divided by two (the MOVW field convention). `SP` never appears in a
    /// register field and has no encoding.
    pub fn encoding(self) -> Option<u8> {
        use Reg::*;
        let enc = match self {
            R0 => 0, R1 => 1, R2 => 2, R3 => 3, R4 => 4, R5 => 5, R6 => 6, R7 => 7,
            R8 => 8, R9 => 9, R10 => 10, R11 => 11, R12 => 12, R13 => 13, R14 => 14,
            R15 => 15, R16 => 16, R17 => 17, R18 => 18, R19 => 19, R20 => 20,
            R21 => 21, R22 => 22, R23 => 23, R24 => 24, R25 => 25, R26 => 26,
            R27 => 27, R28 => 28, R29 => 29, R30 => 30, R31 => 31,
            R25R24 => 12,
            R27R26 => 13,
            R29R28 => 14,
            R31R30 => 15,
            SP => return None,
        };
        Some(enc)
    }

    /// Whether this register is one of the 16-bit pairs.
    pub fn is_pair(self) -> bool {
        matches!(self, Reg::R25R24 | Reg::R27R26 | Reg::R29R28 | Reg::R31R30)
    }

    /// Bit width of the register.
    pub fn bits(self) -> u8 {
        if self.is_pair() || self == Reg::SP { 16 } else { 8 }
    }

    /// Mnemonic name as the assembler prints it.
    pub fn name(self) -> &'static str {
        use Reg::*;
        match self {
            R0 => "r0", R1 => "r1", R2 => "r2", R3 => "r3", R4 => "r4", R5 => "r5",
            R6 => "r6", R7 => "r7", R8 => "r8", R9 => "r9", R10 => "r10", R11 => "r11",
            R12 => "r12", R13 => "r13", R14 => "r14", R15 => "r15", R16 => "r16",
            R17 => "r17", R18 => "r18", R19 => "r19", R20 => "r20", R21 => "r21",
            R22 => "r22", R23 => "r23", R24 => "r24", R25 => "r25", R26 => "r26",
            R27 => "r27", R28 => "r28", R29 => "r29", R30 => "r30", R31 => "r31",
            R25R24 => "r25:r24",
            R27R26 => "X",
            R29R28 => "Y",
            R31R30 => "Z",
            SP => "SP",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A register class: a named set of interchangeable registers.
///
/// Class membership determines which encodings and addressing-mode rules
/// apply. The classes are deliberately asymmetric, mirroring the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// All thirty-two 8-bit registers.
    Gpr8,
    /// r16-r31: the only registers immediate-form ALU instructions accept.
    Ld8,
    /// All four 16-bit pairs.
    Dreg,
    /// X, Y, Z: the pairs legal in register-indirect addressing.
    PtrRegs,
    /// Y, Z: the pairs that additionally accept a 6-bit displacement.
    PtrDispRegs,
    /// Synthetic 4x8-bit class used by inline-assembly pair expansion.
    Gpr8Quad,
}

impl RegClass {
    /// Declared bit width of members of this class.
    pub fn bits(self) -> u8 {
        match self {
            RegClass::Gpr8 | RegClass::Ld8 => 8,
            RegClass::Dreg | RegClass::PtrRegs | RegClass::PtrDispRegs => 16,
            RegClass::Gpr8Quad => 32,
        }
    }

    /// Whether `reg` belongs to this class.
    pub fn contains(self, reg: Reg) -> bool {
        use Reg::*;
        match self {
            RegClass::Gpr8 => !reg.is_pair() && reg != SP,
            RegClass::Ld8 => {
                matches!(
                    reg,
                    R16 | R17 | R18 | R19 | R20 | R21 | R22 | R23 | R24 | R25 | R26
                        | R27 | R28 | R29 | R30 | R31
                )
            }
            RegClass::Dreg => reg.is_pair(),
            RegClass::PtrRegs => matches!(reg, R27R26 | R29R28 | R31R30),
            RegClass::PtrDispRegs => matches!(reg, R29R28 | R31R30),
            // Quads are synthesized as virtual registers only.
            RegClass::Gpr8Quad => false,
        }
    }
}

/// A virtual register, tagged with the class it must be assigned from.
///
/// Selection hands these to the register allocator; the allocator's output is
/// outside this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtReg {
    pub id: u32,
    pub class: RegClass,
}

impl fmt::Display for VirtReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}:{:?}", self.id, self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_encodings_follow_movw_convention() {
        assert_eq!(Reg::R25R24.encoding(), Some(12));
        assert_eq!(Reg::R27R26.encoding(), Some(13));
        assert_eq!(Reg::R29R28.encoding(), Some(14));
        assert_eq!(Reg::R31R30.encoding(), Some(15));
        assert_eq!(Reg::SP.encoding(), None);
    }

    #[test]
    fn ptr_disp_class_excludes_x() {
        assert!(RegClass::PtrDispRegs.contains(Y));
        assert!(RegClass::PtrDispRegs.contains(Z));
        assert!(!RegClass::PtrDispRegs.contains(X));
        assert!(RegClass::PtrRegs.contains(X));
    }

    #[test]
    fn ld8_starts_at_r16() {
        assert!(!RegClass::Ld8.contains(Reg::R15));
        assert!(RegClass::Ld8.contains(Reg::R16));
        assert!(RegClass::Gpr8.contains(Reg::R0));
        assert!(!RegClass::Gpr8.contains(Reg::SP));
    }
}
