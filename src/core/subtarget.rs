// This module describes the subtarget feature set for the avrmc backend. The AVR
// family spans devices with wildly different instruction-set extensions: some lack
// SRAM entirely, some lack the hardware multiplier, MOVW, or the extended LPM/ELPM
// program-memory loads, and only the larger cores have the 22-bit JMP/CALL forms.
// Feature enumerates the extensions the selector and encoder consult; Subtarget is
// an immutable bitset over them, built once per compilation unit from a device
// feature list and shared read-only across every function lowered afterwards. The
// feature inventory mirrors the device database of the surrounding toolchain; the
// string form accepted by from_names matches the feature names that database emits.

//! Subtarget feature bitset.

use std::fmt;

/// An instruction-set extension a device may or may not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Feature {
    /// Device has SRAM and the full load/store family.
    Sram,
    /// 22-bit `jmp`/`call` forms.
    JmpCall,
    /// `ijmp`/`icall` indirect forms.
    IjmpCall,
    /// `eijmp`/`eicall` extended indirect forms.
    EijmpCall,
    /// `adiw`/`sbiw` word immediate arithmetic.
    AddSubIw,
    /// Stack pointer is 8 bits only.
    SmallStack,
    /// `movw` register-pair copy.
    Movw,
    /// `lpm` program-memory load.
    Lpm,
    /// `lpm Rd, Z` / `lpm Rd, Z+` register forms.
    Lpmx,
    /// `elpm` extended program-memory load.
    Elpm,
    /// `elpm` register forms.
    Elpmx,
    /// `spm` self-programming store.
    Spm,
    /// Hardware multiplier (`mul` family).
    Mul,
    /// `break` debug instruction.
    Break,
    /// Reduced-core tiny encoding quirks.
    TinyEncoding,
}

impl Feature {
    /// Parse a feature by the name the device database uses.
    pub fn from_name(name: &str) -> Option<Feature> {
        let f = match name {
            "sram" => Feature::Sram,
            "jmpcall" => Feature::JmpCall,
            "ijmpcall" => Feature::IjmpCall,
            "eijmpcall" => Feature::EijmpCall,
            "addsubiw" => Feature::AddSubIw,
            "smallstack" => Feature::SmallStack,
            "movw" => Feature::Movw,
            "lpm" => Feature::Lpm,
            "lpmx" => Feature::Lpmx,
            "elpm" => Feature::Elpm,
            "elpmx" => Feature::Elpmx,
            "spm" => Feature::Spm,
            "mul" => Feature::Mul,
            "break" => Feature::Break,
            "tinyencoding" => Feature::TinyEncoding,
            _ => return None,
        };
        Some(f)
    }

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// The fixed feature set of the device being compiled for.
///
/// Set once at compilation-unit start and read-only afterwards; safe to share
/// across any number of functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subtarget {
    features: u32,
}

impl Subtarget {
    /// A subtarget with no extensions (the avr1 baseline).
    pub fn baseline() -> Subtarget {
        Subtarget::default()
    }

    /// Build a subtarget from an explicit feature list.
    pub fn from_features(features: &[Feature]) -> Subtarget {
        let mut st = Subtarget::default();
        for &f in features {
            st.features |= f.bit();
        }
        st
    }

    /// Build a subtarget from feature names, ignoring names the inventory
    /// does not know (forward compatibility with newer device databases).
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Subtarget {
        let mut st = Subtarget::default();
        for name in names {
            if let Some(f) = Feature::from_name(name) {
                st.features |= f.bit();
            } else {
                log::debug!("ignoring unknown subtarget feature '{name}'");
            }
        }
        st
    }

    /// A fully featured core, convenient for tests (roughly avr5/avr6).
    pub fn enhanced() -> Subtarget {
        Subtarget::from_features(&[
            Feature::Sram,
            Feature::JmpCall,
            Feature::IjmpCall,
            Feature::AddSubIw,
            Feature::Movw,
            Feature::Lpm,
            Feature::Lpmx,
            Feature::Mul,
            Feature::Break,
        ])
    }

    /// Whether the device implements `feature`.
    pub fn has(&self, feature: Feature) -> bool {
        self.features & feature.bit() != 0
    }
}

impl fmt::Display for Subtarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subtarget({:#x})", self.features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_round_trip() {
        let st = Subtarget::from_names(["movw", "mul", "not-a-feature"]);
        assert!(st.has(Feature::Movw));
        assert!(st.has(Feature::Mul));
        assert!(!st.has(Feature::JmpCall));
    }

    #[test]
    fn baseline_has_nothing() {
        assert!(!Subtarget::baseline().has(Feature::Sram));
    }
}
