//! Instruction decoding.
//!
//! An instruction word packs the opcode class in its two low decimal digits
//! and one addressing mode per operand in the digits above that, hundreds
//! place first. Missing mode digits read as position mode.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;
use variant_count::VariantCount;

use crate::Word;

/// Largest operand count of any instruction.
pub const MAX_OPERANDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Opcode {
    Add,
    Multiply,
    Input,
    Output,
    JumpIfTrue,
    JumpIfFalse,
    LessThan,
    Equals,
    AdjustRelativeBase,
    Halt,
}

impl Opcode {
    pub const ALL: [Opcode; 10] = [
        Opcode::Add,
        Opcode::Multiply,
        Opcode::Input,
        Opcode::Output,
        Opcode::JumpIfTrue,
        Opcode::JumpIfFalse,
        Opcode::LessThan,
        Opcode::Equals,
        Opcode::AdjustRelativeBase,
        Opcode::Halt,
    ];

    pub fn from_class(class: Word) -> Option<Self> {
        let op = match class {
            1 => Opcode::Add,
            2 => Opcode::Multiply,
            3 => Opcode::Input,
            4 => Opcode::Output,
            5 => Opcode::JumpIfTrue,
            6 => Opcode::JumpIfFalse,
            7 => Opcode::LessThan,
            8 => Opcode::Equals,
            9 => Opcode::AdjustRelativeBase,
            99 => Opcode::Halt,
            _ => return None,
        };
        Some(op)
    }

    pub const fn class(self) -> Word {
        match self {
            Opcode::Add => 1,
            Opcode::Multiply => 2,
            Opcode::Input => 3,
            Opcode::Output => 4,
            Opcode::JumpIfTrue => 5,
            Opcode::JumpIfFalse => 6,
            Opcode::LessThan => 7,
            Opcode::Equals => 8,
            Opcode::AdjustRelativeBase => 9,
            Opcode::Halt => 99,
        }
    }

    /// Number of operand words following the opcode word. Outputs are
    /// counted here too.
    pub const fn operand_count(self) -> usize {
        match self {
            Opcode::Halt => 0,
            Opcode::Input | Opcode::Output | Opcode::AdjustRelativeBase => 1,
            Opcode::JumpIfTrue | Opcode::JumpIfFalse => 2,
            Opcode::Add | Opcode::Multiply | Opcode::LessThan | Opcode::Equals => 3,
        }
    }

    /// Number of trailing operands that name a store destination.
    pub const fn output_arity(self) -> usize {
        match self {
            Opcode::Add | Opcode::Multiply | Opcode::Input | Opcode::LessThan | Opcode::Equals => 1,
            Opcode::Output
            | Opcode::JumpIfTrue
            | Opcode::JumpIfFalse
            | Opcode::AdjustRelativeBase
            | Opcode::Halt => 0,
        }
    }

    pub const fn input_count(self) -> usize {
        self.operand_count().saturating_sub(self.output_arity())
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Multiply => "mul",
            Opcode::Input => "in",
            Opcode::Output => "out",
            Opcode::JumpIfTrue => "jnz",
            Opcode::JumpIfFalse => "jz",
            Opcode::LessThan => "lt",
            Opcode::Equals => "eq",
            Opcode::AdjustRelativeBase => "arb",
            Opcode::Halt => "halt",
        }
    }
}

#[repr(u8)]
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Position = 0,
    Immediate = 1,
    Relative = 2,
}

impl Mode {
    pub fn from_digit(digit: Word) -> Option<Self> {
        // Each mode has to fit in one decimal digit.
        const { assert!(Mode::VARIANT_COUNT <= 10) };
        match digit {
            0 => Some(Mode::Position),
            1 => Some(Mode::Immediate),
            2 => Some(Mode::Relative),
            _ => None,
        }
    }

    pub const fn digit(self) -> Word {
        self as Word
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("opcode class {0} is unknown")]
    UnknownClass(Word),
    #[error("mode digit {digit} of operand {operand} is invalid")]
    InvalidMode { operand: usize, digit: Word },
    #[error("output operand {0} is in immediate mode")]
    ImmediateOutput(usize),
    #[error("{0:?} takes more than the supported number of operands")]
    TooManyOperands(Opcode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOp {
    pub opcode: Opcode,
    pub modes: Vec<Mode, MAX_OPERANDS>,
}

impl DecodedOp {
    pub fn operand_count(&self) -> usize {
        self.opcode.operand_count()
    }

    pub fn output_arity(&self) -> usize {
        self.opcode.output_arity()
    }

    /// Words occupied by the instruction, opcode word included.
    pub fn width(&self) -> usize {
        self.operand_count().saturating_add(1)
    }
}

/// Opcode class of a word. Negative words wrap the same way floored
/// modulo does, so `-1` is class 99.
pub fn opcode_class(word: Word) -> Word {
    word.rem_euclid(100)
}

fn mode_digit(word: Word, operand: usize) -> Word {
    let shifted = match operand {
        0 => word.div_euclid(100),
        1 => word.div_euclid(1_000),
        _ => word.div_euclid(10_000),
    };
    shifted.rem_euclid(10)
}

pub fn decode(word: Word) -> Result<DecodedOp, DecodeError> {
    let class = opcode_class(word);
    let opcode = Opcode::from_class(class).ok_or(DecodeError::UnknownClass(class))?;
    let first_output = opcode.input_count();

    let mut modes = Vec::new();
    for operand in 0..opcode.operand_count() {
        let digit = mode_digit(word, operand);
        let mode = Mode::from_digit(digit).ok_or(DecodeError::InvalidMode { operand, digit })?;
        if mode == Mode::Immediate && operand >= first_output {
            return Err(DecodeError::ImmediateOutput(operand));
        }
        if modes.push(mode).is_err() {
            return Err(DecodeError::TooManyOperands(opcode));
        }
    }

    Ok(DecodedOp { opcode, modes })
}

/// Whether a word could start an instruction: it decodes, and it carries no
/// mode digits beyond its operand count.
pub fn is_plausible(word: Word) -> bool {
    if word < 0 {
        return false;
    }
    let Ok(op) = decode(word) else {
        return false;
    };
    let limit = match op.operand_count() {
        0 => 100,
        1 => 1_000,
        2 => 10_000,
        _ => 100_000,
    };
    word < limit
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_modes() -> Result<(), DecodeError> {
        let op = decode(1002)?;
        assert_eq!(op.opcode, Opcode::Multiply);
        assert_eq!(op.modes.as_slice(), &[Mode::Position, Mode::Immediate, Mode::Position]);
        assert_eq!(op.width(), 4);

        let op = decode(21101)?;
        assert_eq!(op.modes.as_slice(), &[Mode::Immediate, Mode::Immediate, Mode::Relative]);

        let op = decode(99)?;
        assert_eq!(op.opcode, Opcode::Halt);
        assert!(op.modes.is_empty());
        Ok(())
    }

    #[test]
    fn test_decode_rejects() {
        assert_eq!(decode(10), Err(DecodeError::UnknownClass(10)));
        assert_eq!(decode(301), Err(DecodeError::InvalidMode { operand: 0, digit: 3 }));
        assert_eq!(decode(11101), Err(DecodeError::ImmediateOutput(2)));
        assert_eq!(decode(103), Err(DecodeError::ImmediateOutput(0)));
    }

    #[test]
    fn test_negative_word_class() {
        assert_eq!(opcode_class(-1), 99);
        assert_eq!(decode(-1).map(|op| op.opcode), Ok(Opcode::Halt));
    }

    #[test]
    fn test_plausible() {
        assert!(is_plausible(1));
        assert!(is_plausible(21101));
        assert!(is_plausible(99));
        assert!(is_plausible(109));
        assert!(!is_plausible(199));
        assert!(!is_plausible(1099));
        assert!(!is_plausible(11101));
        assert!(!is_plausible(-99));
        assert!(!is_plausible(0));
    }

    #[test]
    fn test_arity_table() -> Result<(), DecodeError> {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_class(op.class()), Some(op));
            assert!(op.output_arity() <= op.operand_count());
            assert!(op.operand_count() <= MAX_OPERANDS);

            // Relative mode on every operand slot, used or not.
            let decoded = decode(op.class() + 22_200)?;
            assert_eq!(decoded.opcode, op);
            assert_eq!(decoded.modes.len(), op.operand_count());
            assert!(decoded.modes.iter().all(|&mode| mode == Mode::Relative));
        }
        Ok(())
    }
}
