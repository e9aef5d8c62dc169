use core::num::ParseIntError;

use thiserror_no_std::Error;

use crate::builder::BuilderError;
use crate::{Address, Word};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// `known` is set when the class exists but is outside the machine's
    /// opcode allowlist.
    #[error("unknown opcode {opcode} at {pc}")]
    UnknownOpcode {
        opcode: Word,
        pc: Address,
        known: bool,
    },
    #[error("opcode {opcode} at {pc} has an invalid addressing mode")]
    InvalidMode { opcode: Word, pc: Address },
    #[error("address {0} is out of bounds")]
    OutOfBounds(Word),
    #[error("address {0} is negative")]
    NegativeAddress(Word),
    #[error("instruction at {pc} runs past the end of the program")]
    TruncatedProgram { pc: Address },
    #[error("the machine has already halted")]
    AlreadyHalted,
    #[error("no input available for the instruction at {pc}")]
    NoInputAvailable { pc: Address },
    #[error("arithmetic overflow in the instruction at {pc}")]
    ArithmeticOverflow { pc: Address },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("machine error: {0}")]
    Machine(#[from] MachineError),
    #[error("builder error: {0}")]
    Builder(#[from] BuilderError),
    #[error("invalid program word: {0}")]
    Parse(#[from] ParseIntError),
    #[error("save state encoding failed: {0}")]
    Postcard(#[from] postcard::Error),
}
