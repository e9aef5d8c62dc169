use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use thiserror_no_std::Error;

use crate::decode::{Mode, Opcode};
use crate::optimizer::CALL_FOOTPRINT;
use crate::{Address, Word};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("label {0} is defined twice")]
    DuplicateLabel(String),
    #[error("label {0} is never defined")]
    UnknownLabel(String),
    #[error("{opcode:?} takes {expected} operands, got {found}")]
    OperandCount {
        opcode: Opcode,
        expected: usize,
        found: usize,
    },
    #[error("{0:?} can not store to an immediate operand")]
    ImmediateDestination(Opcode),
    #[error("program does not fit in a word address")]
    TooLarge,
}

/// An operand as written in a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Position(Word),
    Immediate(Word),
    Relative(Word),
    /// Address of a label, as an immediate value.
    Label(String),
    /// The cell at a label, in position mode.
    At(String),
}

impl Param {
    pub fn mode(&self) -> Mode {
        match self {
            Param::Position(_) | Param::At(_) => Mode::Position,
            Param::Immediate(_) | Param::Label(_) => Mode::Immediate,
            Param::Relative(_) => Mode::Relative,
        }
    }
}

pub fn pos(addr: Word) -> Param {
    Param::Position(addr)
}

pub fn imm(value: Word) -> Param {
    Param::Immediate(value)
}

pub fn rel(offset: Word) -> Param {
    Param::Relative(offset)
}

pub fn label(name: &str) -> Param {
    Param::Label(name.to_string())
}

pub fn at(name: &str) -> Param {
    Param::At(name.to_string())
}

/// Assembles a program word by word. Labels may be used before they are
/// defined; they are resolved by [`ProgramBuilder::finish`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    words: Vec<Word>,
    labels: BTreeMap<String, Address>,
    fixups: Vec<(Address, String)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the next word will land on.
    pub fn here(&self) -> Address {
        self.words.len()
    }

    pub fn label(&mut self, name: &str) -> Result<&mut Self, BuilderError> {
        if self.labels.insert(name.to_string(), self.here()).is_some() {
            return Err(BuilderError::DuplicateLabel(name.to_string()));
        }
        Ok(self)
    }

    pub fn data(&mut self, words: &[Word]) -> Result<&mut Self, BuilderError> {
        self.words.extend_from_slice(words);
        Ok(self)
    }

    pub fn emit(&mut self, opcode: Opcode, params: &[Param]) -> Result<&mut Self, BuilderError> {
        if params.len() != opcode.operand_count() {
            return Err(BuilderError::OperandCount {
                opcode,
                expected: opcode.operand_count(),
                found: params.len(),
            });
        }

        let mut word = opcode.class();
        let mut place: Word = 100;
        for (index, param) in params.iter().enumerate() {
            let mode = param.mode();
            if mode == Mode::Immediate && index >= opcode.input_count() {
                return Err(BuilderError::ImmediateDestination(opcode));
            }
            word = mode
                .digit()
                .checked_mul(place)
                .and_then(|digit| word.checked_add(digit))
                .ok_or(BuilderError::TooLarge)?;
            place = place.checked_mul(10).ok_or(BuilderError::TooLarge)?;
        }
        self.words.push(word);

        for param in params {
            let value = match param {
                Param::Position(value) | Param::Immediate(value) | Param::Relative(value) => {
                    *value
                }
                Param::Label(name) | Param::At(name) => {
                    self.fixups.push((self.here(), name.clone()));
                    0
                }
            };
            self.words.push(value);
        }
        Ok(self)
    }

    pub fn add(&mut self, lhs: Param, rhs: Param, dst: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::Add, &[lhs, rhs, dst])
    }

    pub fn mul(&mut self, lhs: Param, rhs: Param, dst: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::Multiply, &[lhs, rhs, dst])
    }

    pub fn input(&mut self, dst: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::Input, &[dst])
    }

    pub fn output(&mut self, value: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::Output, &[value])
    }

    pub fn jump_if_true(&mut self, cond: Param, target: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::JumpIfTrue, &[cond, target])
    }

    pub fn jump_if_false(&mut self, cond: Param, target: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::JumpIfFalse, &[cond, target])
    }

    pub fn jump(&mut self, target: Param) -> Result<&mut Self, BuilderError> {
        self.jump_if_true(imm(1), target)
    }

    pub fn less_than(&mut self, lhs: Param, rhs: Param, dst: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::LessThan, &[lhs, rhs, dst])
    }

    pub fn equals(&mut self, lhs: Param, rhs: Param, dst: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::Equals, &[lhs, rhs, dst])
    }

    pub fn adjust_relative_base(&mut self, delta: Param) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::AdjustRelativeBase, &[delta])
    }

    pub fn halt(&mut self) -> Result<&mut Self, BuilderError> {
        self.emit(Opcode::Halt, &[])
    }

    /// Calls `function` with the usual convention: the return address goes
    /// to `$rb[0]`, arguments are expected at `$rb[1..]` already.
    pub fn call(&mut self, function: &str) -> Result<&mut Self, BuilderError> {
        let return_address = Word::try_from(self.here())
            .ok()
            .and_then(|here| here.checked_add(CALL_FOOTPRINT))
            .ok_or(BuilderError::TooLarge)?;
        self.add(imm(return_address), imm(0), rel(0))?;
        self.jump(label(function))
    }

    /// Returns to the address at `$rb[0]`.
    pub fn ret(&mut self) -> Result<&mut Self, BuilderError> {
        self.jump_if_false(imm(0), rel(0))
    }

    pub fn finish(&self) -> Result<Vec<Word>, BuilderError> {
        let mut words = self.words.clone();
        for (slot, name) in &self.fixups {
            let target = self
                .labels
                .get(name)
                .ok_or_else(|| BuilderError::UnknownLabel(name.clone()))?;
            let target = Word::try_from(*target).map_err(|_| BuilderError::TooLarge)?;
            if let Some(word) = words.get_mut(*slot) {
                *word = target;
            }
        }
        Ok(words)
    }
}
