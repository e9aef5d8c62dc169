use serde::{Deserialize, Serialize};

use crate::Word;
use crate::decode::{DecodeError, Opcode};
use crate::memory::MemoryMode;

/// Set of opcodes a machine is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpcodeSet(u16);

impl OpcodeSet {
    pub const EMPTY: OpcodeSet = OpcodeSet(0);
    pub const ALL: OpcodeSet = OpcodeSet::EMPTY
        .with(Opcode::Add)
        .with(Opcode::Multiply)
        .with(Opcode::Input)
        .with(Opcode::Output)
        .with(Opcode::JumpIfTrue)
        .with(Opcode::JumpIfFalse)
        .with(Opcode::LessThan)
        .with(Opcode::Equals)
        .with(Opcode::AdjustRelativeBase)
        .with(Opcode::Halt);
    /// Add, multiply and halt only.
    pub const ARITHMETIC: OpcodeSet = OpcodeSet::EMPTY
        .with(Opcode::Add)
        .with(Opcode::Multiply)
        .with(Opcode::Halt);
    /// Everything except relative base adjustment.
    pub const NO_RELATIVE: OpcodeSet = OpcodeSet::ALL.without(Opcode::AdjustRelativeBase);

    const fn bit(op: Opcode) -> u16 {
        match 1u16.checked_shl(op as u32) {
            Some(bit) => bit,
            None => 0,
        }
    }

    pub const fn with(self, op: Opcode) -> Self {
        OpcodeSet(self.0 | Self::bit(op))
    }

    pub const fn without(self, op: Opcode) -> Self {
        OpcodeSet(self.0 & !Self::bit(op))
    }

    pub const fn contains(self, op: Opcode) -> bool {
        self.0 & Self::bit(op) != 0
    }

    /// Builds a set from raw opcode classes such as `[1, 2, 99]`.
    pub fn from_classes(classes: &[Word]) -> Result<Self, DecodeError> {
        classes.iter().try_fold(OpcodeSet::EMPTY, |set, &class| {
            Opcode::from_class(class)
                .map(|op| set.with(op))
                .ok_or(DecodeError::UnknownClass(class))
        })
    }

    pub fn iter(self) -> impl Iterator<Item = Opcode> {
        Opcode::ALL.into_iter().filter(move |op| self.contains(*op))
    }
}

impl Default for OpcodeSet {
    fn default() -> Self {
        OpcodeSet::ALL
    }
}

impl FromIterator<Opcode> for OpcodeSet {
    fn from_iter<T: IntoIterator<Item = Opcode>>(iter: T) -> Self {
        iter.into_iter().fold(OpcodeSet::EMPTY, OpcodeSet::with)
    }
}

/// Construction options for a [`crate::Machine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub memory: MemoryMode,
    /// Dense memory is padded with zeros up to this many words.
    pub dense_size: Option<usize>,
    pub valid_opcodes: OpcodeSet,
    /// Short-circuit repeated calls to functions through the result cache.
    pub memoize: bool,
    /// Track calls and log every return, without caching.
    pub trace_calls: bool,
    pub stats: bool,
    /// Fail with `TruncatedProgram` instead of reading zeros for operands
    /// past the end of dense memory.
    pub strict_operands: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sparse(mut self) -> Self {
        self.memory = MemoryMode::Sparse;
        self
    }

    pub fn dense(mut self, size: Option<usize>) -> Self {
        self.memory = MemoryMode::Dense;
        self.dense_size = size;
        self
    }

    pub fn valid_opcodes(mut self, valid_opcodes: OpcodeSet) -> Self {
        self.valid_opcodes = valid_opcodes;
        self
    }

    pub fn memoize(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }

    pub fn trace_calls(mut self, trace_calls: bool) -> Self {
        self.trace_calls = trace_calls;
        self
    }

    pub fn stats(mut self, stats: bool) -> Self {
        self.stats = stats;
        self
    }

    pub fn strict_operands(mut self, strict_operands: bool) -> Self {
        self.strict_operands = strict_operands;
        self
    }

    pub(crate) fn watches_calls(&self) -> bool {
        self.memoize || self.trace_calls
    }
}
