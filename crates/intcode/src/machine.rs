use alloc::collections::VecDeque;
use alloc::vec::Vec;

use heapless::Vec as Operands;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::config::{Config, OpcodeSet};
use crate::decode::{DecodeError, MAX_OPERANDS, Mode, Opcode, decode};
use crate::error::{Error, MachineError};
use crate::memory::Memory;
use crate::optimizer::{CallOptimizer, StepEvent, StepHook};
use crate::stats::ExecutionStats;
use crate::{Address, Word};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Running,
    /// Stopped on an input instruction with nothing to read. The same
    /// instruction runs again on the next `resume`.
    BlockedOnInput,
    Halted,
}

/// Where input instructions read from. Returning `None` suspends the
/// machine instead of failing.
pub trait InputSource {
    fn next_input(&mut self) -> Option<Word>;
}

impl InputSource for VecDeque<Word> {
    fn next_input(&mut self) -> Option<Word> {
        self.pop_front()
    }
}

impl<T: InputSource + ?Sized> InputSource for &mut T {
    fn next_input(&mut self) -> Option<Word> {
        (**self).next_input()
    }
}

/// A source that never has input.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn next_input(&mut self) -> Option<Word> {
        None
    }
}

/// Reads input from an iterator.
#[derive(Debug, Clone)]
pub struct Inputs<I>(pub I);

impl<I: Iterator<Item = Word>> InputSource for Inputs<I> {
    fn next_input(&mut self) -> Option<Word> {
        self.0.next()
    }
}

/// Reads input by calling a closure.
pub struct FromFn<F>(pub F);

impl<F: FnMut() -> Option<Word>> InputSource for FromFn<F> {
    fn next_input(&mut self) -> Option<Word> {
        (self.0)()
    }
}

/// An Intcode machine.
///
/// A machine owns its memory, registers and output buffer outright, so
/// `clone` (or [`Machine::duplicate`]) gives a fully independent copy that
/// can be run down a different path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    memory: Memory,
    pc: Address,
    relative_base: Word,
    state: State,
    output: Vec<Word>,
    valid_opcodes: OpcodeSet,
    strict_operands: bool,
    optimizer: Option<CallOptimizer>,
    stats: Option<ExecutionStats>,
    steps: u64,
}

impl Machine {
    pub fn new(program: &[Word], config: &Config) -> Self {
        let mut memory = Memory::new(program, config.memory);
        if let Some(size) = config.dense_size {
            memory.grow_to(size);
        }
        Self::with_memory(memory, config)
    }

    pub fn with_memory(memory: Memory, config: &Config) -> Self {
        Self {
            memory,
            pc: 0,
            relative_base: 0,
            state: State::Running,
            output: Vec::new(),
            valid_opcodes: config.valid_opcodes,
            strict_operands: config.strict_operands,
            optimizer: config
                .watches_calls()
                .then(|| CallOptimizer::new(config.memoize)),
            stats: config.stats.then(ExecutionStats::new),
            steps: 0,
        }
    }

    /// Runs until the machine halts or blocks on input.
    pub fn resume<I: InputSource + ?Sized>(
        &mut self,
        input: &mut I,
    ) -> Result<&mut Self, MachineError> {
        if self.state == State::BlockedOnInput {
            self.state = State::Running;
        }
        while self.state == State::Running {
            self.step(input)?;
        }
        Ok(self)
    }

    /// Runs without input. Blocks at the first input instruction.
    pub fn run(&mut self) -> Result<&mut Self, MachineError> {
        self.resume(&mut NoInput)
    }

    /// Runs with a fixed list of input values. Values left over when the
    /// machine halts or blocks are dropped.
    pub fn feed(&mut self, values: &[Word]) -> Result<&mut Self, MachineError> {
        self.resume(&mut Inputs(values.iter().copied()))
    }

    /// Runs to the halt. Running out of input is an error here rather than
    /// a suspension.
    pub fn run_to_completion<I: InputSource + ?Sized>(
        &mut self,
        input: &mut I,
    ) -> Result<&mut Self, MachineError> {
        self.resume(input)?;
        if self.state == State::BlockedOnInput {
            return Err(MachineError::NoInputAvailable { pc: self.pc });
        }
        Ok(self)
    }

    /// Executes a single instruction.
    pub fn step<I: InputSource + ?Sized>(&mut self, input: &mut I) -> Result<State, MachineError> {
        match self.state {
            State::Halted => return Err(MachineError::AlreadyHalted),
            State::BlockedOnInput => self.state = State::Running,
            State::Running => {}
        }

        let pc = self.pc;
        let word = self
            .memory
            .fetch(pc)
            .ok_or(MachineError::OutOfBounds(address_word(pc)))?;
        let op = decode(word).map_err(|err| decode_error(err, word, pc))?;
        if !self.valid_opcodes.contains(op.opcode) {
            return Err(MachineError::UnknownOpcode {
                opcode: word,
                pc,
                known: true,
            });
        }

        let operands = self.fetch_operands(pc, word, op.operand_count())?;

        let input_count = op.opcode.input_count();
        let mut inputs: Operands<Word, MAX_OPERANDS> = Operands::new();
        let mut destination = None;
        for (index, (&operand, &mode)) in operands.iter().zip(op.modes.iter()).enumerate() {
            let resolved = match mode {
                Mode::Position | Mode::Immediate => operand,
                Mode::Relative => operand
                    .checked_add(self.relative_base)
                    .ok_or(MachineError::ArithmeticOverflow { pc })?,
            };
            if mode != Mode::Immediate && resolved < 0 {
                return Err(MachineError::NegativeAddress(resolved));
            }
            if index < input_count {
                let value = match mode {
                    Mode::Immediate => resolved,
                    Mode::Position | Mode::Relative => self.memory.read(resolved)?,
                };
                if inputs.push(value).is_err() {
                    return Err(MachineError::InvalidMode { opcode: word, pc });
                }
            } else {
                destination = Some((mode, operand, resolved));
            }
        }

        let lhs = inputs.first().copied().unwrap_or(0);
        let rhs = inputs.get(1).copied().unwrap_or(0);
        let overflow = MachineError::ArithmeticOverflow { pc };
        let mut jump = None;
        let mut arithmetic = None;

        match op.opcode {
            Opcode::Add => {
                let value = lhs.checked_add(rhs).ok_or(overflow)?;
                self.store(destination, value, word, pc)?;
                arithmetic = Some(value);
            }
            Opcode::Multiply => {
                let value = lhs.checked_mul(rhs).ok_or(overflow)?;
                self.store(destination, value, word, pc)?;
                arithmetic = Some(value);
            }
            Opcode::Input => match input.next_input() {
                Some(value) => self.store(destination, value, word, pc)?,
                None => {
                    trace!("@{} {} {:?}: blocked for input", pc, word, operands);
                    self.state = State::BlockedOnInput;
                    return Ok(self.state);
                }
            },
            Opcode::Output => self.output.extend_from_slice(&inputs),
            Opcode::JumpIfTrue => {
                if lhs != 0 {
                    jump = Some(jump_target(rhs)?);
                }
            }
            Opcode::JumpIfFalse => {
                if lhs == 0 {
                    jump = Some(jump_target(rhs)?);
                }
            }
            Opcode::LessThan => self.store(destination, Word::from(lhs < rhs), word, pc)?,
            Opcode::Equals => self.store(destination, Word::from(lhs == rhs), word, pc)?,
            Opcode::AdjustRelativeBase => {
                self.relative_base = self.relative_base.checked_add(lhs).ok_or(overflow)?;
            }
            Opcode::Halt => self.state = State::Halted,
        }

        if let Some(optimizer) = self.optimizer.as_mut() {
            let event = StepEvent {
                pc,
                store: destination.map(|(mode, operand, _)| (mode, operand)),
                arithmetic,
                jump,
            };
            jump = optimizer.after_step(event, &mut self.memory, self.relative_base);
        }

        let fall_through = pc
            .checked_add(op.width())
            .ok_or(MachineError::TruncatedProgram { pc })?;
        if let Some(stats) = self.stats.as_mut() {
            stats.record_step(pc);
            if let Some(target) = jump.filter(|&target| target != fall_through) {
                stats.record_jump(pc, target);
            }
        }

        trace!(
            "@{} {} {:?}: {} {:?} store {:?} jump {:?}",
            pc,
            word,
            operands,
            op.opcode.mnemonic(),
            inputs,
            destination.map(|(_, _, addr)| addr),
            jump
        );

        self.steps = self.steps.saturating_add(1);
        self.pc = jump.unwrap_or(fall_through);
        Ok(self.state)
    }

    fn fetch_operands(
        &self,
        pc: Address,
        opcode: Word,
        count: usize,
    ) -> Result<Operands<Word, MAX_OPERANDS>, MachineError> {
        let mut operands = Operands::new();
        for offset in 1..=count {
            let addr = pc
                .checked_add(offset)
                .ok_or(MachineError::TruncatedProgram { pc })?;
            let operand = match self.memory.fetch(addr) {
                Some(operand) => operand,
                None if self.strict_operands => {
                    return Err(MachineError::TruncatedProgram { pc });
                }
                None => 0,
            };
            if operands.push(operand).is_err() {
                return Err(MachineError::InvalidMode { opcode, pc });
            }
        }
        Ok(operands)
    }

    fn store(
        &mut self,
        destination: Option<(Mode, Word, Word)>,
        value: Word,
        opcode: Word,
        pc: Address,
    ) -> Result<(), MachineError> {
        let (_, _, addr) = destination.ok_or(MachineError::InvalidMode { opcode, pc })?;
        self.memory.write(addr, value)
    }

    /// Deep copy for exploring an alternative future.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Serializes the whole machine, optimizer cache and statistics
    /// included.
    pub fn save_state(&self) -> Result<Vec<u8>, Error> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn restore_state(bytes: &[u8]) -> Result<Self, Error> {
        Ok(postcard::from_bytes(bytes)?)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Drivers patch memory between runs, e.g. to redirect a return
    /// address.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Flat copy of memory, see [`Memory::snapshot`] for the sparse limit.
    pub fn memory_snapshot(&self) -> Result<Vec<Word>, MachineError> {
        self.memory.snapshot()
    }

    pub fn output(&self) -> &[Word] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<Word> {
        core::mem::take(&mut self.output)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == State::Halted
    }

    pub fn is_blocked(&self) -> bool {
        self.state == State::BlockedOnInput
    }

    pub fn program_counter(&self) -> Address {
        self.pc
    }

    pub fn relative_base(&self) -> Word {
        self.relative_base
    }

    /// Completed steps. A step that blocked on input is not counted.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn valid_opcodes(&self) -> OpcodeSet {
        self.valid_opcodes
    }

    pub fn stats(&self) -> Option<&ExecutionStats> {
        self.stats.as_ref()
    }

    pub fn optimizer(&self) -> Option<&CallOptimizer> {
        self.optimizer.as_ref()
    }
}

fn decode_error(err: DecodeError, opcode: Word, pc: Address) -> MachineError {
    match err {
        DecodeError::UnknownClass(_) => MachineError::UnknownOpcode {
            opcode,
            pc,
            known: false,
        },
        DecodeError::InvalidMode { .. }
        | DecodeError::ImmediateOutput(_)
        | DecodeError::TooManyOperands(_) => {
            MachineError::InvalidMode { opcode, pc }
        }
    }
}

fn jump_target(target: Word) -> Result<Address, MachineError> {
    if target < 0 {
        return Err(MachineError::NegativeAddress(target));
    }
    Address::try_from(target).map_err(|_| MachineError::OutOfBounds(target))
}

fn address_word(addr: Address) -> Word {
    Word::try_from(addr).unwrap_or(Word::MAX)
}
