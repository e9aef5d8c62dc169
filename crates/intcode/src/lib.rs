#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! An Intcode virtual machine.
//!
//! Programs are flat lists of signed words where code and data share one
//! address space. A [`Machine`] owns its memory, program counter, relative
//! base and output buffer, and runs until it halts or needs input it does
//! not have. Input comes from any [`InputSource`]; a machine blocked on
//! input can be resumed later, copied with [`Machine::duplicate`] to try
//! several futures, or saved to bytes with [`Machine::save_state`].
//!
//! Around the core interpreter:
//!
//! * [`optimizer`] recognises the compiler's call convention and can answer
//!   repeated calls of pure functions from a cache.
//! * [`stats`] counts executed addresses and taken jumps.
//! * [`disasm`] renders memory as readable pseudo code and finds function
//!   boundaries.
//! * [`builder`] assembles small programs with labels, mostly for tests.

extern crate alloc;

use alloc::vec::Vec;

pub mod builder;
pub mod config;
pub mod decode;
pub mod disasm;
pub mod error;
pub mod machine;
pub mod memory;
pub mod optimizer;
pub mod stats;

#[cfg(test)]
mod test;

pub use config::{Config, OpcodeSet};
pub use decode::{Mode, Opcode};
pub use disasm::{Listing, Record, disassemble, functions};
pub use error::{Error, MachineError};
pub use machine::{FromFn, InputSource, Inputs, Machine, NoInput, State};
pub use memory::{Memory, MemoryMode};
pub use stats::{ExecutionStats, ExecutionTrace};

/// A memory cell, register or I/O value.
pub type Word = i64;

/// An index into machine memory.
pub type Address = usize;

/// Parses the usual comma separated program text. Surrounding whitespace
/// and a trailing comma or newline are ignored.
pub fn parse_program(text: &str) -> Result<Vec<Word>, Error> {
    let text = text.trim();
    let text = text.strip_suffix(',').unwrap_or(text);
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|item| item.trim().parse::<Word>().map_err(Error::from))
        .collect()
}
