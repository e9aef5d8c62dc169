use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::MachineError;
use crate::{Address, Word};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryMode {
    /// Fixed length array. Access outside of it is an error.
    #[default]
    Dense,
    /// Map backed, unbounded above, unmapped cells read as zero.
    Sparse,
}

/// Addressable word storage owned by one machine.
///
/// Dense memory never grows on its own: reads and writes outside
/// `[0, len)` fail with [`MachineError::OutOfBounds`] and the only way to
/// enlarge it is [`Memory::grow_to`]. Sparse memory accepts any
/// non-negative address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Memory {
    Dense(Vec<Word>),
    Sparse(BTreeMap<Address, Word>),
}

impl Memory {
    pub fn new(program: &[Word], mode: MemoryMode) -> Self {
        match mode {
            MemoryMode::Dense => Memory::dense(program),
            MemoryMode::Sparse => Memory::sparse(program),
        }
    }

    pub fn dense(program: &[Word]) -> Self {
        Memory::Dense(program.to_vec())
    }

    /// Dense memory holding `program` followed by zeros up to `len` words.
    pub fn dense_with_len(program: &[Word], len: usize) -> Self {
        let mut memory = Memory::dense(program);
        memory.grow_to(len);
        memory
    }

    pub fn sparse(program: &[Word]) -> Self {
        Memory::Sparse(program.iter().copied().enumerate().collect())
    }

    pub fn mode(&self) -> MemoryMode {
        match self {
            Memory::Dense(_) => MemoryMode::Dense,
            Memory::Sparse(_) => MemoryMode::Sparse,
        }
    }

    pub fn read(&self, addr: Word) -> Result<Word, MachineError> {
        match self {
            Memory::Dense(words) => {
                let index = dense_index(words, addr)?;
                words.get(index).copied().ok_or(MachineError::OutOfBounds(addr))
            }
            Memory::Sparse(cells) => {
                let index = sparse_index(addr)?;
                Ok(cells.get(&index).copied().unwrap_or(0))
            }
        }
    }

    pub fn write(&mut self, addr: Word, value: Word) -> Result<(), MachineError> {
        match self {
            Memory::Dense(words) => {
                let index = dense_index(words, addr)?;
                let slot = words.get_mut(index).ok_or(MachineError::OutOfBounds(addr))?;
                *slot = value;
            }
            Memory::Sparse(cells) => {
                let index = sparse_index(addr)?;
                cells.insert(index, value);
            }
        }
        Ok(())
    }

    /// Word at `addr` for instruction fetch. `None` past the end of dense
    /// memory; sparse memory always has a word.
    pub fn fetch(&self, addr: Address) -> Option<Word> {
        match self {
            Memory::Dense(words) => words.get(addr).copied(),
            Memory::Sparse(cells) => Some(cells.get(&addr).copied().unwrap_or(0)),
        }
    }

    /// `len` consecutive words starting at `addr`, under the same bounds
    /// rules as [`Memory::read`].
    pub fn slice(&self, addr: Word, len: usize) -> Result<Vec<Word>, MachineError> {
        match self {
            Memory::Dense(words) => {
                let start = dense_index(words, addr)?;
                let end = start.checked_add(len).ok_or(MachineError::OutOfBounds(addr))?;
                words
                    .get(start..end)
                    .map(<[Word]>::to_vec)
                    .ok_or(MachineError::OutOfBounds(addr))
            }
            Memory::Sparse(cells) => {
                let start = sparse_index(addr)?;
                let end = start.checked_add(len).ok_or(MachineError::OutOfBounds(addr))?;
                Ok((start..end)
                    .map(|index| cells.get(&index).copied().unwrap_or(0))
                    .collect())
            }
        }
    }

    /// Dense length, or one past the highest mapped sparse address.
    pub fn len(&self) -> usize {
        match self {
            Memory::Dense(words) => words.len(),
            Memory::Sparse(cells) => cells
                .last_key_value()
                .map_or(0, |(addr, _)| addr.saturating_add(1)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Explicitly extends dense memory with zeros. Sparse memory is
    /// already unbounded, so this does nothing there.
    pub fn grow_to(&mut self, len: usize) {
        if let Memory::Dense(words) = self {
            if words.len() < len {
                words.resize(len, 0);
            }
        }
    }

    /// Flat copy of memory. Sparse memory is expanded with zeros up to
    /// [`Memory::len`], and fails with [`MachineError::OutOfBounds`] naming
    /// the highest mapped address once that is past [`SNAPSHOT_LIMIT`].
    pub fn snapshot(&self) -> Result<Vec<Word>, MachineError> {
        match self {
            Memory::Dense(words) => Ok(words.clone()),
            Memory::Sparse(cells) => {
                let len = self.len();
                if len > SNAPSHOT_LIMIT {
                    let highest = len.saturating_sub(1);
                    return Err(MachineError::OutOfBounds(
                        Word::try_from(highest).unwrap_or(Word::MAX),
                    ));
                }
                let mut words = alloc::vec![0; len];
                for (&addr, &value) in cells {
                    if let Some(slot) = words.get_mut(addr) {
                        *slot = value;
                    }
                }
                Ok(words)
            }
        }
    }

    /// Memory as `(base, words)` runs. Dense memory is one run from zero.
    /// Sparse cells are grouped into runs of mapped addresses; unmapped
    /// gaps of up to [`SEGMENT_GAP`] words are filled with zeros, longer
    /// ones start a new run.
    pub fn segments(&self) -> Vec<(Address, Vec<Word>)> {
        match self {
            Memory::Dense(words) => alloc::vec![(0, words.clone())],
            Memory::Sparse(cells) => {
                let mut segments: Vec<(Address, Vec<Word>)> = Vec::new();
                for (&addr, &value) in cells {
                    match segments.last_mut() {
                        Some((base, words))
                            if addr.saturating_sub(*base).saturating_sub(words.len())
                                <= SEGMENT_GAP =>
                        {
                            words.resize(addr.saturating_sub(*base), 0);
                            words.push(value);
                        }
                        _ => segments.push((addr, alloc::vec![value])),
                    }
                }
                segments
            }
        }
    }
}

/// Largest sparse memory, in words, that [`Memory::snapshot`] flattens.
pub const SNAPSHOT_LIMIT: usize = 1_048_576;

/// Longest run of unmapped sparse cells kept inside one segment.
pub const SEGMENT_GAP: usize = 64;

fn dense_index(words: &[Word], addr: Word) -> Result<Address, MachineError> {
    match Address::try_from(addr) {
        Ok(index) if index < words.len() => Ok(index),
        _ => Err(MachineError::OutOfBounds(addr)),
    }
}

fn sparse_index(addr: Word) -> Result<Address, MachineError> {
    if addr < 0 {
        return Err(MachineError::NegativeAddress(addr));
    }
    Address::try_from(addr).map_err(|_| MachineError::OutOfBounds(addr))
}
