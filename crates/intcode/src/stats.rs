use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::Address;

/// Per-address execution counts and taken-branch edges.
///
/// Only diagnostic. The machine records into it but never reads it back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    times_run: BTreeMap<Address, u64>,
    jumps_taken: BTreeMap<(Address, Address), u64>,
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_step(&mut self, pc: Address) {
        let count = self.times_run.entry(pc).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Records an edge. Callers only report jumps whose target differs
    /// from the natural fall-through address.
    pub(crate) fn record_jump(&mut self, from: Address, to: Address) {
        let count = self.jumps_taken.entry((from, to)).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn times_run(&self, pc: Address) -> u64 {
        self.times_run.get(&pc).copied().unwrap_or(0)
    }

    pub fn jumps_taken(&self, from: Address, to: Address) -> u64 {
        self.jumps_taken.get(&(from, to)).copied().unwrap_or(0)
    }

    pub fn run_counts(&self) -> &BTreeMap<Address, u64> {
        &self.times_run
    }

    pub fn jump_counts(&self) -> &BTreeMap<(Address, Address), u64> {
        &self.jumps_taken
    }

    /// The `top_n` most executed addresses, most executed first.
    pub fn hotspots(&self, top_n: usize) -> Vec<(Address, u64)> {
        let mut sorted: Vec<_> = self.times_run.iter().map(|(&pc, &n)| (pc, n)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        sorted.truncate(top_n);
        sorted
    }

    pub fn total_steps(&self) -> u64 {
        self.times_run.values().fold(0, |sum, n| sum.saturating_add(*n))
    }
}

/// Addresses known to have started an instruction. Lets the disassembler
/// restrict itself to code that actually ran.
pub trait ExecutionTrace {
    fn was_executed(&self, pc: Address) -> bool;
    fn first_executed(&self) -> Option<Address>;
}

impl ExecutionTrace for ExecutionStats {
    fn was_executed(&self, pc: Address) -> bool {
        self.times_run.contains_key(&pc)
    }

    fn first_executed(&self) -> Option<Address> {
        self.times_run.keys().next().copied()
    }
}

impl ExecutionTrace for BTreeSet<Address> {
    fn was_executed(&self, pc: Address) -> bool {
        self.contains(&pc)
    }

    fn first_executed(&self) -> Option<Address> {
        self.first().copied()
    }
}
