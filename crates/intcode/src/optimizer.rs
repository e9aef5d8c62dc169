//! Function call memoization.
//!
//! Intcode has no call or return instruction. Programs built by the usual
//! compiler follow a convention instead:
//!
//! ```text
//! 21101 ret 0 0     $rb[0] <- ret        (ret = address of this add + 7)
//! 1105 1 f          goto f               CALL
//! ...
//! f: ...            arguments at $rb[1..], result left in $rb[1]
//! 2106 0 0          goto $rb[0]          RET
//! ```
//!
//! [`CallOptimizer`] watches for that pattern and caches results per
//! `(function, arguments)`. A repeated call is answered from the cache
//! without running the function body. This is only correct for functions
//! whose sole effect is their return value; nothing here checks that.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use heapless::Vec as History;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::decode::Mode;
use crate::memory::Memory;
use crate::{Address, Word};

/// Distance from a return-address store to the address it stores: a
/// four-word add followed by a three-word jump.
pub const CALL_FOOTPRINT: Word = 7;

/// Values a function is assumed to leave at `$rb[1..]`.
pub const RETURN_COUNT: usize = 1;

const WRITE_HISTORY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflightCall {
    pub function: Address,
    pub args: Vec<Word>,
    pub return_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub calls: u64,
    pub cache_hits: u64,
    pub returns: u64,
}

/// What one completed step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEvent {
    pub pc: Address,
    /// Mode and raw operand of the store destination.
    pub store: Option<(Mode, Word)>,
    /// Value stored by an add or multiply.
    pub arithmetic: Option<Word>,
    /// Target of a taken jump.
    pub jump: Option<Address>,
}

/// Watches a machine step by step.
///
/// `after_step` runs once per completed instruction, before the program
/// counter moves, and returns the jump target to take in place of
/// `event.jump`. Hooks may patch memory but never fail the step.
pub trait StepHook {
    fn after_step(
        &mut self,
        event: StepEvent,
        memory: &mut Memory,
        relative_base: Word,
    ) -> Option<Address>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOptimizer {
    memoize: bool,
    /// Relative offsets of the most recent store destinations, newest first.
    /// `None` for stores that did not use relative mode.
    relative_writes: History<Option<Word>, WRITE_HISTORY>,
    stored_return_address: bool,
    cache: BTreeMap<Address, BTreeMap<Vec<Word>, Vec<Word>>>,
    /// Calls that have not returned yet, keyed by the relative base they
    /// were made with.
    inflight: BTreeMap<Word, InflightCall>,
    stats: OptimizerStats,
}

impl CallOptimizer {
    /// With `memoize` false calls are still tracked and logged, but results
    /// are never cached or reused.
    pub fn new(memoize: bool) -> Self {
        Self {
            memoize,
            relative_writes: History::new(),
            stored_return_address: false,
            cache: BTreeMap::new(),
            inflight: BTreeMap::new(),
            stats: OptimizerStats::default(),
        }
    }

    pub fn memoizes(&self) -> bool {
        self.memoize
    }

    pub fn stats(&self) -> OptimizerStats {
        self.stats
    }

    pub fn cached(&self, function: Address, args: &[Word]) -> Option<&[Word]> {
        self.cache.get(&function)?.get(args).map(Vec::as_slice)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.values().map(BTreeMap::len).sum()
    }

    pub fn inflight(&self) -> impl Iterator<Item = (&Word, &InflightCall)> {
        self.inflight.iter()
    }

    /// Notes a store destination operand as it is resolved.
    fn observe_store(&mut self, mode: Mode, operand: Word) {
        self.relative_writes.truncate(WRITE_HISTORY.saturating_sub(1));
        let offset = (mode == Mode::Relative).then_some(operand);
        // truncate above leaves one free slot
        if self.relative_writes.insert(0, offset).is_err() {
            warn!("store history full, dropping {:?}", offset);
        }
    }

    /// Ends a completed step. `arithmetic` is the value an add or multiply
    /// just stored, if that is what ran.
    fn end_step(&mut self, pc: Address, arithmetic: Option<Word>) {
        self.stored_return_address = arithmetic.is_some_and(|value| {
            let expected = Word::try_from(pc)
                .ok()
                .and_then(|pc| pc.checked_add(CALL_FOOTPRINT));
            value > 0 && expected == Some(value)
        });
    }

    /// Inspects a taken jump before it commits and returns where execution
    /// should actually continue. Any memory access that fails here is a
    /// missed detection and leaves the jump alone.
    fn intercept_jump(
        &mut self,
        target: Address,
        memory: &mut Memory,
        relative_base: Word,
    ) -> Address {
        let Ok(return_address) = memory.read(relative_base) else {
            return target;
        };

        if Word::try_from(target).ok() == Some(return_address) {
            if let Some(call) = self.inflight.remove(&relative_base) {
                self.complete_call(call, memory, relative_base);
                return target;
            }
        }

        if self.stored_return_address {
            return self.begin_call(target, memory, relative_base, return_address);
        }

        target
    }

    fn complete_call(&mut self, call: InflightCall, memory: &Memory, relative_base: Word) {
        let Some(first) = relative_base.checked_add(1) else {
            return;
        };
        let Ok(returned) = memory.slice(first, call.return_count) else {
            return;
        };
        self.stats.returns = self.stats.returns.saturating_add(1);
        debug!("f{}({:?}) = {:?}", call.function, call.args, returned);
        if self.memoize {
            self.cache
                .entry(call.function)
                .or_default()
                .insert(call.args, returned);
        }
    }

    fn begin_call(
        &mut self,
        target: Address,
        memory: &mut Memory,
        relative_base: Word,
        return_address: Word,
    ) -> Address {
        let Some(first) = relative_base.checked_add(1) else {
            return target;
        };
        let Ok(args) = memory.slice(first, self.argument_count()) else {
            return target;
        };
        self.stats.calls = self.stats.calls.saturating_add(1);

        if let Some(result) = self.cached(target, &args) {
            // Check every slot first so a partial write can not happen.
            let Ok(return_to) = Address::try_from(return_address) else {
                return target;
            };
            if memory.slice(first, result.len()).is_err() {
                return target;
            }
            let result = result.to_vec();
            for (addr, value) in (first..).zip(result.iter().copied()) {
                if memory.write(addr, value).is_err() {
                    return target;
                }
            }
            self.stats.cache_hits = self.stats.cache_hits.saturating_add(1);
            debug!("f{}({:?}) = {:?} from cache", target, args, result);
            return return_to;
        }

        debug!("call f{}({:?}) with $rb = {}", target, args, relative_base);
        let call = InflightCall {
            function: target,
            args,
            return_count: RETURN_COUNT,
        };
        if let Some(stale) = self.inflight.insert(relative_base, call) {
            warn!(
                "call to f{} at $rb = {} never returned, replacing it",
                stale.function, relative_base
            );
        }
        target
    }

    /// A return-address store at `$rb[0]` preceded by a store at `$rb[n]`
    /// means the caller just placed `n` arguments.
    fn argument_count(&self) -> usize {
        let mut writes = self.relative_writes.iter();
        match (writes.next(), writes.next()) {
            (Some(Some(0)), Some(Some(count))) if *count > 0 => {
                usize::try_from(*count).unwrap_or(0)
            }
            _ => 0,
        }
    }
}

impl StepHook for CallOptimizer {
    fn after_step(
        &mut self,
        event: StepEvent,
        memory: &mut Memory,
        relative_base: Word,
    ) -> Option<Address> {
        let jump = event
            .jump
            .map(|target| self.intercept_jump(target, memory, relative_base));
        if let Some((mode, operand)) = event.store {
            self.observe_store(mode, operand);
        }
        self.end_step(event.pc, event.arithmetic);
        jump
    }
}
