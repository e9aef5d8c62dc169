//! Static disassembly.
//!
//! Intcode mixes code and data freely, so the sweep is a heuristic: a
//! word that can not start an instruction, or an address the supplied
//! trace never executed, opens a data span that lasts until the next
//! plausible instruction start. Nothing in here fails; anything that does
//! not decode is rendered as data.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;

use crate::decode::{Mode, Opcode, decode, is_plausible};
use crate::machine::Machine;
use crate::optimizer::CALL_FOOTPRINT;
use crate::stats::ExecutionTrace;
use crate::{Address, Word};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Literal(Word),
    Position(Word),
    Relative(Word),
}

impl Operand {
    fn new(mode: Mode, value: Word) -> Self {
        match mode {
            Mode::Position => Operand::Position(value),
            Mode::Immediate => Operand::Literal(value),
            Mode::Relative => Operand::Relative(value),
        }
    }

    pub fn literal(&self) -> Option<Word> {
        match self {
            Operand::Literal(value) => Some(*value),
            Operand::Position(_) | Operand::Relative(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Position(addr) => write!(f, "%{addr}"),
            Operand::Relative(offset) => write!(f, "$rb[{offset}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    /// Jump right after a return-address store.
    Call,
    /// Unconditional jump to `$rb[0]`.
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Instruction {
        opcode: Opcode,
        operands: Vec<Operand>,
        text: String,
        annotation: Option<Annotation>,
    },
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub start: Address,
    /// Last address covered, inclusive.
    pub end: Address,
    pub kind: RecordKind,
    pub words: Vec<Word>,
}

impl Record {
    pub fn is_instruction(&self) -> bool {
        matches!(self.kind, RecordKind::Instruction { .. })
    }

    pub fn text(&self) -> &str {
        match &self.kind {
            RecordKind::Instruction { text, .. } => text,
            RecordKind::Data => "DATA",
        }
    }

    pub fn annotation(&self) -> Option<Annotation> {
        match &self.kind {
            RecordKind::Instruction { annotation, .. } => *annotation,
            RecordKind::Data => None,
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        (self.start..=self.end).contains(&addr)
    }
}

/// A comparison whose result feeds a following conditional jump.
struct Comparison {
    target: Operand,
    when_true: String,
    when_false: String,
}

struct Rendered {
    text: String,
    annotation: Option<Annotation>,
    comparison: Option<Comparison>,
    stored_return_address: bool,
}

impl Rendered {
    fn plain(text: String) -> Self {
        Self {
            text,
            annotation: None,
            comparison: None,
            stored_return_address: false,
        }
    }
}

pub fn disassemble(memory: &[Word], trace: Option<&dyn ExecutionTrace>) -> Vec<Record> {
    let start = trace.and_then(|trace| trace.first_executed()).unwrap_or(0);
    sweep(memory, 0, start, trace)
}

/// Sweeps `words`, which sit at address `base`, from address `start` to
/// the end of the run. Record addresses are absolute.
fn sweep(
    words: &[Word],
    base: Address,
    start: Address,
    trace: Option<&dyn ExecutionTrace>,
) -> Vec<Record> {
    let end = base.saturating_add(words.len());
    let word_at = |addr: Address| {
        addr.checked_sub(base)
            .and_then(|index| words.get(index))
            .copied()
            .unwrap_or(0)
    };
    let span = |from: Address, to: Address| {
        let to = to.min(end).saturating_sub(base);
        words
            .get(from.saturating_sub(base)..to)
            .unwrap_or_default()
            .to_vec()
    };
    let starts_instruction = |addr: Address| {
        let word = word_at(addr);
        match trace {
            Some(trace) => trace.was_executed(addr) && decode(word).is_ok(),
            None => is_plausible(word),
        }
    };

    let mut records = Vec::new();
    let mut pos = start.max(base);
    let mut comparison: Option<Comparison> = None;
    let mut stored_return_address = false;

    while pos < end {
        let op = match decode(word_at(pos)) {
            Ok(op) if starts_instruction(pos) => op,
            _ => {
                let start = pos;
                pos = pos.saturating_add(1);
                while pos < end && !starts_instruction(pos) {
                    pos = pos.saturating_add(1);
                }
                records.push(Record {
                    start,
                    end: pos.saturating_sub(1),
                    kind: RecordKind::Data,
                    words: span(start, pos),
                });
                comparison = None;
                stored_return_address = false;
                continue;
            }
        };

        let first = pos.saturating_add(1);
        let next = pos.saturating_add(op.width());
        let operands: Vec<Operand> = (first..next)
            .zip(op.modes.iter())
            .map(|(addr, &mode)| Operand::new(mode, word_at(addr)))
            .collect();

        let rendered = render(
            op.opcode,
            &operands,
            pos,
            comparison.take(),
            stored_return_address,
        );
        comparison = rendered.comparison;
        stored_return_address = rendered.stored_return_address;

        records.push(Record {
            start: pos,
            end: next.saturating_sub(1),
            kind: RecordKind::Instruction {
                opcode: op.opcode,
                operands,
                text: rendered.text,
                annotation: rendered.annotation,
            },
            words: span(pos, next),
        });
        pos = next;
    }

    records
}

fn render(
    opcode: Opcode,
    operands: &[Operand],
    pos: Address,
    comparison: Option<Comparison>,
    stored_return_address: bool,
) -> Rendered {
    let operand = |index: usize| operands.get(index).cloned().unwrap_or(Operand::Literal(0));

    match opcode {
        Opcode::Add | Opcode::Multiply | Opcode::LessThan | Opcode::Equals => {
            let (lhs, rhs, dst) = (operand(0), operand(1), operand(2));
            render_binary(opcode, lhs, rhs, dst, pos)
        }
        Opcode::Input => Rendered::plain(format!("{} <- input", operand(0))),
        Opcode::Output => Rendered::plain(format!("output {}", operand(0))),
        Opcode::AdjustRelativeBase => Rendered::plain(format!("$rb += {}", operand(0))),
        Opcode::Halt => Rendered::plain("HALT".to_string()),
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
            let (cond, target) = (operand(0), operand(1));
            let on_true = opcode == Opcode::JumpIfTrue;

            if let Some(comparison) = comparison.filter(|c| c.target == cond) {
                let test = if on_true {
                    comparison.when_true
                } else {
                    comparison.when_false
                };
                return Rendered::plain(format!("goto {target} if {test}"));
            }

            let Some(value) = cond.literal() else {
                let test = if on_true { "!=" } else { "==" };
                return Rendered::plain(format!("goto {target} if {cond} {test} 0"));
            };
            if (value != 0) != on_true {
                return Rendered::plain("nop".to_string());
            }

            let mut text = format!("goto {target}");
            let mut annotation = None;
            if target == Operand::Relative(0) {
                text.push_str(" RET");
                annotation = Some(Annotation::Return);
            }
            if stored_return_address {
                text.push_str(" CALL");
                annotation = Some(Annotation::Call);
            }
            Rendered {
                text,
                annotation,
                comparison: None,
                stored_return_address: false,
            }
        }
    }
}

fn render_binary(opcode: Opcode, lhs: Operand, rhs: Operand, dst: Operand, pos: Address) -> Rendered {
    let symbol = match opcode {
        Opcode::Add => "+",
        Opcode::Multiply => "*",
        Opcode::LessThan => "<",
        _ => "==",
    };

    let comparison = match opcode {
        Opcode::LessThan => Some(Comparison {
            target: dst.clone(),
            when_true: format!("{lhs} < {rhs}"),
            when_false: format!("{lhs} >= {rhs}"),
        }),
        Opcode::Equals => Some(Comparison {
            target: dst.clone(),
            when_true: format!("{lhs} == {rhs}"),
            when_false: format!("{lhs} != {rhs}"),
        }),
        _ => None,
    };

    let folded = match (lhs.literal(), rhs.literal()) {
        (Some(a), Some(b)) => match opcode {
            Opcode::Add => a.checked_add(b),
            Opcode::Multiply => a.checked_mul(b),
            Opcode::LessThan => Some(Word::from(a < b)),
            _ => Some(Word::from(a == b)),
        },
        _ => None,
    };

    let stored_return_address = matches!(opcode, Opcode::Add | Opcode::Multiply)
        && folded.is_some_and(|value| {
            let expected = Word::try_from(pos)
                .ok()
                .and_then(|pos| pos.checked_add(CALL_FOOTPRINT));
            value > 0 && expected == Some(value)
        });

    let result = match (folded, opcode) {
        (Some(value), _) => value.to_string(),
        (None, Opcode::Multiply) if lhs == Operand::Literal(1) => rhs.to_string(),
        (None, Opcode::Multiply) if rhs == Operand::Literal(1) => lhs.to_string(),
        (None, Opcode::Add) if lhs == Operand::Literal(0) => rhs.to_string(),
        (None, Opcode::Add) if rhs == Operand::Literal(0) => lhs.to_string(),
        _ => format!("{lhs} {symbol} {rhs}"),
    };

    Rendered {
        text: format!("{dst} <- {result}"),
        annotation: None,
        comparison,
        stored_return_address,
    }
}

/// Address ranges that look like separate functions.
///
/// A function starts at the first instruction after a `RET`, a `HALT` or a
/// data span, and ends just past the `RET` that closes it. Code before the
/// first such boundary (the program entry) is not reported.
pub fn functions(memory: &[Word]) -> Vec<Range<Address>> {
    let mut found = Vec::new();
    let mut start = None;
    let mut at_boundary = false;

    for record in disassemble(memory, None) {
        let RecordKind::Instruction {
            opcode, annotation, ..
        } = record.kind
        else {
            start = None;
            at_boundary = true;
            continue;
        };

        if at_boundary {
            start = Some(record.start);
            at_boundary = false;
        }
        if annotation == Some(Annotation::Return) {
            if let Some(start) = start.take() {
                found.push(start..record.end.saturating_add(1));
            }
            at_boundary = true;
        } else if opcode == Opcode::Halt {
            start = None;
            at_boundary = true;
        }
    }

    found
}

/// Column aligned listing of disassembly records.
pub struct Listing<'a>(pub &'a [Record]);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let records = self.0;
        let last = records.iter().map(|r| r.end).max().unwrap_or(0);
        let addr_width = last.to_string().len();
        let text_width = records.iter().map(|r| r.text().len()).max().unwrap_or(0);
        let words_width = records
            .iter()
            .filter(|r| r.is_instruction())
            .map(|r| format!("{:?}", r.words).len())
            .max()
            .unwrap_or(0);

        for record in records {
            let line = format!(
                "{:>aw$} {:>aw$} {:<tw$} {:<ww$}",
                record.start,
                record.end,
                record.text(),
                format!("{:?}", record.words),
                aw = addr_width,
                tw = text_width,
                ww = words_width,
            );
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

impl Machine {
    /// Disassembles current memory, restricted to executed code when
    /// statistics were collected. Sparse memory is swept one
    /// [`Memory::segments`](crate::memory::Memory::segments) run at a time,
    /// so unmapped stretches produce no records.
    pub fn disassemble(&self) -> Vec<Record> {
        let trace = self.stats().map(|stats| stats as &dyn ExecutionTrace);
        let first = trace.and_then(|trace| trace.first_executed());
        self.memory()
            .segments()
            .iter()
            .flat_map(|(base, words)| {
                let start = first.map_or(*base, |first| first.max(*base));
                sweep(words, *base, start, trace)
            })
            .collect()
    }
}
