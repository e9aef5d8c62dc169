use super::*;
use crate::builder::{ProgramBuilder, imm, label, rel};

extern crate std;
use std::collections::VecDeque;
use std::vec::Vec as StdVec;

fn run_with_input(program: &[Word], config: &Config, input: &[Word]) -> Result<Machine, Error> {
    let mut machine = Machine::new(program, config);
    machine.feed(input)?;
    Ok(machine)
}

/// Reads `n` and prints fib(n), recursing through the usual call
/// convention with the argument and result at `$rb[1]`.
fn fib_program() -> Result<StdVec<Word>, Error> {
    let mut builder = ProgramBuilder::new();
    builder
        .adjust_relative_base(imm(1000))?
        .input(rel(1))?
        .call("fib")?
        .output(rel(1))?
        .halt()?;
    builder
        .label("fib")?
        .less_than(rel(1), imm(2), rel(2))?
        .jump_if_false(rel(2), label("recurse"))?
        .ret()?;
    builder
        .label("recurse")?
        .adjust_relative_base(imm(4))?
        .add(rel(-3), imm(-1), rel(1))?
        .call("fib")?
        .add(rel(1), imm(0), rel(-1))?
        .add(rel(-3), imm(-2), rel(1))?
        .call("fib")?
        .add(rel(1), rel(-1), rel(-3))?
        .adjust_relative_base(imm(-4))?
        .ret()?;
    Ok(builder.finish()?)
}

#[test]
fn test_add_in_place() -> Result<(), Error> {
    let mut machine = Machine::new(&[1, 0, 0, 0, 99], &Config::new());
    machine.run()?;
    assert!(machine.is_halted());
    assert_eq!(machine.memory_snapshot()?, [2, 0, 0, 0, 99]);
    assert_eq!(machine.steps(), 2);
    Ok(())
}

#[test]
fn test_echo_input() -> Result<(), Error> {
    let machine = run_with_input(&[3, 0, 4, 0, 99], &Config::new(), &[7])?;
    assert_eq!(machine.output(), [7]);
    Ok(())
}

#[test]
fn test_negative_immediate() -> Result<(), Error> {
    let mut machine = Machine::new(&[1101, 100, -1, 4, 0], &Config::new());
    machine.run()?;
    assert_eq!(machine.memory().read(4)?, 99);
    assert!(machine.is_halted());
    Ok(())
}

#[test]
fn test_compare_and_jump() -> Result<(), Error> {
    // Outputs 1 when the input equals 8, 0 otherwise.
    let program = [3, 9, 8, 9, 10, 9, 4, 9, 99, -1, 8];
    for (input, expected) in [(8, 1), (7, 0), (9, 0)] {
        let machine = run_with_input(&program, &Config::new(), &[input])?;
        assert_eq!(machine.output(), [expected]);
    }

    // 999 below 8, 1000 at 8, 1001 above.
    let program = parse_program(
        "3,21,1008,21,8,20,1005,20,22,107,8,21,20,1006,20,31,\
         1106,0,36,98,0,0,1002,21,125,20,4,20,1105,1,46,104,\
         999,1105,1,46,1101,1000,1,20,4,20,1105,1,46,98,99",
    )?;
    for (input, expected) in [(5, 999), (8, 1000), (11, 1001)] {
        let machine = run_with_input(&program, &Config::new(), &[input])?;
        assert_eq!(machine.output(), [expected]);
    }
    Ok(())
}

#[test]
fn test_relative_base() -> Result<(), Error> {
    let program = [109, 2000, 21101, 3, 4, 5, 204, 5, 99];
    let mut machine = Machine::new(&program, &Config::new().sparse());
    machine.run()?;
    assert_eq!(machine.relative_base(), 2000);
    assert_eq!(machine.memory().read(2005)?, 7);
    assert_eq!(machine.output(), [7]);
    Ok(())
}

#[test]
fn test_quine() -> Result<(), Error> {
    let program = [
        109, 1, 204, -1, 1001, 100, 1, 100, 1008, 100, 16, 101, 1006, 101, 0, 99,
    ];
    let mut machine = Machine::new(&program, &Config::new().sparse());
    machine.run()?;
    assert_eq!(machine.output(), program);
    Ok(())
}

#[test]
fn test_large_words() -> Result<(), Error> {
    let mut machine = Machine::new(&[1102, 34915192, 34915192, 7, 4, 7, 99, 0], &Config::new());
    machine.run()?;
    assert_eq!(machine.output(), [1219070632396864]);

    let mut machine = Machine::new(&[104, 1125899906842624, 99], &Config::new());
    machine.run()?;
    assert_eq!(machine.take_output(), [1125899906842624]);
    assert!(machine.output().is_empty());
    Ok(())
}

#[test]
fn test_block_and_resume() -> Result<(), Error> {
    let program = [3, 11, 3, 12, 1, 11, 12, 13, 4, 13, 99, 0, 0, 0];
    let mut machine = Machine::new(&program, &Config::new());

    machine.run()?;
    assert_eq!(machine.state(), State::BlockedOnInput);
    assert_eq!(machine.program_counter(), 0);
    assert_eq!(machine.steps(), 0);

    machine.feed(&[5])?;
    assert!(machine.is_blocked());
    assert_eq!(machine.program_counter(), 2);
    assert_eq!(machine.steps(), 1);

    let mut queue: VecDeque<Word> = VecDeque::from([6, 100]);
    machine.resume(&mut queue)?;
    assert!(machine.is_halted());
    assert_eq!(machine.output(), [11]);
    assert_eq!(queue, [100]);

    // Resuming a halted machine does nothing, stepping it is an error.
    machine.resume(&mut queue)?;
    assert_eq!(machine.steps(), 5);
    assert_eq!(machine.step(&mut NoInput), Err(MachineError::AlreadyHalted));
    Ok(())
}

#[test]
fn test_input_sources() -> Result<(), Error> {
    let program = [3, 11, 3, 12, 1, 11, 12, 13, 4, 13, 99, 0, 0, 0];

    let values: [Word; 2] = [20, 22];
    let mut values = values.into_iter();
    let mut machine = Machine::new(&program, &Config::new());
    machine.resume(&mut FromFn(|| values.next()))?;
    assert_eq!(machine.output(), [42]);

    let mut machine = Machine::new(&program, &Config::new());
    let values: [Word; 2] = [1, 2];
    machine.run_to_completion(&mut Inputs(values.into_iter()))?;
    assert_eq!(machine.output(), [3]);
    Ok(())
}

#[test]
fn test_run_to_completion_without_input() {
    let mut machine = Machine::new(&[3, 0, 99], &Config::new());
    assert_eq!(
        machine.run_to_completion(&mut NoInput).err(),
        Some(MachineError::NoInputAvailable { pc: 0 })
    );
}

#[test]
fn test_single_steps() -> Result<(), Error> {
    let mut machine = Machine::new(&[1101, 1, 1, 5, 99, 0], &Config::new());
    assert_eq!(machine.step(&mut NoInput)?, State::Running);
    assert_eq!(machine.program_counter(), 4);
    assert_eq!(machine.step(&mut NoInput)?, State::Halted);
    assert_eq!(machine.steps(), 2);
    assert_eq!(machine.memory_snapshot()?, [1101, 1, 1, 5, 99, 2]);
    Ok(())
}

#[test]
fn test_bad_opcodes() {
    let mut machine = Machine::new(&[1, 0, 0, 0, 42], &Config::new());
    assert_eq!(
        machine.run().err(),
        Some(MachineError::UnknownOpcode {
            opcode: 42,
            pc: 4,
            known: false,
        })
    );
    // Instructions before the failure keep their effects.
    assert_eq!(machine.memory().read(0), Ok(2));

    let mut machine = Machine::new(&[301, 0, 99], &Config::new());
    assert_eq!(
        machine.run().err(),
        Some(MachineError::InvalidMode { opcode: 301, pc: 0 })
    );

    let mut machine = Machine::new(&[11101, 1, 1, 0, 99], &Config::new());
    assert_eq!(
        machine.run().err(),
        Some(MachineError::InvalidMode { opcode: 11101, pc: 0 })
    );
}

#[test]
fn test_opcode_allowlist() -> Result<(), Error> {
    let config = Config::new().valid_opcodes(OpcodeSet::ARITHMETIC);
    let mut machine = Machine::new(&[1, 0, 0, 0, 4, 0, 99], &config);
    let err = machine.run().err();
    assert_eq!(
        err,
        Some(MachineError::UnknownOpcode {
            opcode: 4,
            pc: 4,
            known: true,
        })
    );

    let mut machine = Machine::new(&[2, 0, 0, 0, 99], &config);
    machine.run()?;
    assert_eq!(machine.memory().read(0)?, 4);
    Ok(())
}

#[test]
fn test_negative_addresses() {
    for config in [Config::new(), Config::new().sparse()] {
        let mut machine = Machine::new(&[1, -1, 0, 0, 99], &config);
        assert_eq!(machine.run().err(), Some(MachineError::NegativeAddress(-1)));
    }

    let mut machine = Machine::new(&[1105, 1, -3], &Config::new());
    assert_eq!(machine.run().err(), Some(MachineError::NegativeAddress(-3)));

    let mut machine = Machine::new(&[109, -5, 204, 1, 99], &Config::new());
    assert_eq!(machine.run().err(), Some(MachineError::NegativeAddress(-4)));
}

#[test]
fn test_dense_bounds() -> Result<(), Error> {
    let program = [1, 0, 0, 10, 99];
    let mut machine = Machine::new(&program, &Config::new());
    assert_eq!(machine.run().err(), Some(MachineError::OutOfBounds(10)));

    let mut machine = Machine::new(&program, &Config::new().dense(Some(11)));
    machine.run()?;
    assert_eq!(machine.memory().read(10)?, 2);

    let mut machine = Machine::new(&program, &Config::new().sparse());
    machine.run()?;
    assert_eq!(machine.memory().read(10)?, 2);

    // Falling off the end of dense memory.
    let mut machine = Machine::new(&[1101, 1, 1, 0], &Config::new());
    assert_eq!(machine.run().err(), Some(MachineError::OutOfBounds(4)));
    Ok(())
}

#[test]
fn test_far_sparse_write() -> Result<(), Error> {
    let far: Word = 1 << 61;
    let program = [1101, 7, 0, far, 4, far, 99];
    let mut machine = Machine::new(&program, &Config::new().sparse().stats(true));
    machine.run()?;
    assert_eq!(machine.output(), [7]);
    assert_eq!(machine.memory().read(far)?, 7);
    assert_eq!(machine.memory_snapshot(), Err(MachineError::OutOfBounds(far)));

    let records = machine.disassemble();
    let texts: StdVec<&str> = records.iter().map(Record::text).collect();
    assert_eq!(
        texts,
        [
            "%2305843009213693952 <- 7",
            "output %2305843009213693952",
            "HALT",
            "DATA"
        ]
    );
    let last = records.last().expect("memory is not empty");
    assert_eq!((last.start, last.end), (1 << 61, 1 << 61));
    assert_eq!(last.words, [7]);
    Ok(())
}

#[test]
fn test_short_operands() -> Result<(), Error> {
    let mut machine = Machine::new(&[1101, 1], &Config::new());
    assert_eq!(machine.step(&mut NoInput)?, State::Running);
    assert_eq!(machine.memory_snapshot()?, [1, 1]);

    let mut machine = Machine::new(&[1101, 1], &Config::new().strict_operands(true));
    assert_eq!(
        machine.run().err(),
        Some(MachineError::TruncatedProgram { pc: 0 })
    );
    Ok(())
}

#[test]
fn test_duplicate_is_independent() -> Result<(), Error> {
    let program = [3, 9, 102, 2, 9, 9, 4, 9, 99, 0];
    let mut machine = Machine::new(&program, &Config::new());
    machine.run()?;

    let mut copy = machine.duplicate();
    machine.feed(&[1])?;
    copy.feed(&[10])?;

    assert_eq!(machine.output(), [2]);
    assert_eq!(copy.output(), [20]);
    assert_eq!(machine.memory().read(9)?, 2);
    assert_eq!(copy.memory().read(9)?, 20);
    Ok(())
}

#[test]
fn test_save_and_restore() -> Result<(), Error> {
    let config = Config::new().sparse().memoize(true).stats(true);
    let mut machine = Machine::new(&fib_program()?, &config);
    machine.run()?;
    assert!(machine.is_blocked());

    let saved = machine.save_state()?;
    let mut restored = Machine::restore_state(&saved)?;
    assert_eq!(restored, machine);

    restored.feed(&[10])?;
    machine.feed(&[10])?;
    assert_eq!(restored.output(), [55]);
    assert_eq!(restored, machine);
    Ok(())
}

#[test]
fn test_memory_patching() -> Result<(), Error> {
    let mut machine = Machine::new(&[1101, 2, 3, 0, 104, 0, 99], &Config::new());
    machine.memory_mut().write(2, 40)?;
    machine.run()?;
    assert_eq!(machine.output(), [0]);
    assert_eq!(machine.memory().read(0)?, 42);
    Ok(())
}

#[test]
fn test_execution_stats() -> Result<(), Error> {
    // Counts mem[13] down from 3.
    let program = [1001, 13, -1, 13, 1005, 13, 0, 99, 0, 0, 0, 0, 0, 3];
    let mut machine = Machine::new(&program, &Config::new().stats(true));
    machine.run()?;

    let stats = machine.stats().expect("stats are enabled");
    assert_eq!(stats.times_run(0), 3);
    assert_eq!(stats.times_run(4), 3);
    assert_eq!(stats.times_run(7), 1);
    assert_eq!(stats.jumps_taken(4, 0), 2);
    assert_eq!(stats.jump_counts().len(), 1);
    assert_eq!(stats.total_steps(), machine.steps());
    assert_eq!(stats.hotspots(1), [(0, 3)]);

    let mut machine = Machine::new(&program, &Config::new());
    machine.run()?;
    assert!(machine.stats().is_none());
    Ok(())
}

#[test]
fn test_memoized_calls() -> Result<(), Error> {
    let program = fib_program()?;

    let plain = run_with_input(&program, &Config::new().sparse(), &[15])?;
    let memoized = run_with_input(&program, &Config::new().sparse().memoize(true), &[15])?;

    assert_eq!(plain.output(), [610]);
    assert_eq!(memoized.output(), plain.output());
    assert!(memoized.steps() < plain.steps());

    let optimizer = memoized.optimizer().expect("memoization is enabled");
    assert!(optimizer.memoizes());
    assert!(optimizer.stats().cache_hits > 0);
    assert_eq!(optimizer.cached(fib_entry(&program), &[10]), Some(&[55][..]));
    assert_eq!(optimizer.inflight().count(), 0);
    assert!(plain.optimizer().is_none());
    Ok(())
}

#[test]
fn test_traced_calls_are_not_cached() -> Result<(), Error> {
    let program = fib_program()?;
    let config = Config::new().sparse().trace_calls(true);
    let traced = run_with_input(&program, &config, &[8])?;
    let plain = run_with_input(&program, &Config::new().sparse(), &[8])?;

    assert_eq!(traced.output(), [21]);
    assert_eq!(traced.steps(), plain.steps());

    let optimizer = traced.optimizer().expect("call tracing is enabled");
    assert_eq!(optimizer.cache_len(), 0);
    assert_eq!(optimizer.stats().cache_hits, 0);
    assert_eq!(optimizer.stats().calls, optimizer.stats().returns);
    assert!(optimizer.stats().calls > 1);
    Ok(())
}

/// Address of the first function found in `program`.
fn fib_entry(program: &[Word]) -> Address {
    functions(program).first().map_or(0, |range| range.start)
}

#[test]
fn test_parse_program() -> Result<(), Error> {
    assert_eq!(parse_program("1,0,0,0,99\n")?, [1, 0, 0, 0, 99]);
    assert_eq!(parse_program(" 1, -2 ,3, ")?, [1, -2, 3]);
    assert!(parse_program("")?.is_empty());
    assert!(matches!(parse_program("1,x,3"), Err(Error::Parse(_))));
    Ok(())
}
