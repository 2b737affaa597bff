/// A small EVM interpreter.
///
/// Covers what dispatchers, deploy stubs and the capability shim need: stack and
/// memory operations, calldata and code access, jumps, `CREATE` (executed as a nested
/// frame), `RETURN`/`REVERT`. There is no gas accounting and no state; a step limit
/// stands in for both.
use crate::opcode::*;
use crate::word::Word;
use alloc::vec::Vec;

const STACK_LIMIT: usize = 1024;
const MEMORY_LIMIT: usize = 1 << 20;
const STEP_LIMIT: usize = 100_000;
const DEPTH_LIMIT: usize = 8;
/// Placeholder address pushed by a successful `CREATE`.
const CREATED_ADDRESS: u64 = 0x00c0_ffee;
/// Value reported by `GAS`.
const GAS_REMAINING: u64 = 30_000_000;

/// Execution environment of one frame.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub calldata: Vec<u8>,
    /// Whether `PUSH0` is a valid opcode (shanghai and later).
    pub push0: bool,
}

impl Env {
    pub fn new(calldata: Vec<u8>, push0: bool) -> Self {
        Self { calldata, push0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    InvalidOpcode { pc: usize, opcode: u8 },
    BadJump { pc: usize, destination: Word },
    StackUnderflow { pc: usize },
    StackOverflow { pc: usize },
    MemoryLimit { pc: usize },
    StepLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    Stop,
    Return(Vec<u8>),
    Revert(Vec<u8>),
    Exceptional(Fault),
}

impl Halt {
    pub fn is_success(&self) -> bool {
        matches!(self, Halt::Stop | Halt::Return(_))
    }

    pub fn returned(&self) -> Option<&[u8]> {
        match self {
            Halt::Return(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub halt: Halt,
    /// Destinations of every jump taken, in order.
    pub jumps: Vec<usize>,
    pub steps: usize,
}

/// Execute `code` in `env` until it halts.
pub fn run(code: &[u8], env: &Env) -> Outcome {
    Machine::new(code, env, 0).execute()
}

struct Machine<'a> {
    code: &'a [u8],
    env: &'a Env,
    depth: usize,
    jumpdests: Vec<bool>,
    pc: usize,
    stack: Vec<Word>,
    memory: Vec<u8>,
    returndata_size: usize,
    jumps: Vec<usize>,
    steps: usize,
}

impl<'a> Machine<'a> {
    fn new(code: &'a [u8], env: &'a Env, depth: usize) -> Self {
        Self {
            code,
            env,
            depth,
            jumpdests: jumpdests(code),
            pc: 0,
            stack: Vec::new(),
            memory: Vec::new(),
            returndata_size: 0,
            jumps: Vec::new(),
            steps: 0,
        }
    }

    fn execute(mut self) -> Outcome {
        let halt = loop {
            match self.step() {
                Ok(None) => continue,
                Ok(Some(halt)) => break halt,
                Err(fault) => break Halt::Exceptional(fault),
            }
        };
        Outcome { halt, jumps: self.jumps, steps: self.steps }
    }

    fn pop(&mut self) -> Result<Word, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow { pc: self.pc })
    }

    fn push(&mut self, value: Word) -> Result<(), Fault> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(Fault::StackOverflow { pc: self.pc });
        }
        self.stack.push(value);
        Ok(())
    }

    /// Resolve an (offset, size) memory range, growing memory in 32-byte words.
    fn memory_range(&mut self, offset: Word, size: Word) -> Result<(usize, usize), Fault> {
        let size = size.as_usize().ok_or(Fault::MemoryLimit { pc: self.pc })?;
        if size == 0 {
            return Ok((0, 0));
        }
        let offset = offset.as_usize().ok_or(Fault::MemoryLimit { pc: self.pc })?;
        let end = offset.checked_add(size).ok_or(Fault::MemoryLimit { pc: self.pc })?;
        if end > MEMORY_LIMIT {
            return Err(Fault::MemoryLimit { pc: self.pc });
        }
        let rounded = end.div_ceil(32) * 32;
        if self.memory.len() < rounded {
            self.memory.resize(rounded, 0);
        }
        Ok((offset, end))
    }

    /// Copy `source[src..src+len]` into memory, zero-filling past the end of `source`.
    fn copy_into_memory(&mut self, dest: Word, src: Word, size: Word, source: &[u8]) -> Result<(), Fault> {
        let (start, end) = self.memory_range(dest, size)?;
        let src = src.as_usize().unwrap_or(usize::MAX);
        for (i, slot) in self.memory[start..end].iter_mut().enumerate() {
            *slot = src.checked_add(i).and_then(|at| source.get(at)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn jump_to(&mut self, destination: Word) -> Result<(), Fault> {
        match destination.as_usize() {
            Some(dest) if self.jumpdests.get(dest).copied().unwrap_or(false) => {
                self.jumps.push(dest);
                self.pc = dest;
                Ok(())
            }
            _ => Err(Fault::BadJump { pc: self.pc, destination }),
        }
    }

    fn step(&mut self) -> Result<Option<Halt>, Fault> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return Err(Fault::StepLimit);
        }
        let Some(&opcode) = self.code.get(self.pc) else {
            return Ok(Some(Halt::Stop));
        };
        let mut next_pc = self.pc + 1;

        match opcode {
            STOP => return Ok(Some(Halt::Stop)),
            ADD | MUL | SUB | LT | GT | EQ | AND | OR | BYTE | SHL | SHR => {
                let a = self.pop()?;
                let b = self.pop()?;
                let value = match opcode {
                    ADD => a.wrapping_add(b),
                    MUL => a.wrapping_mul(b),
                    SUB => a.wrapping_sub(b),
                    LT => Word::from(a < b),
                    GT => Word::from(a > b),
                    EQ => Word::from(a == b),
                    AND => a.and(b),
                    OR => a.or(b),
                    BYTE => b.byte(a),
                    SHL => b.shl(a),
                    _ => b.shr(a),
                };
                self.push(value)?;
            }
            ISZERO => {
                let a = self.pop()?;
                self.push(Word::from(a.is_zero()))?;
            }
            NOT => {
                let a = self.pop()?;
                self.push(a.not())?;
            }
            CALLVALUE => self.push(Word::ZERO)?,
            CALLDATALOAD => {
                let offset = self.pop()?;
                let mut buf = [0u8; 32];
                if let Some(start) = offset.as_usize() {
                    for (i, slot) in buf.iter_mut().enumerate() {
                        *slot = start.checked_add(i).and_then(|at| self.env.calldata.get(at)).copied().unwrap_or(0);
                    }
                }
                self.push(Word::from_be_slice(&buf))?;
            }
            CALLDATASIZE => self.push(Word::from_u64(self.env.calldata.len() as u64))?,
            CALLDATACOPY => {
                let dest = self.pop()?;
                let src = self.pop()?;
                let size = self.pop()?;
                let env = self.env;
                self.copy_into_memory(dest, src, size, &env.calldata)?;
            }
            CODESIZE => self.push(Word::from_u64(self.code.len() as u64))?,
            CODECOPY => {
                let dest = self.pop()?;
                let src = self.pop()?;
                let size = self.pop()?;
                let code = self.code;
                self.copy_into_memory(dest, src, size, code)?;
            }
            RETURNDATASIZE => self.push(Word::from_u64(self.returndata_size as u64))?,
            POP => {
                self.pop()?;
            }
            MLOAD => {
                let offset = self.pop()?;
                let (start, end) = self.memory_range(offset, Word::from_u64(32))?;
                let value = Word::from_be_slice(&self.memory[start..end]);
                self.push(value)?;
            }
            MSTORE => {
                let offset = self.pop()?;
                let value = self.pop()?;
                let (start, end) = self.memory_range(offset, Word::from_u64(32))?;
                self.memory[start..end].copy_from_slice(&value.to_be_bytes());
            }
            MSTORE8 => {
                let offset = self.pop()?;
                let value = self.pop()?;
                let (start, _) = self.memory_range(offset, Word::ONE)?;
                self.memory[start] = value.to_be_bytes()[31];
            }
            JUMP => {
                let destination = self.pop()?;
                self.jump_to(destination)?;
                return Ok(None);
            }
            JUMPI => {
                let destination = self.pop()?;
                let condition = self.pop()?;
                if !condition.is_zero() {
                    self.jump_to(destination)?;
                    return Ok(None);
                }
            }
            PC => self.push(Word::from_u64(self.pc as u64))?,
            MSIZE => self.push(Word::from_u64(self.memory.len() as u64))?,
            GAS => self.push(Word::from_u64(GAS_REMAINING))?,
            JUMPDEST => {}
            PUSH0 if self.env.push0 => self.push(Word::ZERO)?,
            PUSH1..=PUSH32 => {
                let width = immediate_len(opcode);
                let end = (next_pc + width).min(self.code.len());
                let value = Word::from_push_immediate(&self.code[next_pc..end], width);
                self.push(value)?;
                next_pc += width;
            }
            DUP1..=DUP16 => {
                let depth = (opcode - DUP1) as usize + 1;
                if self.stack.len() < depth {
                    return Err(Fault::StackUnderflow { pc: self.pc });
                }
                let value = self.stack[self.stack.len() - depth];
                self.push(value)?;
            }
            SWAP1..=SWAP16 => {
                let depth = (opcode - SWAP1) as usize + 1;
                if self.stack.len() <= depth {
                    return Err(Fault::StackUnderflow { pc: self.pc });
                }
                let top = self.stack.len() - 1;
                self.stack.swap(top, top - depth);
            }
            CREATE => {
                let _value = self.pop()?;
                let offset = self.pop()?;
                let size = self.pop()?;
                let (start, end) = self.memory_range(offset, size)?;
                let initcode = self.memory[start..end].to_vec();
                let address = self.create(&initcode);
                self.push(address)?;
            }
            RETURN | REVERT => {
                let offset = self.pop()?;
                let size = self.pop()?;
                let (start, end) = self.memory_range(offset, size)?;
                let data = self.memory[start..end].to_vec();
                return Ok(Some(if opcode == RETURN { Halt::Return(data) } else { Halt::Revert(data) }));
            }
            _ => return Err(Fault::InvalidOpcode { pc: self.pc, opcode }),
        }

        self.pc = next_pc;
        Ok(None)
    }

    /// Run `initcode` as a child frame with the same capabilities and empty calldata.
    fn create(&mut self, initcode: &[u8]) -> Word {
        if self.depth + 1 >= DEPTH_LIMIT {
            return Word::ZERO;
        }
        let env = Env::new(Vec::new(), self.env.push0);
        let outcome = Machine::new(initcode, &env, self.depth + 1).execute();
        self.steps += outcome.steps;
        match outcome.halt {
            Halt::Stop | Halt::Return(_) => {
                self.returndata_size = 0;
                Word::from_u64(CREATED_ADDRESS)
            }
            Halt::Revert(data) => {
                self.returndata_size = data.len();
                Word::ZERO
            }
            Halt::Exceptional(_) => {
                self.returndata_size = 0;
                Word::ZERO
            }
        }
    }
}
