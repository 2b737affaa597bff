/// EVM opcode table (the subset the linker emits, searches for or interprets)
/// and an instruction walker that never mistakes push data for an opcode.

pub const STOP: u8 = 0x00;
pub const ADD: u8 = 0x01;
pub const MUL: u8 = 0x02;
pub const SUB: u8 = 0x03;
pub const LT: u8 = 0x10;
pub const GT: u8 = 0x11;
pub const EQ: u8 = 0x14;
pub const ISZERO: u8 = 0x15;
pub const AND: u8 = 0x16;
pub const OR: u8 = 0x17;
pub const NOT: u8 = 0x19;
pub const BYTE: u8 = 0x1a;
pub const SHL: u8 = 0x1b;
pub const SHR: u8 = 0x1c;
pub const CALLVALUE: u8 = 0x34;
pub const CALLDATALOAD: u8 = 0x35;
pub const CALLDATASIZE: u8 = 0x36;
pub const CALLDATACOPY: u8 = 0x37;
pub const CODESIZE: u8 = 0x38;
pub const CODECOPY: u8 = 0x39;
pub const RETURNDATASIZE: u8 = 0x3d;
pub const POP: u8 = 0x50;
pub const MLOAD: u8 = 0x51;
pub const MSTORE: u8 = 0x52;
pub const MSTORE8: u8 = 0x53;
pub const JUMP: u8 = 0x56;
pub const JUMPI: u8 = 0x57;
pub const PC: u8 = 0x58;
pub const MSIZE: u8 = 0x59;
pub const GAS: u8 = 0x5a;
pub const JUMPDEST: u8 = 0x5b;
pub const PUSH0: u8 = 0x5f;
pub const PUSH1: u8 = 0x60;
pub const PUSH2: u8 = 0x61;
pub const PUSH32: u8 = 0x7f;
pub const DUP1: u8 = 0x80;
pub const DUP16: u8 = 0x8f;
pub const SWAP1: u8 = 0x90;
pub const SWAP16: u8 = 0x9f;
pub const CREATE: u8 = 0xf0;
pub const RETURN: u8 = 0xf3;
pub const REVERT: u8 = 0xfd;
pub const INVALID: u8 = 0xfe;

/// Number of immediate bytes following `opcode`.
pub const fn immediate_len(opcode: u8) -> usize {
    if opcode >= PUSH1 && opcode <= PUSH32 {
        (opcode - PUSH1 + 1) as usize
    } else {
        0
    }
}

/// The `PUSHn` opcode carrying an `n`-byte immediate, for `n` in 1..=32.
pub const fn push_opcode(n: usize) -> Option<u8> {
    if n >= 1 && n <= 32 {
        Some(PUSH1 + (n as u8) - 1)
    } else {
        None
    }
}

/// One decoded instruction. `immediate` is shorter than the opcode's width
/// only when the code ends inside the push data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub offset: usize,
    pub opcode: u8,
    pub immediate: &'a [u8],
}

pub struct Instructions<'a> {
    code: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let opcode = *self.code.get(self.offset)?;
        let start = self.offset + 1;
        let end = (start + immediate_len(opcode)).min(self.code.len());
        let instruction = Instruction {
            offset: self.offset,
            opcode,
            immediate: &self.code[start..end],
        };
        self.offset = end;
        Some(instruction)
    }
}

/// Walk `code` instruction by instruction.
pub fn instructions(code: &[u8]) -> Instructions<'_> {
    Instructions { code, offset: 0 }
}

/// Offsets of every instruction-aligned occurrence of `pattern` in `code`.
///
/// A match must start on an opcode boundary; bytes inside push immediates are
/// never treated as match starts.
pub fn find_aligned(code: &[u8], pattern: &[u8]) -> alloc::vec::Vec<usize> {
    if pattern.is_empty() {
        return alloc::vec::Vec::new();
    }
    instructions(code)
        .map(|instruction| instruction.offset)
        .filter(|&offset| code[offset..].starts_with(pattern))
        .collect()
}

/// Valid jump destinations, indexed by code offset.
pub fn jumpdests(code: &[u8]) -> alloc::vec::Vec<bool> {
    let mut valid = alloc::vec![false; code.len()];
    for instruction in instructions(code) {
        if instruction.opcode == JUMPDEST {
            valid[instruction.offset] = true;
        }
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_lengths() {
        assert_eq!(immediate_len(PUSH0), 0);
        assert_eq!(immediate_len(PUSH1), 1);
        assert_eq!(immediate_len(0x7b), 28);
        assert_eq!(immediate_len(PUSH32), 32);
        assert_eq!(immediate_len(DUP1), 0);
        assert_eq!(push_opcode(29), Some(0x7c));
        assert_eq!(push_opcode(0), None);
        assert_eq!(push_opcode(33), None);
    }

    #[test]
    fn test_walker_skips_push_data() {
        // PUSH2 0x5b5b, JUMPDEST, PUSH1 (truncated)
        let code = [0x61, 0x5b, 0x5b, 0x5b, 0x60];
        let decoded: Vec<_> = instructions(&code).map(|i| (i.offset, i.opcode, i.immediate.len())).collect();
        assert_eq!(decoded, vec![(0, PUSH2, 2), (3, JUMPDEST, 0), (4, PUSH1, 0)]);
        assert_eq!(jumpdests(&code), vec![false, false, false, true, false]);
    }

    #[test]
    fn test_find_aligned_ignores_immediates() {
        // PUSH2 0xf3fe, RETURN, INVALID
        let code = [0x61, 0xf3, 0xfe, 0xf3, 0xfe];
        assert_eq!(find_aligned(&code, &[RETURN, INVALID]), vec![3]);
        assert!(find_aligned(&code, &[]).is_empty());
    }
}
