/// 256-bit unsigned machine word, stored as four little-endian u64 limbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Word([u64; 4]);

impl Word {
    pub const ZERO: Word = Word([0; 4]);
    pub const ONE: Word = Word([1, 0, 0, 0]);

    pub const fn from_u64(value: u64) -> Word {
        Word([value, 0, 0, 0])
    }

    /// Interpret up to 32 big-endian bytes. Shorter slices are left-padded with zeros.
    pub fn from_be_slice(bytes: &[u8]) -> Word {
        let mut buf = [0u8; 32];
        let n = bytes.len().min(32);
        buf[32 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let start = 32 - (i + 1) * 8;
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&buf[start..start + 8]);
            *limb = u64::from_be_bytes(chunk);
        }
        Word(limbs)
    }

    /// Immediate of a (possibly truncated) push: missing trailing bytes read as zero.
    pub fn from_push_immediate(immediate: &[u8], width: usize) -> Word {
        let mut buf = [0u8; 32];
        let width = width.min(32);
        let start = 32 - width;
        let n = immediate.len().min(width);
        buf[start..start + n].copy_from_slice(&immediate[..n]);
        Word::from_be_slice(&buf)
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            let start = 32 - (i + 1) * 8;
            out[start..start + 8].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    pub fn is_zero(self) -> bool {
        self.0.iter().all(|&limb| limb == 0)
    }

    /// The value as usize, or None if it does not fit.
    pub fn as_usize(self) -> Option<usize> {
        if self.0[1] != 0 || self.0[2] != 0 || self.0[3] != 0 {
            return None;
        }
        usize::try_from(self.0[0]).ok()
    }

    pub fn wrapping_add(self, rhs: Word) -> Word {
        let mut out = [0u64; 4];
        let mut carry = false;
        for i in 0..4 {
            let (sum, c1) = self.0[i].overflowing_add(rhs.0[i]);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            out[i] = sum;
            carry = c1 || c2;
        }
        Word(out)
    }

    pub fn wrapping_sub(self, rhs: Word) -> Word {
        let mut out = [0u64; 4];
        let mut borrow = false;
        for i in 0..4 {
            let (diff, b1) = self.0[i].overflowing_sub(rhs.0[i]);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            out[i] = diff;
            borrow = b1 || b2;
        }
        Word(out)
    }

    pub fn wrapping_mul(self, rhs: Word) -> Word {
        let mut out = [0u64; 4];
        for i in 0..4 {
            let mut carry: u128 = 0;
            for j in 0..(4 - i) {
                let cur = out[i + j] as u128 + (self.0[i] as u128) * (rhs.0[j] as u128) + carry;
                out[i + j] = cur as u64;
                carry = cur >> 64;
            }
        }
        Word(out)
    }

    pub fn not(self) -> Word {
        Word([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }

    pub fn and(self, rhs: Word) -> Word {
        Word([self.0[0] & rhs.0[0], self.0[1] & rhs.0[1], self.0[2] & rhs.0[2], self.0[3] & rhs.0[3]])
    }

    pub fn or(self, rhs: Word) -> Word {
        Word([self.0[0] | rhs.0[0], self.0[1] | rhs.0[1], self.0[2] | rhs.0[2], self.0[3] | rhs.0[3]])
    }

    /// Byte `index` counted from the most significant end, as the `BYTE` opcode does.
    pub fn byte(self, index: Word) -> Word {
        match index.as_usize() {
            Some(i) if i < 32 => Word::from_u64(self.to_be_bytes()[i] as u64),
            _ => Word::ZERO,
        }
    }

    pub fn shl(self, shift: Word) -> Word {
        let shift = match shift.as_usize() {
            Some(s) if s < 256 => s,
            _ => return Word::ZERO,
        };
        let (limb_shift, bit_shift) = (shift / 64, shift % 64);
        let mut out = [0u64; 4];
        for i in (limb_shift..4).rev() {
            let src = i - limb_shift;
            out[i] = self.0[src] << bit_shift;
            if bit_shift > 0 && src > 0 {
                out[i] |= self.0[src - 1] >> (64 - bit_shift);
            }
        }
        Word(out)
    }

    pub fn shr(self, shift: Word) -> Word {
        let shift = match shift.as_usize() {
            Some(s) if s < 256 => s,
            _ => return Word::ZERO,
        };
        let (limb_shift, bit_shift) = (shift / 64, shift % 64);
        let mut out = [0u64; 4];
        for i in 0..(4 - limb_shift) {
            let src = i + limb_shift;
            out[i] = self.0[src] >> bit_shift;
            if bit_shift > 0 && src + 1 < 4 {
                out[i] |= self.0[src + 1] << (64 - bit_shift);
            }
        }
        Word(out)
    }
}

impl PartialOrd for Word {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Word {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl From<bool> for Word {
    fn from(value: bool) -> Self {
        if value {
            Word::ONE
        } else {
            Word::ZERO
        }
    }
}
