/// Random fingerprints used to find where real code starts in compiler output
use crate::hex;
use rand::Rng;

/// A random big-endian value whose minimal encoding is exactly `len()` bytes and whose
/// low bit is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    bytes: Vec<u8>,
}

impl Sentinel {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

pub struct SentinelAllocator<'r, R: Rng> {
    rng: &'r mut R,
}

impl<'r, R: Rng> SentinelAllocator<'r, R> {
    pub fn new(rng: &'r mut R) -> Self {
        Self { rng }
    }

    /// Draw a value uniformly from [1, 2^(8 * byte_len)), force it odd, and redraw
    /// while its leading byte is zero (the hex form would come out shorter).
    ///
    /// `byte_len` must be in 1..=32 so the value fits one push immediate.
    pub fn generate(&mut self, byte_len: usize) -> Sentinel {
        assert!((1..=32).contains(&byte_len), "sentinel length {} out of range", byte_len);
        let mut bytes = vec![0u8; byte_len];
        loop {
            self.rng.fill(bytes.as_mut_slice());
            bytes[byte_len - 1] |= 1;
            if bytes[0] != 0 {
                return Sentinel { bytes };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_exact_width_and_odd() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut allocator = SentinelAllocator::new(&mut rng);
        for len in [1, 2, 28, 29, 32] {
            for _ in 0..200 {
                let sentinel = allocator.generate(len);
                assert_eq!(sentinel.len(), len);
                assert_ne!(sentinel.as_bytes()[0], 0);
                assert_eq!(sentinel.as_bytes()[len - 1] & 1, 1);
                assert_eq!(sentinel.to_hex().len(), len * 2);
            }
        }
    }

    #[test]
    fn test_values_do_not_repeat() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut allocator = SentinelAllocator::new(&mut rng);
        let drawn: HashSet<Vec<u8>> = (0..1000).map(|_| allocator.generate(28).as_bytes().to_vec()).collect();
        assert_eq!(drawn.len(), 1000);
    }

    #[test]
    #[should_panic]
    fn test_rejects_zero_width() {
        let mut rng = StdRng::seed_from_u64(1);
        SentinelAllocator::new(&mut rng).generate(0);
    }
}
