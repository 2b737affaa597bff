/// Fixed-capacity sections
///
/// Every module lives in its own power-of-two slot. The slot index times the
/// capacity is the module's entry offset, so no relocation table is needed.
use crate::error::{LinkError, Result};
use std::path::{Path, PathBuf};
use tracing::error;

/// Section geometry: capacity = 1 << shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionLayout {
    shift: u8,
}

impl SectionLayout {
    /// 32 bytes: one probe per module.
    pub const MIN_SHIFT: u8 = 5;
    /// 8 KiB: 256 probes per module, the last one stored at memory offset 0
    /// (a `PUSH0` operand on PUSH0 targets).
    pub const MAX_SHIFT: u8 = 13;
    /// The dispatcher selects a section with one calldata byte.
    pub const MAX_SECTIONS: usize = 256;

    pub fn new(shift: u8) -> Result<Self> {
        if !(Self::MIN_SHIFT..=Self::MAX_SHIFT).contains(&shift) {
            return Err(LinkError::config(format!(
                "section shift {} outside {}..={}",
                shift,
                Self::MIN_SHIFT,
                Self::MAX_SHIFT
            )));
        }
        Ok(Self { shift })
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    pub fn capacity(&self) -> usize {
        1 << self.shift
    }

    /// Probes each module adds to the cumulative probe count.
    pub fn probes_per_module(&self) -> usize {
        self.capacity() >> 5
    }

    pub fn offset_of(&self, index: usize) -> usize {
        index << self.shift
    }

    /// Image length for `modules` modules plus the dispatcher section.
    pub fn image_len(&self, modules: usize) -> usize {
        self.capacity() * (modules + 1)
    }
}

impl Default for SectionLayout {
    fn default() -> Self {
        Self { shift: 6 }
    }
}

/// One packed slot of a runtime image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub index: usize,
    pub path: PathBuf,
    /// Unpadded length.
    pub used: usize,
    bytes: Vec<u8>,
}

impl Section {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Right-pad `code` with zeros to exactly one section.
pub fn pack(mut code: Vec<u8>, index: usize, path: &Path, layout: SectionLayout) -> Result<Section> {
    let capacity = layout.capacity();
    let used = code.len();
    if used > capacity {
        error!(
            "section {:#04x} overflow: {} is {} bytes, capacity {}",
            index,
            path.display(),
            used,
            capacity
        );
        return Err(LinkError::SectionOverflow { path: path.to_path_buf(), section: index, size: used, capacity });
    }
    code.resize(capacity, 0);
    Ok(Section { index, path: path.to_path_buf(), used, bytes: code })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_bounds() {
        assert!(SectionLayout::new(4).is_err());
        assert!(SectionLayout::new(14).is_err());
        let layout = SectionLayout::new(6).unwrap();
        assert_eq!(layout.capacity(), 64);
        assert_eq!(layout.probes_per_module(), 2);
        assert_eq!(layout.offset_of(3), 192);
        assert_eq!(layout.image_len(1), 128);
        assert_eq!(SectionLayout::new(13).unwrap().probes_per_module(), 256);
    }

    #[test]
    fn test_pack_pads_with_zeros() {
        let layout = SectionLayout::new(6).unwrap();
        let mut code = vec![0x5b];
        code.extend_from_slice(&[0x01; 10]);
        let section = pack(code, 1, Path::new("yul/Gas.yul"), layout).unwrap();
        assert_eq!(section.bytes().len(), 64);
        assert_eq!(section.used, 11);
        assert_eq!(section.bytes()[0], 0x5b);
        assert!(section.bytes()[11..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pack_exact_fit() {
        let layout = SectionLayout::new(5).unwrap();
        let section = pack(vec![0x5b; 32], 2, Path::new("a.yul"), layout).unwrap();
        assert_eq!(section.bytes(), &[0x5b; 32][..]);
    }

    #[test]
    fn test_overflow_names_module() {
        let layout = SectionLayout::new(6).unwrap();
        let err = pack(vec![0x5b; 70], 4, Path::new("yul/Create2.yul"), layout).unwrap_err();
        match err {
            LinkError::SectionOverflow { path, section, size, capacity } => {
                assert_eq!(path, PathBuf::from("yul/Create2.yul"));
                assert_eq!((section, size, capacity), (4, 70, 64));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
