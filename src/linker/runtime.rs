/// Runtime image assembly: dispatcher section followed by every module section
use super::capability::Capability;
use super::module::CompiledModule;
use super::section::{pack, Section, SectionLayout};
use crate::error::{LinkError, Result};
use sectlink_evm::opcode::{BYTE, CALLDATALOAD, JUMP, PUSH1, RETURNDATASIZE, SHL};
use std::path::Path;

/// Section 0: jump to `calldata[0] << shift`.
///
/// `RETURNDATASIZE` is a one-byte zero before any call, on every EVM version.
pub fn dispatcher(layout: SectionLayout) -> Vec<u8> {
    vec![
        RETURNDATASIZE, // 0
        CALLDATALOAD,   // first calldata word
        RETURNDATASIZE, // 0
        BYTE,           // its most significant byte: the section index
        PUSH1,
        layout.shift(),
        SHL,  // index * capacity
        JUMP, // lands on the section's JUMPDEST
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeImage {
    pub capability: Capability,
    pub layout: SectionLayout,
    pub sections: Vec<Section>,
    /// Image offsets changed by the capability rewrite.
    pub substitutions: Vec<usize>,
    bytes: Vec<u8>,
}

impl RuntimeImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Module sections only, without the dispatcher.
    pub fn modules(&self) -> &[Section] {
        &self.sections[1..]
    }
}

/// Pack `modules` (already in section order) behind the dispatcher.
pub fn assemble(layout: SectionLayout, capability: Capability, modules: Vec<CompiledModule>) -> Result<RuntimeImage> {
    if modules.len() >= SectionLayout::MAX_SECTIONS {
        return Err(LinkError::config(format!("{} modules do not fit a one-byte selector", modules.len())));
    }

    let mut sections = Vec::with_capacity(modules.len() + 1);
    sections.push(pack(dispatcher(layout), 0, Path::new("<dispatcher>"), layout)?);

    let mut substitutions = Vec::new();
    for compiled in modules {
        let index = compiled.module.section;
        debug_assert_eq!(index, sections.len(), "modules must arrive in section order");
        let base = layout.offset_of(index);
        substitutions.extend(compiled.substitutions.iter().map(|offset| base + offset));
        sections.push(pack(compiled.code, index, &compiled.module.path, layout)?);
    }

    let bytes: Vec<u8> = sections.iter().flat_map(|section| section.bytes().iter().copied()).collect();
    debug_assert_eq!(bytes.len(), layout.image_len(sections.len() - 1));

    Ok(RuntimeImage { capability, layout, sections, substitutions, bytes })
}

/// Offsets at which two equal-length images differ.
pub fn differing_offsets(a: &RuntimeImage, b: &RuntimeImage) -> Result<Vec<usize>> {
    if a.len() != b.len() {
        return Err(LinkError::VariantMismatch { push0: a.len(), legacy: b.len() });
    }
    Ok(a.bytes().iter().zip(b.bytes()).enumerate().filter(|(_, (x, y))| x != y).map(|(i, _)| i).collect())
}
