/// Initcode construction
///
/// Single mode prepends a fixed ten-byte copy-and-return stub to the image.
/// Dual mode prepends a compiled capability shim that picks one of two images laid
/// out back to back; the shim's placeholders are patched with the real offset and
/// length after compilation.
use super::compiler::YulCompiler;
use super::context::BuildContext;
use super::runtime::RuntimeImage;
use crate::error::{LinkError, Result};
use crate::hex;
use sectlink_evm::opcode::{find_aligned, CODECOPY, DUP1, INVALID, PUSH1, PUSH2, RETURN, RETURNDATASIZE};
use tracing::{debug, warn};

/// Deployed code size limit (EIP-170).
pub const CODE_SIZE_LIMIT: usize = 0x6000;
/// Image lengths are embedded as a PUSH2 immediate.
pub const MAX_IMAGE_LEN: usize = u16::MAX as usize;
pub const DEPLOY_STUB_LEN: usize = 10;
/// `PUSH1 0x33` in the compiled shim: becomes the shim's own length.
pub const OFFSET_PLACEHOLDER: [u8; 2] = [PUSH1, 0x33];
/// `PUSH2 0xffee` in the compiled shim: becomes the length of one image.
pub const LENGTH_PLACEHOLDER: [u8; 3] = [PUSH2, 0xff, 0xee];

/// `PUSH2 len DUP1 PUSH1 0x0a RETURNDATASIZE CODECOPY RETURNDATASIZE RETURN`
pub fn deploy_stub(image_len: usize) -> Result<Vec<u8>> {
    let len = image_len_immediate(image_len)?;
    Ok(vec![PUSH2, len[0], len[1], DUP1, PUSH1, DEPLOY_STUB_LEN as u8, RETURNDATASIZE, CODECOPY, RETURNDATASIZE, RETURN])
}

/// Stub followed by the image.
pub fn single(image: &RuntimeImage) -> Result<Vec<u8>> {
    check_code_size(image);
    let mut initcode = deploy_stub(image.len())?;
    initcode.extend_from_slice(image.bytes());
    Ok(initcode)
}

/// Capability shim followed by the PUSH0 image and the legacy image.
pub fn conditional<C: YulCompiler + ?Sized>(
    ctx: &BuildContext,
    compiler: &C,
    template: &str,
    push0: &RuntimeImage,
    legacy: &RuntimeImage,
) -> Result<Vec<u8>> {
    if push0.len() != legacy.len() {
        return Err(LinkError::VariantMismatch { push0: push0.len(), legacy: legacy.len() });
    }
    check_code_size(push0);

    let temp = ctx.temp_source(template)?;
    let compiled = compiler.compile_to_bytes(temp.path(), &ctx.evm_versions.legacy)?;
    let shim = deployed_code(&compiled)
        .ok_or_else(|| LinkError::ShimPatch("compiled shim has no RETURN INVALID boundary".to_string()))?;
    let shim = patch_shim(shim, push0.len())?;
    debug!("capability shim: {} bytes ({})", shim.len(), hex::encode(&shim));

    let mut initcode = shim;
    initcode.extend_from_slice(push0.bytes());
    initcode.extend_from_slice(legacy.bytes());
    Ok(initcode)
}

/// Bytes after the first instruction-aligned `RETURN INVALID`, i.e. the runtime
/// object of an initcode blob.
pub fn deployed_code(initcode: &[u8]) -> Option<&[u8]> {
    find_aligned(initcode, &[RETURN, INVALID]).first().map(|&at| &initcode[at + 2..])
}

/// Replace every aligned placeholder in `shim`: the offset with the shim's length,
/// the length with `image_len`. Both placeholders must be present.
pub fn patch_shim(shim: &[u8], image_len: usize) -> Result<Vec<u8>> {
    let offsets = find_aligned(shim, &OFFSET_PLACEHOLDER);
    let lengths = find_aligned(shim, &LENGTH_PLACEHOLDER);
    if offsets.is_empty() {
        return Err(LinkError::ShimPatch(format!("offset placeholder {} not found", hex::encode(&OFFSET_PLACEHOLDER))));
    }
    if lengths.is_empty() {
        return Err(LinkError::ShimPatch(format!("length placeholder {} not found", hex::encode(&LENGTH_PLACEHOLDER))));
    }
    let own_len = u8::try_from(shim.len())
        .map_err(|_| LinkError::ShimPatch(format!("shim is {} bytes, its offset must fit one byte", shim.len())))?;
    let len = image_len_immediate(image_len)?;

    let mut patched = shim.to_vec();
    for at in offsets {
        patched[at + 1] = own_len;
    }
    for at in lengths {
        patched[at + 1..at + 3].copy_from_slice(&len);
    }
    Ok(patched)
}

fn image_len_immediate(image_len: usize) -> Result<[u8; 2]> {
    u16::try_from(image_len)
        .map(u16::to_be_bytes)
        .map_err(|_| LinkError::ImageTooLarge { size: image_len, limit: MAX_IMAGE_LEN })
}

fn check_code_size(image: &RuntimeImage) {
    if image.len() > CODE_SIZE_LIMIT {
        warn!(
            "runtime image ({}) is {} bytes, above the {}-byte deployed code limit",
            image.capability,
            image.len(),
            CODE_SIZE_LIMIT
        );
    }
}
