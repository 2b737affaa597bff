/// Probe injection
///
/// A probe is an `mstore(offset, sentinel)` placed at the very start of a module's
/// runtime code. The compiler emits it as `PUSHn sentinel PUSH1 offset MSTORE`
/// (`PUSH0` for a zero offset when the target has it); the bytes after the last probe
/// are the module's real code, with whatever prologue the compiler synthesized left behind.
use super::capability::Capability;
use super::section::SectionLayout;
use super::sentinel::{Sentinel, SentinelAllocator};
use rand::Rng;
use sectlink_evm::opcode::{push_opcode, MSTORE, PUSH0, PUSH1};
use std::ops::Range;

/// Width of every sentinel except the first of the build.
pub const SENTINEL_BYTES: usize = 28;
/// The first probe of the build is one byte wider and marks the global start of real code.
pub const LEAD_SENTINEL_BYTES: usize = SENTINEL_BYTES + 1;
/// Probe `j` of a module group stores at `PROBE_BASE_OFFSET - j`.
pub const PROBE_BASE_OFFSET: u8 = 0xff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub offset: u8,
    pub sentinel: Sentinel,
}

impl Probe {
    pub fn to_yul(&self) -> String {
        format!(" mstore({:#x},0x{})", self.offset, self.sentinel.to_hex())
    }

    /// The exact bytes `solc` emits for this probe under `capability`.
    pub fn encoding(&self, capability: Capability) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.sentinel.len() + 4);
        bytes.push(push_opcode(self.sentinel.len()).expect("sentinel width is 1..=32"));
        bytes.extend_from_slice(self.sentinel.as_bytes());
        match (capability, self.offset) {
            (Capability::Push0, 0) => bytes.push(PUSH0),
            _ => bytes.extend_from_slice(&[PUSH1, self.offset]),
        }
        bytes.push(MSTORE);
        bytes
    }
}

/// Probe count per module, precomputed before any compilation.
///
/// Module `i` (1-based) carries the probes of modules `1..i` again plus its own,
/// so its count is a running sum. Folding it up front removes the ordering
/// dependency between module compilations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePlan {
    per_module: usize,
    cumulative: Vec<usize>,
}

impl ProbePlan {
    pub fn new(layout: SectionLayout, modules: usize) -> Self {
        let per_module = layout.probes_per_module();
        let cumulative = (0..modules)
            .scan(0usize, |total, _| {
                *total += per_module;
                Some(*total)
            })
            .collect();
        Self { per_module, cumulative }
    }

    pub fn per_module(&self) -> usize {
        self.per_module
    }

    /// Probes required by the module in `section` (1-based).
    pub fn probes_for(&self, section: usize) -> usize {
        self.cumulative[section - 1]
    }

    /// Draw fresh sentinels for the module in `section`.
    pub fn draw<R: Rng>(&self, section: usize, rng: &mut R) -> Vec<Probe> {
        let mut allocator = SentinelAllocator::new(rng);
        (0..self.probes_for(section))
            .map(|k| {
                let width = if k == 0 { LEAD_SENTINEL_BYTES } else { SENTINEL_BYTES };
                Probe {
                    offset: PROBE_BASE_OFFSET - (k % self.per_module) as u8,
                    sentinel: allocator.generate(width),
                }
            })
            .collect()
    }
}

/// Span of `object "runtime" { code {` in `source`, ending just after the second brace.
///
/// Whitespace and comments may separate the tokens; text inside comments and string
/// literals is never matched.
pub fn find_runtime_block(source: &str) -> Option<Range<usize>> {
    let bytes = source.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        if let Some(end) = skip_comment(bytes, pos) {
            pos = end;
            continue;
        }
        match bytes[pos] {
            b'"' => pos = skip_string(bytes, pos),
            c if is_ident_start(c) => {
                let end = ident_end(bytes, pos);
                if &source[pos..end] == "object" {
                    if let Some(block_end) = match_runtime_header(source, end) {
                        return Some(pos..block_end);
                    }
                }
                pos = end;
            }
            _ => pos += 1,
        }
    }
    None
}

/// Insert `probes` right after the runtime block header. None if there is no header.
pub fn inject(source: &str, probes: &[Probe]) -> Option<String> {
    let block = find_runtime_block(source)?;
    let mut out = String::with_capacity(source.len() + probes.len() * 72);
    out.push_str(&source[..block.end]);
    for probe in probes {
        out.push_str(&probe.to_yul());
    }
    out.push_str(&source[block.end..]);
    Some(out)
}

/// Offset just past the last occurrence of `probe`'s encoding in `code`.
pub fn code_start_after(code: &[u8], probe: &Probe, capability: Capability) -> Option<usize> {
    let needle = probe.encoding(capability);
    if code.len() < needle.len() {
        return None;
    }
    code.windows(needle.len()).rposition(|window| window == needle.as_slice()).map(|at| at + needle.len())
}

fn match_runtime_header(source: &str, mut pos: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    pos = skip_trivia(bytes, pos);
    pos = expect(source, pos, "\"runtime\"")?;
    pos = skip_trivia(bytes, pos);
    pos = expect(source, pos, "{")?;
    pos = skip_trivia(bytes, pos);
    let end = ident_end(bytes, pos);
    if &source[pos..end] != "code" {
        return None;
    }
    pos = skip_trivia(bytes, end);
    expect(source, pos, "{")
}

fn expect(source: &str, pos: usize, token: &str) -> Option<usize> {
    source[pos..].starts_with(token).then(|| pos + token.len())
}

fn skip_trivia(bytes: &[u8], mut pos: usize) -> usize {
    loop {
        if let Some(end) = skip_comment(bytes, pos) {
            pos = end;
        } else if pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        } else {
            return pos;
        }
    }
}

fn skip_comment(bytes: &[u8], pos: usize) -> Option<usize> {
    let rest = &bytes[pos..];
    if rest.starts_with(b"//") {
        Some(rest.iter().position(|&c| c == b'\n').map_or(bytes.len(), |nl| pos + nl + 1))
    } else if rest.starts_with(b"/*") {
        Some(rest[2..].windows(2).position(|w| w == b"*/").map_or(bytes.len(), |close| pos + 2 + close + 2))
    } else {
        None
    }
}

fn skip_string(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn ident_end(bytes: &[u8], pos: usize) -> usize {
    let mut end = pos;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'_' | b'$' | b'.')) {
        end += 1;
    }
    end
}
