/// Lowercase hex text helpers for compiler output and artifact files
use crate::error::{LinkError, Result};

const DIGITS: &[u8; 16] = b"0123456789abcdef";

pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        out.push(DIGITS[(byte >> 4) as usize] as char);
        out.push(DIGITS[(byte & 0x0f) as usize] as char);
    }
    out
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    let text = text.strip_prefix("0x").unwrap_or(text);
    if text.len() % 2 != 0 {
        return Err(LinkError::InvalidHex(format!("odd length {}", text.len())));
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = nibble(pair[0])?;
            let lo = nibble(pair[1])?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(LinkError::InvalidHex(format!("unexpected character {:?}", c as char))),
    }
}

/// The last maximal run of hex digits in `output`, which is where `solc --bin`
/// leaves the binary after its banner lines.
pub fn last_hex_token(output: &str) -> Option<&str> {
    output
        .split(|c: char| !c.is_ascii_hexdigit())
        .filter(|token| !token.is_empty())
        .last()
}
