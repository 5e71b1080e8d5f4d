use heapless::Vec;

use crate::error::{Error, Result};

/// Decode a hex-ASCII string into octets.
pub fn decode_hex<const L: usize>(s: &str) -> Result<Vec<u8, L>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return Err(Error::InvalidArgument);
    }
    let mut out = Vec::new();
    for i in (0..s.len()).step_by(2) {
        let byte = u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| Error::InvalidArgument)?;
        out.push(byte).map_err(|_| Error::OutOfMemory)?;
    }
    Ok(out)
}

/// Render octets as lowercase hex-ASCII.
pub fn encode_hex<const L: usize>(bytes: &[u8]) -> Result<Vec<u8, L>> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = Vec::new();
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize]).map_err(|_| Error::OutOfMemory)?;
        out.push(HEX[(b & 0x0F) as usize]).map_err(|_| Error::OutOfMemory)?;
    }
    Ok(out)
}
