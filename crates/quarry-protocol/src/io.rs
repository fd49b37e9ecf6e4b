//! Little-endian read/write helpers for payload encoding.

use quarry_base::{Error, Result};

fn truncated(what: &str) -> Error {
    Error::Protocol {
        peer: None,
        message: format!("truncated payload reading {what}"),
    }
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    let (&b, rest) = buf.split_first().ok_or_else(|| truncated("u8"))?;
    *buf = rest;
    Ok(b)
}

pub fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    let bytes = get_bytes(buf, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    let bytes = get_bytes(buf, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    let bytes = get_bytes(buf, 8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(arr))
}

pub fn get_i32(buf: &mut &[u8]) -> Result<i32> {
    Ok(get_u32(buf)? as i32)
}

pub fn get_bytes<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(truncated("bytes"));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

pub fn get_short_string(buf: &mut &[u8]) -> Result<String> {
    let len = get_u8(buf)? as usize;
    let bytes = get_bytes(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Protocol {
        peer: None,
        message: "string field is not valid UTF-8".to_string(),
    })
}

pub fn put_short_string(out: &mut Vec<u8>, s: &str) {
    // Length-prefixed with a single byte; longer names are cut at a char
    // boundary.
    let mut bytes = s.as_bytes();
    if bytes.len() > u8::MAX as usize {
        let mut end = u8::MAX as usize;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        bytes = &bytes[..end];
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}
