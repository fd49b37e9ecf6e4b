//! Common traits for quarry components.

use crate::error::Result;

/// Trait for values with a fixed little-endian wire layout.
pub trait Wire: Sized {
    /// Appends the wire encoding of this value to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Decodes a value from the front of `buf`, advancing it past the
    /// consumed bytes.
    fn decode(buf: &mut &[u8]) -> Result<Self>;

    /// Serializes this value to a fresh byte vector.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Deserializes from bytes, requiring the buffer to be fully consumed.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let value = Self::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(crate::error::Error::Protocol {
                peer: None,
                message: format!("{} trailing bytes after payload", buf.len()),
            });
        }
        Ok(value)
    }
}
