//! Typed tag/length/value elements shared by the CAPF and TVS body encoding.
//!
//! Element header is `tag(u8) | length(u16 BE)` followed by `length` bytes,
//! all multi-byte numeric payloads big-endian. String payloads are UTF-8
//! with a trailing NUL included in `length`; producers append it, consumers
//! strip it. A `CERTIFICATE` element additionally wraps its DER payload in a
//! 5-byte inner header `01 | innerLen(u16) | 00 | cert_type(u8)` with
//! `innerLen = len(cert) + 2`.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ProtocolError;

/// Builds one element body buffer. Produces the bytes between the frame
/// header and nothing else — callers prepend the frame header separately so
/// the whole frame goes out in a single write.
#[derive(Default)]
pub struct ElementWriter {
    buf: Vec<u8>,
}

impl ElementWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn header(&mut self, tag: u8, len: usize) {
        self.buf.push(tag);
        self.buf
            .write_u16::<BigEndian>(len as u16)
            .expect("write to Vec never fails");
    }

    pub fn write_empty(&mut self, tag: u8) {
        self.header(tag, 0);
    }

    pub fn write_u8(&mut self, tag: u8, val: u8) {
        self.header(tag, 1);
        self.buf.push(val);
    }

    pub fn write_u16(&mut self, tag: u8, val: u16) {
        self.header(tag, 2);
        self.buf.write_u16::<BigEndian>(val).unwrap();
    }

    pub fn write_u32(&mut self, tag: u8, val: u32) {
        self.header(tag, 4);
        self.buf.write_u32::<BigEndian>(val).unwrap();
    }

    pub fn write_bytes(&mut self, tag: u8, val: &[u8]) {
        self.header(tag, val.len());
        self.buf.extend_from_slice(val);
    }

    pub fn write_str(&mut self, tag: u8, val: &str) {
        self.header(tag, val.len() + 1);
        self.buf.extend_from_slice(val.as_bytes());
        self.buf.push(0);
    }

    /// Writes a CERTIFICATE element: inner header `01 | len+2 | 00 | cert_type`
    /// followed by the DER bytes.
    pub fn write_cert(&mut self, tag: u8, cert_type: u8, der: &[u8]) {
        let inner_len = (der.len() + 2) as u16;
        self.header(tag, 5 + der.len());
        self.buf.push(0x01);
        self.buf.write_u16::<BigEndian>(inner_len).unwrap();
        self.buf.push(0x00);
        self.buf.push(cert_type);
        self.buf.extend_from_slice(der);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Decoded element set: tag -> raw value bytes. Duplicate tags overwrite
/// (last one on the wire wins), matching the codec's documented semantics.
#[derive(Debug, Default)]
pub struct ElementSet {
    values: BTreeMap<u8, Vec<u8>>,
}

impl ElementSet {
    /// Parses `body` into an element set. `known_tags` is the full set of
    /// tags defined by the protocol (not just those required by the current
    /// command) — anything else is a protocol error.
    pub fn decode(mut body: &[u8], known_tags: &[u8]) -> Result<Self, ProtocolError> {
        let mut values = BTreeMap::new();
        while !body.is_empty() {
            if body.len() < 3 {
                return Err(ProtocolError::Truncated {
                    need: 3,
                    got: body.len(),
                });
            }
            let tag = body[0];
            let len = (&body[1..3]).read_u16::<BigEndian>().unwrap() as usize;
            if body.len() < 3 + len {
                return Err(ProtocolError::Truncated {
                    need: 3 + len,
                    got: body.len(),
                });
            }
            if !known_tags.contains(&tag) {
                return Err(ProtocolError::UnknownTag(tag));
            }
            values.insert(tag, body[3..3 + len].to_vec());
            body = &body[3 + len..];
        }
        Ok(Self { values })
    }

    pub fn get_bytes(&self, tag: u8) -> Option<&[u8]> {
        self.values.get(&tag).map(|v| v.as_slice())
    }

    pub fn require_bytes(&self, tag: u8, name: &'static str) -> Result<&[u8], ProtocolError> {
        self.get_bytes(tag)
            .ok_or(ProtocolError::MissingElement(name))
    }

    pub fn get_u8(&self, tag: u8) -> Option<u8> {
        self.get_bytes(tag).and_then(|v| v.first().copied())
    }

    pub fn get_u16(&self, tag: u8) -> Option<u16> {
        self.get_bytes(tag)
            .and_then(|v| (&v[..]).read_u16::<BigEndian>().ok())
    }

    pub fn get_u32(&self, tag: u8) -> Option<u32> {
        self.get_bytes(tag)
            .and_then(|v| (&v[..]).read_u32::<BigEndian>().ok())
    }

    /// Strips the trailing NUL mandated for string elements.
    pub fn get_str(&self, tag: u8) -> Result<Option<String>, ProtocolError> {
        let Some(bytes) = self.get_bytes(tag) else {
            return Ok(None);
        };
        let trimmed = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        Ok(Some(std::str::from_utf8(trimmed)?.to_owned()))
    }

    pub fn require_str(&self, tag: u8, name: &'static str) -> Result<String, ProtocolError> {
        self.get_str(tag)?.ok_or(ProtocolError::MissingElement(name))
    }

    /// Strips the 5-byte CERTIFICATE inner wrapper, returning the DER bytes.
    pub fn get_cert(&self, tag: u8) -> Option<&[u8]> {
        let bytes = self.get_bytes(tag)?;
        bytes.get(5..)
    }

    pub fn require_cert(&self, tag: u8, name: &'static str) -> Result<&[u8], ProtocolError> {
        self.get_cert(tag).ok_or(ProtocolError::MissingElement(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip() {
        let mut w = ElementWriter::new();
        w.write_u32(1, 0xdead_beef);
        let body = w.into_bytes();
        let set = ElementSet::decode(&body, &[1]).unwrap();
        assert_eq!(set.get_u32(1), Some(0xdead_beef));
    }

    #[test]
    fn string_nul_present_on_wire_absent_decoded() {
        let mut w = ElementWriter::new();
        w.write_str(2, "SEP000000000001");
        let body = w.into_bytes();
        assert_eq!(body.last(), Some(&0u8));
        let set = ElementSet::decode(&body, &[2]).unwrap();
        assert_eq!(set.get_str(2).unwrap().as_deref(), Some("SEP000000000001"));
    }

    #[test]
    fn certificate_wrapper_roundtrip() {
        let der = vec![0xaa; 37];
        let mut w = ElementWriter::new();
        w.write_cert(3, 1, &der);
        let body = w.into_bytes();
        let set = ElementSet::decode(&body, &[3]).unwrap();
        assert_eq!(set.get_cert(3).unwrap(), der.as_slice());
    }

    #[test]
    fn duplicate_tag_last_wins() {
        let mut w = ElementWriter::new();
        w.write_u8(1, 1);
        w.write_u8(1, 2);
        let body = w.into_bytes();
        let set = ElementSet::decode(&body, &[1]).unwrap();
        assert_eq!(set.get_u8(1), Some(2));
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let mut w = ElementWriter::new();
        w.write_u8(9, 1);
        let body = w.into_bytes();
        let err = ElementSet::decode(&body, &[1]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownTag(9)));
    }

    #[test]
    fn truncated_body_is_protocol_error() {
        let err = ElementSet::decode(&[1, 0], &[1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }
}
