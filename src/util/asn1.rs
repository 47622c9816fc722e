//! Minimal DER encoder used by the certificate issuer.
//!
//! Parsing is left to `x509-cert`; this module only builds new TBSCertificate
//! bytes, so it carries an encode-only `Encoder` with a stack-based
//! `start_seq`/`end_seq` pair that backpatches the length once the contents
//! are known.

use std::io::Result;

use byteorder::WriteBytesExt;

pub fn write_tag(buf: &mut Vec<u8>, tag: u8) -> Result<()> {
    buf.write_u8(tag)
}

pub fn write_len(buf: &mut Vec<u8>, len: u8) -> Result<()> {
    buf.write_u8(len)
}

pub fn write_enum(buf: &mut Vec<u8>, val: u8) -> Result<()> {
    write_tag(buf, 0xa)?;
    write_len(buf, 1)?;
    buf.write_u8(val)
}

fn write_octet_string(buf: &mut Vec<u8>, val: &[u8]) -> Result<()> {
    write_tag(buf, 0x4)?;
    write_len(buf, val.len() as u8)?;
    buf.extend_from_slice(val);
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, val: &str) -> Result<()> {
    write_tag(buf, 0xc)?;
    let bytes = val.as_bytes();
    write_len(buf, bytes.len() as u8)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn write_string_with_tag(buf: &mut Vec<u8>, tag: u8, val: &str) -> Result<()> {
    write_tag(buf, tag)?;
    let bytes = val.as_bytes();
    write_len(buf, bytes.len() as u8)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn write_bool(buf: &mut Vec<u8>, val: bool) -> Result<()> {
    write_tag(buf, 0x1)?;
    write_len(buf, 1)?;
    buf.write_u8(if val { 0xff } else { 0 })
}

fn write_octet_string_with_tag(buf: &mut Vec<u8>, tag: u8, val: &[u8]) -> Result<()> {
    write_tag(buf, tag)?;
    write_len(buf, val.len() as u8)?;
    buf.extend_from_slice(val);
    Ok(())
}

pub fn write_int(buf: &mut Vec<u8>, val: u32) -> Result<()> {
    write_tag(buf, 0x2)?;
    if val < 0x80 {
        write_len(buf, 1)?;
        buf.write_u8(val as u8)
    } else if val < 0x8000 {
        write_len(buf, 2)?;
        buf.write_u8((val >> 8) as u8)?;
        buf.write_u8(val as u8)
    } else if val < 0x800000 {
        write_len(buf, 3)?;
        buf.write_u8((val >> 16) as u8)?;
        buf.write_u8((val >> 8) as u8)?;
        buf.write_u8(val as u8)
    } else {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
    }
}

/// Encodes `bytes` as a DER INTEGER, minimally: strips leading all-zero
/// bytes down to a single byte, and reinstates one leading `0x00` if the
/// remaining high bit is set (so it decodes as positive).
fn write_positive_integer(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let mut trimmed = bytes;
    while trimmed.len() > 1 && trimmed[0] == 0 && trimmed[1] & 0x80 == 0 {
        trimmed = &trimmed[1..];
    }
    let needs_pad = trimmed.first().is_some_and(|b| b & 0x80 != 0);
    let len = trimmed.len() + usize::from(needs_pad);
    write_tag(buf, 0x2)?;
    write_len_generic(buf, len)?;
    if needs_pad {
        buf.write_u8(0)?;
    }
    buf.extend_from_slice(trimmed);
    Ok(())
}

fn write_len_generic(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    if len < 0x80 {
        buf.write_u8(len as u8)
    } else if len <= 0xff {
        buf.write_u8(0x81)?;
        buf.write_u8(len as u8)
    } else {
        buf.write_u8(0x82)?;
        buf.write_u8((len >> 8) as u8)?;
        buf.write_u8(len as u8)
    }
}

#[derive(Debug, Clone)]
struct Asn1EncoderStackEntry {
    pos: usize,
}

#[derive(Debug, Clone)]
pub struct Encoder {
    buffer: Vec<u8>,
    stack: Vec<Asn1EncoderStackEntry>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn start_seq(&mut self, tag: u8) -> Result<()> {
        write_tag(&mut self.buffer, tag)?;
        self.stack.push(Asn1EncoderStackEntry {
            pos: self.buffer.len() - 1,
        });
        write_len(&mut self.buffer, 0)
    }

    pub fn fix(&mut self) {
        while !self.stack.is_empty() {
            self.end_seq()
        }
    }

    pub fn end_seq(&mut self) {
        let i = self.stack.pop();
        if let Some(a) = i {
            let s = self.buffer.len() - a.pos - 2;
            if s < 0x80 {
                self.buffer[a.pos + 1] = s as u8;
            } else if s <= 0xff {
                self.buffer[a.pos + 1] = 0x81;
                self.buffer.insert(a.pos + 2, s as u8);
            } else {
                self.buffer[a.pos + 1] = 0x82;
                self.buffer.insert(a.pos + 2, (s >> 8) as u8);
                self.buffer.insert(a.pos + 3, s as u8);
            }
        }
    }

    pub fn write_octet_string(&mut self, val: &[u8]) -> Result<()> {
        write_octet_string(&mut self.buffer, val)
    }

    pub fn write_string(&mut self, val: &str) -> Result<()> {
        write_string(&mut self.buffer, val)
    }

    pub fn write_string_with_tag(&mut self, tag: u8, val: &str) -> Result<()> {
        write_string_with_tag(&mut self.buffer, tag, val)
    }

    pub fn write_octet_string_with_tag(&mut self, tag: u8, val: &[u8]) -> Result<()> {
        write_octet_string_with_tag(&mut self.buffer, tag, val)
    }

    pub fn write_enum(&mut self, val: u8) -> Result<()> {
        write_enum(&mut self.buffer, val)
    }

    pub fn write_int(&mut self, val: u32) -> Result<()> {
        write_int(&mut self.buffer, val)
    }

    pub fn write_positive_integer(&mut self, bytes: &[u8]) -> Result<()> {
        write_positive_integer(&mut self.buffer, bytes)
    }

    pub fn write_bool(&mut self, val: bool) -> Result<()> {
        write_bool(&mut self.buffer, val)
    }

    pub fn write_null(&mut self) -> Result<()> {
        write_tag(&mut self.buffer, 0x5)?;
        write_len(&mut self.buffer, 0)
    }

    /// DER BIT STRING with a leading unused-bits count byte, long-form
    /// length included — needed for signature values, which can exceed the
    /// single-byte length range the other `write_*` helpers assume.
    pub fn write_bit_string(&mut self, unused_bits: u8, bits: &[u8]) -> Result<()> {
        write_tag(&mut self.buffer, 0x3)?;
        write_len_generic(&mut self.buffer, bits.len() + 1)?;
        self.buffer.write_u8(unused_bits)?;
        self.buffer.extend_from_slice(bits);
        Ok(())
    }

    pub fn write_oid(&mut self, val: &str) -> Result<()> {
        match const_oid::ObjectIdentifier::new(val) {
            Ok(o) => self.write_octet_string_with_tag(0x6, o.as_bytes()),
            Err(e) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("can't parse oid {val}: {e:?}"),
            )),
        }
    }

    /// Appends already-DER-encoded bytes verbatim (used to splice a parsed
    /// issuer Name straight through without re-encoding it).
    pub fn write_raw(&mut self, der: &[u8]) {
        self.buffer.extend_from_slice(der);
    }

    pub fn encode(mut self) -> Vec<u8> {
        self.fix();
        self.buffer
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_encoding() {
        let mut buf = Vec::new();
        write_int(&mut buf, 127).unwrap();
        assert_eq!(buf, vec![0x02, 0x01, 0x7f]);

        let mut buf = Vec::new();
        write_int(&mut buf, 128).unwrap();
        assert_eq!(buf, vec![0x02, 0x02, 0x0, 0x80]);

        let mut buf = Vec::new();
        write_int(&mut buf, 256).unwrap();
        assert_eq!(buf, vec![0x02, 0x02, 0x1, 0x0]);
    }

    #[test]
    fn bool_encoding() {
        let mut buf = Vec::new();
        write_bool(&mut buf, true).unwrap();
        assert_eq!(buf, vec![0x01, 0x01, 0xff]);
    }

    #[test]
    fn positive_integer_strips_leading_zeros() {
        let mut buf = Vec::new();
        write_positive_integer(&mut buf, &[0x00, 0x00, 0x01]).unwrap();
        assert_eq!(buf, vec![0x02, 0x01, 0x01]);
    }

    #[test]
    fn positive_integer_pads_high_bit() {
        let mut buf = Vec::new();
        write_positive_integer(&mut buf, &[0xff]).unwrap();
        assert_eq!(buf, vec![0x02, 0x02, 0x00, 0xff]);
    }

    #[test]
    fn positive_integer_long_form_length() {
        let bytes = vec![0xffu8; 200];
        let mut buf = Vec::new();
        write_positive_integer(&mut buf, &bytes).unwrap();
        assert_eq!(&buf[0..3], &[0x02, 0x81, 0xc9]);
        assert_eq!(buf.len(), 3 + 1 + 200);
    }

    #[test]
    fn start_end_seq_backpatches_length() {
        let mut enc = Encoder::new();
        enc.start_seq(0x30).unwrap();
        enc.write_int(5).unwrap();
        enc.end_seq();
        let out = enc.encode();
        assert_eq!(out, vec![0x30, 0x03, 0x02, 0x01, 0x05]);
    }

    #[test]
    fn oid_roundtrip_length() {
        let mut enc = Encoder::new();
        enc.write_oid("1.2.840.10045.4.3.2").unwrap();
        let out = enc.encode();
        assert_eq!(out[0], 0x6);
    }
}
