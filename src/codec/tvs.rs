//! TVS frame header:
//! `protocol_id(u8)=87 | version(u8)=1 | command(u8) | reserved(u8)=0 | session_id(u32 BE) | body_length(u16 BE)`.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{IoError, ProtocolError};

pub const PROTOCOL_ID: u8 = 87;
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 10;

pub struct Frame {
    pub command: u8,
    pub session_id: u32,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn encode(command: u8, session_id: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(PROTOCOL_ID);
        out.push(VERSION);
        out.push(command);
        out.push(0);
        out.write_u32::<BigEndian>(session_id).unwrap();
        out.write_u16::<BigEndian>(body.len() as u16).unwrap();
        out.extend_from_slice(body);
        out
    }

    pub fn write(stream: &mut impl Write, command: u8, session_id: u32, body: &[u8]) -> Result<(), IoError> {
        let frame = Self::encode(command, session_id, body);
        stream.write_all(&frame)?;
        Ok(())
    }

    pub fn read(stream: &mut impl Read) -> Result<Self, IoError> {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).map_err(map_read_err)?;
        let protocol_id = header[0];
        let version = header[1];
        let command = header[2];
        let session_id = (&header[4..8]).read_u32::<BigEndian>().unwrap();
        let body_len = (&header[8..10]).read_u16::<BigEndian>().unwrap() as usize;
        if protocol_id != PROTOCOL_ID {
            return Err(IoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                ProtocolError::BadProtocolId {
                    expected: PROTOCOL_ID,
                    got: protocol_id,
                },
            )));
        }
        if version != VERSION {
            return Err(IoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                ProtocolError::VersionMismatch {
                    expected: VERSION,
                    got: version,
                },
            )));
        }
        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).map_err(map_read_err)?;
        Ok(Self {
            command,
            session_id,
            body,
        })
    }
}

fn map_read_err(e: std::io::Error) -> IoError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => IoError::Timeout,
        std::io::ErrorKind::UnexpectedEof => IoError::Closed,
        _ => IoError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrip() {
        let wire = Frame::encode(1, 7, &[9, 9]);
        let mut cur = Cursor::new(wire);
        let frame = Frame::read(&mut cur).unwrap();
        assert_eq!(frame.command, 1);
        assert_eq!(frame.session_id, 7);
        assert_eq!(frame.body, vec![9, 9]);
    }
}
