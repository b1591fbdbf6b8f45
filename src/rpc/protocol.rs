//! Wire framing: a length-framed binary protocol carrying a method-name
//! string instead of the teacher's fixed `u8` opcode (`cas::protocol::
//! CasCommand`), since spec.md section 4.7 leaves the method set open.
//! Bit-exact compatibility with any existing format is explicitly not
//! required (spec.md section 6) — only the frame shape and the method
//! semantics are a public contract.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("unknown method: {0}")]
    UnknownMethod(String),
}

impl RpcError {
    pub fn kind(&self) -> crate::error::ErrorKind {
        match self {
            RpcError::Io(e) => match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => crate::error::ErrorKind::Transient,
                _ => crate::error::ErrorKind::Fatal,
            },
            RpcError::Malformed(_) | RpcError::UnknownMethod(_) => crate::error::ErrorKind::Corrupt,
            RpcError::Store(e) => e.kind(),
            RpcError::Encode(_) => crate::error::ErrorKind::Corrupt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameKind {
    Request = 0,
    ChunkResponse = 1,
    FinalResponse = 2,
    Error = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = RpcError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0 => Ok(FrameKind::Request),
            1 => Ok(FrameKind::ChunkResponse),
            2 => Ok(FrameKind::FinalResponse),
            3 => Ok(FrameKind::Error),
            other => Err(RpcError::Malformed(format!("unknown frame kind {other}"))),
        }
    }
}

/// A decoded frame off the wire.
#[derive(Debug, Clone)]
pub enum Frame {
    Request {
        request_id: u32,
        method: String,
        args: Vec<u8>,
    },
    ChunkResponse {
        request_id: u32,
        payload: Vec<u8>,
    },
    FinalResponse {
        request_id: u32,
        payload: Vec<u8>,
    },
    Error {
        request_id: u32,
        code: u8,
        message: String,
    },
}

impl Frame {
    pub fn request_id(&self) -> u32 {
        match self {
            Frame::Request { request_id, .. }
            | Frame::ChunkResponse { request_id, .. }
            | Frame::FinalResponse { request_id, .. }
            | Frame::Error { request_id, .. } => *request_id,
        }
    }
}

fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> Result<(), RpcError> {
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>, RpcError> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    const MAX_FRAME: usize = 256 * 1024 * 1024;
    if len > MAX_FRAME {
        return Err(RpcError::Malformed(format!("frame length {len} exceeds max")));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_string(w: &mut impl Write, s: &str) -> Result<(), RpcError> {
    write_bytes(w, s.as_bytes())
}

fn read_string(r: &mut impl Read) -> Result<String, RpcError> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| RpcError::Malformed(e.to_string()))
}

pub fn write_frame(w: &mut impl Write, frame: &Frame) -> Result<(), RpcError> {
    match frame {
        Frame::Request { request_id, method, args } => {
            w.write_u8(FrameKind::Request as u8)?;
            w.write_u32::<LittleEndian>(*request_id)?;
            write_string(w, method)?;
            write_bytes(w, args)?;
        }
        Frame::ChunkResponse { request_id, payload } => {
            w.write_u8(FrameKind::ChunkResponse as u8)?;
            w.write_u32::<LittleEndian>(*request_id)?;
            write_bytes(w, payload)?;
        }
        Frame::FinalResponse { request_id, payload } => {
            w.write_u8(FrameKind::FinalResponse as u8)?;
            w.write_u32::<LittleEndian>(*request_id)?;
            write_bytes(w, payload)?;
        }
        Frame::Error { request_id, code, message } => {
            w.write_u8(FrameKind::Error as u8)?;
            w.write_u32::<LittleEndian>(*request_id)?;
            w.write_u8(*code)?;
            write_string(w, message)?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn read_frame(r: &mut impl Read) -> Result<Frame, RpcError> {
    let kind = FrameKind::try_from(r.read_u8()?)?;
    let request_id = r.read_u32::<LittleEndian>()?;
    match kind {
        FrameKind::Request => {
            let method = read_string(r)?;
            let args = read_bytes(r)?;
            Ok(Frame::Request { request_id, method, args })
        }
        FrameKind::ChunkResponse => Ok(Frame::ChunkResponse {
            request_id,
            payload: read_bytes(r)?,
        }),
        FrameKind::FinalResponse => Ok(Frame::FinalResponse {
            request_id,
            payload: read_bytes(r)?,
        }),
        FrameKind::Error => {
            let code = r.read_u8()?;
            let message = read_string(r)?;
            Ok(Frame::Error { request_id, code, message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_frame_round_trips() {
        let frame = Frame::Request {
            request_id: 7,
            method: "get".to_string(),
            args: vec![1, 2, 3],
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).unwrap();
        match decoded {
            Frame::Request { request_id, method, args } => {
                assert_eq!(request_id, 7);
                assert_eq!(method, "get");
                assert_eq!(args, vec![1, 2, 3]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn error_frame_round_trips() {
        let frame = Frame::Error {
            request_id: 1,
            code: 2,
            message: "key not found".to_string(),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).unwrap();
        assert_eq!(decoded.request_id(), 1);
    }
}
