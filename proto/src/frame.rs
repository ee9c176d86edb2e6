//! Single wire-level fragment of a logical request or response.

use crate::coding::{Cursor, Encoder};
use crate::error::ProtocolError;

/// Max payload bytes carried by one frame.
pub const MSG_MAX_DATA: u16 = 2048;
/// Max fragments per logical command.
pub const MAX_MSGS: usize = 16;
/// Max aggregate payload across a whole logical command.
pub const MAX_TOTAL_DATA: usize = MSG_MAX_DATA as usize * MAX_MSGS;
/// Max session-id length.
pub const MAX_ID_LEN: usize = 64;
/// Max session-blob length.
pub const MAX_DATA_LEN: usize = 32768;
/// Floor on `data_len` for any non-final fragment (the "trickle guard").
pub const MIN_INCOMPLETE_PAYLOAD: u16 = 1024;
/// Max requested session expiry, in milliseconds (7 days).
pub const MAX_EXPIRY_MS: u64 = 604_800_000;
/// Floor on a client-requested session timeout, in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 500;

/// Fixed header size in bytes, not counting the payload.
const HEADER_LEN: usize = 10;

/// `proto_level`'s version/patch words, retained as a diagnostic hook only.
/// No byte of it appears in the on-wire frame layout below.
pub const PROTO_VER: u8 = 0x11;
pub const PATCH_LEVEL: u8 = 0x00;

pub fn proto_level() -> u32 {
    (u32::from(PROTO_VER) << 16) | u32::from(PATCH_LEVEL)
}

/// The only defined `op_class`.
pub const CLASS_USER: u8 = 0;

/// Cache operations, valid only under `CLASS_USER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add = 0,
    Get = 1,
    Remove = 2,
    Have = 3,
}

impl Operation {
    pub(crate) fn from_raw(op_class: u8, operation: u8) -> Option<Self> {
        if op_class != CLASS_USER {
            return None;
        }
        match operation {
            0 => Some(Operation::Add),
            1 => Some(Operation::Get),
            2 => Some(Operation::Remove),
            3 => Some(Operation::Have),
            _ => None,
        }
    }

    pub(crate) fn raw(self) -> u8 {
        self as u8
    }
}

/// Outcome of inspecting a buffer prefix for a well-formed frame header,
/// without committing to a full decode.
#[derive(Debug, PartialEq, Eq)]
pub enum PreDecode {
    /// The whole frame (header + payload) is present and well-formed; value
    /// is its total on-wire size.
    Ok(usize),
    /// Not enough bytes yet to know; try again once more has arrived.
    Incomplete,
}

/// A single frame: one fragment of a logical request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub is_response: bool,
    pub request_uid: u32,
    pub op_class: u8,
    pub operation: u8,
    pub complete: bool,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn cmd(&self) -> Option<Operation> {
        Operation::from_raw(self.op_class, self.operation)
    }

    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Encodes into `out`, appending. Fails if `data.len() > MSG_MAX_DATA`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<usize, ProtocolError> {
        if self.data.len() > MSG_MAX_DATA as usize {
            return Err(ProtocolError::BufferTooSmall);
        }
        let start = out.len();
        let mut enc = Encoder::new(out);
        enc.encode_u8(self.is_response as u8);
        enc.encode_u32(self.request_uid);
        enc.encode_u8(self.op_class);
        enc.encode_u8(self.operation);
        enc.encode_u8(self.complete as u8);
        enc.encode_u16(self.data.len() as u16);
        enc.encode_bytes(&self.data);
        Ok(out.len() - start)
    }

    /// Validates header-visible fields and reports whether the complete
    /// frame is present, before a full `decode`. Mirrors the original
    /// encoder's deliberately early, byte-by-byte validation order so that
    /// corruption is caught as soon as the offending field is reached
    /// rather than only once the whole frame has arrived.
    pub fn pre_decode(buf: &[u8]) -> Result<PreDecode, ProtocolError> {
        let mut cur = Cursor::new(buf);

        let is_response = match cur.decode_u8() {
            Some(v) => v,
            None => return Ok(PreDecode::Incomplete),
        };
        if is_response > 1 {
            return Err(ProtocolError::Corrupt("is_response out of range"));
        }

        if cur.decode_u32().is_none() {
            return Ok(PreDecode::Incomplete);
        }

        let op_class = match cur.decode_u8() {
            Some(v) => v,
            None => return Ok(PreDecode::Incomplete),
        };
        if op_class > CLASS_USER {
            return Err(ProtocolError::Corrupt("op_class out of range"));
        }

        let operation = match cur.decode_u8() {
            Some(v) => v,
            None => return Ok(PreDecode::Incomplete),
        };
        if Operation::from_raw(op_class, operation).is_none() {
            return Err(ProtocolError::UnknownCommand { op_class, operation });
        }

        let complete = match cur.decode_u8() {
            Some(v) => v,
            None => return Ok(PreDecode::Incomplete),
        };
        if complete > 1 {
            return Err(ProtocolError::Corrupt("complete out of range"));
        }

        let data_len = match cur.decode_u16() {
            Some(v) => v,
            None => return Ok(PreDecode::Incomplete),
        };
        if data_len > MSG_MAX_DATA {
            return Err(ProtocolError::Corrupt("data_len exceeds MSG_MAX_DATA"));
        }
        if complete == 0 && data_len < MIN_INCOMPLETE_PAYLOAD {
            return Err(ProtocolError::TrickleViolation {
                got: data_len,
                min: MIN_INCOMPLETE_PAYLOAD,
            });
        }

        if cur.decode_bytes(data_len as usize).is_none() {
            return Ok(PreDecode::Incomplete);
        }

        Ok(PreDecode::Ok(HEADER_LEN + data_len as usize))
    }

    /// Decodes a frame already validated by `pre_decode` returning `Ok`.
    /// Returns the frame and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> (Self, usize) {
        let mut cur = Cursor::new(buf);
        let is_response = cur.decode_u8().expect("pre_decode validated this") != 0;
        let request_uid = cur.decode_u32().expect("pre_decode validated this");
        let op_class = cur.decode_u8().expect("pre_decode validated this");
        let operation = cur.decode_u8().expect("pre_decode validated this");
        let complete = cur.decode_u8().expect("pre_decode validated this") != 0;
        let data_len = cur.decode_u16().expect("pre_decode validated this");
        let data = cur
            .decode_bytes(data_len as usize)
            .expect("pre_decode validated this")
            .to_vec();
        let consumed = HEADER_LEN + data_len as usize;
        (
            Frame {
                is_response,
                request_uid,
                op_class,
                operation,
                complete,
                data,
            },
            consumed,
        )
    }

    /// Stamps a fresh, empty response frame for `request`. Fails if
    /// `request` is itself a response.
    pub fn start_response(request: &Frame) -> Result<Frame, ProtocolError> {
        if request.is_response {
            return Err(ProtocolError::Corrupt("cannot respond to a response"));
        }
        Ok(Frame {
            is_response: true,
            request_uid: request.request_uid,
            op_class: request.op_class,
            operation: request.operation,
            complete: true,
            data: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame {
            is_response: false,
            request_uid: 42,
            op_class: CLASS_USER,
            operation: Operation::Get.raw(),
            complete: true,
            data: b"abc".to_vec(),
        }
    }

    #[test]
    fn frame_round_trip() {
        let f = sample();
        let mut buf = Vec::new();
        let written = f.encode(&mut buf).unwrap();
        assert_eq!(written, f.encoded_size());
        match Frame::pre_decode(&buf).unwrap() {
            PreDecode::Ok(sz) => assert_eq!(sz, written),
            other => panic!("expected Ok, got {:?}", other),
        }
        let (decoded, consumed) = Frame::decode(&buf);
        assert_eq!(consumed, written);
        assert_eq!(decoded, f);
    }

    #[test]
    fn pre_decode_reports_incomplete_on_truncation() {
        let f = sample();
        let mut buf = Vec::new();
        f.encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert_eq!(Frame::pre_decode(&buf).unwrap(), PreDecode::Incomplete);
    }

    #[test]
    fn trickle_guard_rejects_small_incomplete_frame() {
        let f = Frame {
            is_response: false,
            request_uid: 1,
            op_class: CLASS_USER,
            operation: Operation::Add.raw(),
            complete: false,
            data: vec![0u8; 512],
        };
        let mut buf = Vec::new();
        f.encode(&mut buf).unwrap();
        let err = Frame::pre_decode(&buf).unwrap_err();
        match err {
            ProtocolError::TrickleViolation { got, min } => {
                assert_eq!(got, 512);
                assert_eq!(min, MIN_INCOMPLETE_PAYLOAD);
            }
            other => panic!("expected TrickleViolation, got {:?}", other),
        }
    }

    #[test]
    fn unknown_operation_is_corrupt() {
        let f = Frame {
            is_response: false,
            request_uid: 1,
            op_class: CLASS_USER,
            operation: 99,
            complete: true,
            data: Vec::new(),
        };
        let mut buf = Vec::new();
        f.encode(&mut buf).unwrap();
        assert!(matches!(
            Frame::pre_decode(&buf),
            Err(ProtocolError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn start_response_stamps_fields_and_rejects_responses() {
        let req = sample();
        let resp = Frame::start_response(&req).unwrap();
        assert!(resp.is_response);
        assert_eq!(resp.request_uid, req.request_uid);
        assert_eq!(resp.op_class, req.op_class);
        assert_eq!(resp.operation, req.operation);
        assert!(resp.complete);
        assert!(resp.data.is_empty());

        assert!(Frame::start_response(&resp).is_err());
    }

    #[test]
    fn concatenated_frames_each_consume_exactly_their_own_size() {
        let a = sample();
        let mut b = sample();
        b.request_uid = 43;
        let mut buf = Vec::new();
        a.encode(&mut buf).unwrap();
        a.encode(&mut buf).unwrap();
        b.encode(&mut buf).unwrap();

        let mut offset = 0;
        let mut seen = Vec::new();
        while offset < buf.len() {
            match Frame::pre_decode(&buf[offset..]).unwrap() {
                PreDecode::Ok(sz) => {
                    let (f, consumed) = Frame::decode(&buf[offset..]);
                    assert_eq!(sz, consumed);
                    seen.push(f);
                    offset += consumed;
                }
                PreDecode::Incomplete => panic!("unexpected incomplete"),
            }
        }
        assert_eq!(seen, vec![a.clone(), a, b]);
    }
}
