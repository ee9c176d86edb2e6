use std::io;

use failure::Fail;

/// Wire-level violations: bad framing, out-of-range fields, or a command
/// that breaks the at-most-one-in-flight contract of a plug direction.
#[derive(Debug, Fail)]
pub enum ProtocolError {
    #[fail(display = "frame failed validation: {}", _0)]
    Corrupt(&'static str),
    #[fail(display = "non-final frame carried {} bytes, below the {} trickle floor", got, min)]
    TrickleViolation { got: u16, min: u16 },
    #[fail(display = "command payload would reach {} bytes, above the {} aggregate bound", got, max)]
    AggregateOverflow { got: usize, max: usize },
    #[fail(display = "frame direction did not match this plug's role")]
    DirectionMismatch,
    #[fail(display = "unrecognized (op_class={}, operation={}) pair", op_class, operation)]
    UnknownCommand { op_class: u8, operation: u8 },
    #[fail(display = "output buffer too small to hold the encoded frame")]
    BufferTooSmall,
    #[fail(display = "plug is not in a state that permits this call")]
    WrongState,
    #[fail(display = "underlying transport failed: {}", _0)]
    Io(#[cause] io::Error),
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        ProtocolError::Io(e)
    }
}
