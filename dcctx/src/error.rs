use std::io;

use failure::Fail;

/// Failure modes visible to a caller of [`crate::ctx::Ctx`]'s operations.
#[derive(Debug, Fail)]
pub enum ClientError {
    #[fail(display = "transport error: {}", _0)]
    Transport(#[cause] io::Error),
    /// The response's `(request_uid, operation)` didn't match the request
    /// just sent.
    #[fail(display = "response did not match the outstanding request")]
    ProtocolMismatch,
    /// A non-`ERR_OK` one-byte status response, for operations that never
    /// carry a body (`add`, `remove`, `have`).
    #[fail(display = "server returned status {}", _0)]
    Status(u8),
    #[fail(display = "invalid target address: {}", _0)]
    Address(#[cause] dcache_proto::AddressParseError),
    #[fail(display = "session id must be 1..={} bytes, got {}", max, got)]
    InvalidId { got: usize, max: usize },
    #[fail(display = "session blob must be 1..={} bytes, got {}", max, got)]
    InvalidBlob { got: usize, max: usize },
    #[fail(display = "timeout_ms must be >= {}, got {}", min, got)]
    TimeoutTooLow { got: u64, min: u64 },
    /// `reget` called with no matching prior successful `get` to replay.
    /// Either no `get` has happened yet, a non-`get` operation ran since, or
    /// the id doesn't match the cached one.
    #[fail(display = "no prior `get` available to replay for this id")]
    NoPriorGet,
    #[fail(display = "failed to start the internal blocking-adapter runtime: {}", _0)]
    RuntimeInit(#[cause] io::Error),
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Transport(e)
    }
}

impl From<dcache_proto::ProtocolError> for ClientError {
    fn from(e: dcache_proto::ProtocolError) -> Self {
        ClientError::Transport(io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

impl From<dcache_proto::AddressParseError> for ClientError {
    fn from(e: dcache_proto::AddressParseError) -> Self {
        ClientError::Address(e)
    }
}
