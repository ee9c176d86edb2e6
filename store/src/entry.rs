//! A single cached session: the blob plus its absolute expiry.

use std::time::Instant;

/// One `(session_id, blob, absolute_expiry)` record.
#[derive(Debug, Clone)]
pub struct Entry {
    pub expiry: Instant,
    pub session_id: Vec<u8>,
    pub blob: Vec<u8>,
}
