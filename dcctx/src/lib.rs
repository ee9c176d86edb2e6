//! Synchronous client shim for TLS session-cache callbacks: the Rust
//! counterpart of `libdistcache`'s `DC_CTX`. Built on
//! [`dcache_proto::Plug`] via a small blocking adapter (an owned
//! [`tokio::runtime::Runtime`] driven with `block_on`), since a TLS
//! library's session-cache callback ABI is inherently synchronous
//! call/return rather than task-based.

mod ctx;
mod error;
mod transact;

pub use ctx::{Ctx, PERSISTENT, PERSISTENT_LATE, PERSISTENT_PIDCHECK, PERSISTENT_RETRY};
pub use error::ClientError;
