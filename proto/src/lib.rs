//! Wire protocol, framing, and plug abstraction for the distributed session
//! cache: the byte codec, the `Frame` type, and the `Plug` half-duplex
//! fragmentation/reassembly pipe, plus the shared address grammar used by
//! both binaries' CLIs.

pub mod addr;
pub mod coding;
pub mod error;
pub mod frame;
pub mod plug;
pub mod transport;

pub use addr::{Address, AddressParseError};
pub use error::ProtocolError;
pub use frame::{
    Frame, Operation, PreDecode, CLASS_USER, MAX_DATA_LEN, MAX_EXPIRY_MS, MAX_ID_LEN,
    MAX_TOTAL_DATA, MIN_INCOMPLETE_PAYLOAD, MIN_TIMEOUT_MS, MSG_MAX_DATA, PATCH_LEVEL, PROTO_VER,
};
pub use plug::{Plug, NOFREE_CONN, TO_SERVER};
pub use transport::{connect, AnyListener, AnyStream};

/// Cache capacity bounds (`DC_CACHE_MIN_SIZE`/`DC_CACHE_MAX_SIZE`), shared by
/// the server's `--sessions` CLI validation and the store crate.
pub const CACHE_MIN_SIZE: u32 = 64;
pub const CACHE_MAX_SIZE: u32 = 60_000;
