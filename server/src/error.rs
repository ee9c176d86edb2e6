use std::io;

use failure::Fail;

#[derive(Debug, Fail)]
pub enum ServerError {
    #[fail(display = "io error: {}", _0)]
    Io(#[cause] io::Error),
    #[fail(display = "--sessions must be in [{}, {}], got {}", min, max, got)]
    SessionsOutOfRange { min: u32, max: u32, got: u32 },
    #[fail(display = "invalid listen address: {}", _0)]
    BadAddress(#[cause] dcache_proto::AddressParseError),
    #[fail(display = "privilege drop failed: {}", _0)]
    PrivilegeDrop(String),
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}
