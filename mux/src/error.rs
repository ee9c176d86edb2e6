use std::io;

use failure::Fail;

#[derive(Debug, Fail)]
pub enum MuxError {
    #[fail(display = "io error: {}", _0)]
    Io(#[cause] io::Error),
    #[fail(display = "--retry must be in [{}, {}] ms, got {}", min, max, got)]
    RetryOutOfRange { min: u64, max: u64, got: u64 },
    #[fail(display = "--idle must be in [{}, {}] ms, got {}", min, max, got)]
    IdleOutOfRange { min: u64, max: u64, got: u64 },
    #[fail(display = "privilege drop failed: {}", _0)]
    PrivilegeDrop(String),
}

impl From<io::Error> for MuxError {
    fn from(e: io::Error) -> Self {
        MuxError::Io(e)
    }
}
