//! Thin glue from a parsed [`Address`] to a concrete Tokio byte stream.
//!
//! The original C tree leaves connect/accept/read/write/readiness to
//! `libnal`'s `NAL_CONNECTION`/`NAL_LISTENER`. Here that collaborator is
//! simply `tokio::net`; this module only bridges the `IP:`/`UNIX:` address
//! grammar to the right concrete type so callers can stay generic over
//! `AsyncRead + AsyncWrite` everywhere else (`Plug<S>`).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::addr::Address;

/// Either half of a TCP or UNIX-domain connection, unified behind one
/// `AsyncRead + AsyncWrite` type so a `Plug` never has to care which kind of
/// listener accepted it.
pub enum AnyStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for AnyStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context, buf: &mut ReadBuf) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AnyStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            AnyStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AnyStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AnyStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            AnyStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AnyStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            AnyStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AnyStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            AnyStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Either kind of listener, bound from a parsed [`Address`].
pub enum AnyListener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl AnyListener {
    pub async fn bind(addr: &Address) -> io::Result<Self> {
        match addr {
            Address::Tcp(sa) => Ok(AnyListener::Tcp(TcpListener::bind(sa).await?)),
            Address::Unix(path) => {
                let _ = std::fs::remove_file(path);
                Ok(AnyListener::Unix(UnixListener::bind(path)?))
            }
        }
    }

    pub async fn accept(&self) -> io::Result<AnyStream> {
        match self {
            AnyListener::Tcp(l) => Ok(AnyStream::Tcp(l.accept().await?.0)),
            AnyListener::Unix(l) => Ok(AnyStream::Unix(l.accept().await?.0)),
        }
    }
}

/// Connects to `addr`, producing the matching stream variant.
pub async fn connect(addr: &Address) -> io::Result<AnyStream> {
    match addr {
        Address::Tcp(sa) => Ok(AnyStream::Tcp(TcpStream::connect(sa).await?)),
        Address::Unix(path) => Ok(AnyStream::Unix(UnixStream::connect(path).await?)),
    }
}
