//! Binds a [`dcache_proto::AnyListener`] and logs each accepted connection.

use std::io;

use dcache_proto::{Address, AnyListener, AnyStream};
use slog::Logger;

pub struct Listener {
    inner: AnyListener,
    log: Logger,
}

impl Listener {
    pub async fn bind(addr: &Address, log: Logger) -> io::Result<Self> {
        let inner = AnyListener::bind(addr).await?;
        slog::info!(log, "listening"; "addr" => %addr);
        Ok(Listener { inner, log })
    }

    pub async fn accept(&self) -> io::Result<AnyStream> {
        let stream = self.inner.accept().await?;
        slog::debug!(self.log, "accepted connection";
            "proto_level" => format!("{:#010x}", dcache_proto::frame::proto_level()));
        Ok(stream)
    }
}
