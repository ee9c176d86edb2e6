//! The single upstream cache-server connection: reconnect/retry, and
//! translating multiplex ids to/from wire `request_uid`s. Grounded in
//! `sessclient/server.c`'s `server_t`.

use std::time::{Duration, Instant};

use dcache_proto::frame::Operation;
use dcache_proto::{Address, AnyStream, Plug, TO_SERVER};
use slog::Logger;

use crate::table::Table;

pub struct Upstream {
    log: Logger,
    addr: Address,
    uid: u64,
    uid_seed: u64,
    plug: Option<Plug<AnyStream>>,
    last_fail: Instant,
    retry_ms: u64,
}

impl Upstream {
    /// `last_fail` is backdated so the very first tick attempts a connect
    /// immediately, mirroring `server_new`'s `SYS_timesub(..., retry_msecs + 1)`.
    pub fn new(addr: Address, retry_ms: u64, log: Logger) -> Self {
        let last_fail = Instant::now()
            .checked_sub(Duration::from_millis(retry_ms + 1))
            .unwrap_or_else(Instant::now);
        Upstream {
            log,
            addr,
            uid: 0,
            uid_seed: 1,
            plug: None,
            last_fail,
            retry_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.plug.is_some()
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    fn next_uid(&mut self) -> u64 {
        let uid = self.uid_seed;
        self.uid_seed = self.uid_seed.wrapping_add(1);
        if self.uid_seed == 0 {
            self.uid_seed = 1;
        }
        uid
    }

    /// Attempts a reconnect if the retry period has elapsed since the last
    /// failure and no connection is currently active.
    pub async fn maybe_reconnect(&mut self, now: Instant) {
        if self.plug.is_some() {
            return;
        }
        if now.duration_since(self.last_fail).as_millis() < self.retry_ms as u128 {
            return;
        }
        self.last_fail = now;
        match dcache_proto::connect(&self.addr).await {
            Ok(stream) => {
                self.uid = self.next_uid();
                self.plug = Some(Plug::new(stream, TO_SERVER, self.log.clone()));
                slog::info!(self.log, "connected to upstream"; "uid" => self.uid);
            }
            Err(e) => {
                slog::warn!(self.log, "upstream reconnect failed"; "error" => %e);
            }
        }
    }

    /// Pumps the plug's I/O. If it dies, tears the connection down and
    /// returns the client uids the table had in flight against it, so the
    /// caller can synthesize `ERR_DISCONNECTED` responses for them.
    pub async fn io_tick(&mut self, table: &mut Table) -> Vec<u64> {
        let died = match self.plug.as_mut() {
            Some(plug) => plug.io().await.is_err(),
            None => return Vec::new(),
        };
        if died {
            slog::warn!(self.log, "upstream connection lost"; "uid" => self.uid);
            self.plug = None;
            self.last_fail = Instant::now();
            return table.mark_dead_server(self.uid);
        }
        Vec::new()
    }

    /// Forwards a client's request upstream under `m_uid`, rolling back on
    /// a framing failure rather than leaving the write half stuck mid-write.
    pub fn place_request(&mut self, m_uid: u32, cmd: Operation, data: &[u8]) -> bool {
        let Some(plug) = self.plug.as_mut() else {
            return false;
        };
        if plug.write(false, m_uid, cmd, data).is_err() {
            return false;
        }
        if plug.commit().is_err() {
            let _ = plug.rollback();
            return false;
        }
        true
    }

    /// Drains every fully-reassembled response currently buffered.
    pub fn drain_responses(&mut self) -> Vec<(u32, Operation, Vec<u8>)> {
        let mut out = Vec::new();
        let Some(plug) = self.plug.as_mut() else {
            return out;
        };
        while let Some((uid, cmd, data)) = plug.read(false) {
            out.push((uid, cmd, data.to_vec()));
            if plug.consume().is_err() {
                break;
            }
        }
        out
    }
}
