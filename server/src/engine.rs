//! Owns the cache store and every connected client's plug, and drives one
//! non-blocking pass over all of them per tick. Mirrors `dc_server.c`'s
//! `DC_SERVER_process` loop, but with each connection's I/O already reduced
//! to the plug's own single-attempt `io()` rather than a `select`/`poll`
//! call per connection.

use std::time::Instant;

use dcache_proto::AnyStream;
use dcache_store::CacheStore;
use slab::Slab;
use slog::Logger;

use crate::client::Client;
use crate::dispatch;

pub struct Engine {
    log: Logger,
    store: CacheStore,
    clients: Slab<Client>,
    operations: u64,
}

impl Engine {
    pub fn new(max_sessions: usize, log: Logger) -> Self {
        let store_log = log.new(slog::o!("component" => "store"));
        Engine {
            log,
            store: CacheStore::new(max_sessions, store_log),
            clients: Slab::new(),
            operations: 0,
        }
    }

    /// Registers a freshly accepted connection as a server-side plug
    /// (`flags = 0`: reads requests, writes responses).
    pub fn accept(&mut self, stream: AnyStream) -> usize {
        let client_log = self.log.new(slog::o!("component" => "client"));
        let plug = dcache_proto::Plug::new(stream, 0, client_log);
        self.clients.insert(Client::new(plug))
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    /// One non-blocking pass: pump I/O on every connection, dispatch every
    /// fully-reassembled request found, and drop any connection whose plug
    /// reports a protocol or transport error.
    pub async fn tick(&mut self) {
        let now = Instant::now();
        let mut dead = Vec::new();

        for (key, client) in self.clients.iter_mut() {
            if let Err(e) = client.plug.io().await {
                slog::warn!(self.log, "connection torn down"; "error" => %e);
                dead.push(key);
                continue;
            }

            loop {
                let (uid, cmd, payload) = match client.plug.read(false) {
                    Some((uid, cmd, payload)) => (uid, cmd, payload.to_vec()),
                    None => break,
                };

                let response = dispatch::dispatch(&mut self.store, now, cmd, &payload);
                self.operations += 1;

                let wrote = client
                    .plug
                    .write(false, uid, cmd, &response)
                    .and_then(|_| client.plug.commit())
                    .and_then(|_| client.plug.consume());
                if let Err(e) = wrote {
                    slog::warn!(self.log, "failed to frame response"; "error" => %e);
                    dead.push(key);
                    break;
                }
            }
        }

        for key in dead {
            self.clients.remove(key);
        }
    }

    /// `DC_SERVER_items_stored`: number of live (non-expired) sessions.
    pub fn items_stored(&mut self, now: Instant) -> usize {
        self.store.num_items(now)
    }

    /// Logs and resets the operations counter, driven by `--progress <n>`.
    pub fn log_progress(&mut self) {
        let now = Instant::now();
        let items = self.items_stored(now);
        slog::info!(self.log, "progress";
            "items_stored" => items,
            "num_operations" => self.operations,
            "clients" => self.clients.len());
        self.operations = 0;
    }
}
