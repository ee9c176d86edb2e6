//! Ties the accepted-client set, the upstream connection, and the multiplex
//! table together into a single per-tick driver. Grounded in `sclient.c`'s
//! `main` loop ordering: accept, then `clients_io`, then `server_io`, then
//! `multiplexer_run` (itself `server_to_clients` followed by
//! `clients_to_server`).

use dcache_proto::{Address, AnyStream};
use slog::Logger;

use crate::downstream::Downstream;
use crate::table::Table;
use crate::upstream::Upstream;

pub struct Multiplexer {
    downstream: Downstream,
    upstream: Upstream,
    table: Table,
    idle_timeout_ms: u64,
}

impl Multiplexer {
    pub fn new(server_addr: Address, retry_ms: u64, idle_timeout_ms: u64, log: Logger) -> Self {
        Multiplexer {
            downstream: Downstream::new(log.new(slog::o!("component" => "downstream"))),
            upstream: Upstream::new(server_addr, retry_ms, log.new(slog::o!("component" => "upstream"))),
            table: Table::new(),
            idle_timeout_ms,
        }
    }

    pub fn accept(&mut self, stream: AnyStream) -> bool {
        self.downstream.new_client(stream)
    }

    pub fn num_clients(&self) -> usize {
        self.downstream.len()
    }

    /// One full scheduling pass: reconnect upstream if due, pump both sides'
    /// I/O, drain upstream responses back to their waiting clients
    /// (`server_to_clients`), then forward newly ready client requests
    /// upstream (`clients_to_server`).
    pub async fn tick(&mut self) {
        let now = std::time::Instant::now();
        self.upstream.maybe_reconnect(now).await;

        self.downstream.io_tick(&mut self.table, self.idle_timeout_ms).await;
        let orphaned = self.upstream.io_tick(&mut self.table).await;
        for c_uid in orphaned {
            self.downstream.digest_error(c_uid);
        }

        for (m_uid, _cmd, data) in self.upstream.drain_responses() {
            if let Some(c_uid) = self.table.finish(m_uid) {
                self.downstream.digest_response(c_uid, &data);
            }
        }

        self.downstream.forward_to_server(&mut self.upstream, &mut self.table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn fresh_multiplexer_has_no_clients() {
        let addr: Address = "IP:127.0.0.1:4433".parse().unwrap();
        let m = Multiplexer::new(addr, 1000, 0, test_log());
        assert_eq!(m.num_clients(), 0);
    }
}
