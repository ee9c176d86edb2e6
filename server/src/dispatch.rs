//! Per-command dispatch: decodes a request payload, calls into the cache
//! store, and produces the response payload. Mirrors `dc_server.c`'s
//! `int_do_op_add`/`_get`/`_remove`/`_have`, including the exact validation
//! order `int_do_op_add` uses (timeout range, then corrupt, then id range,
//! then data range) before the store is ever consulted.

use std::time::Instant;

use dcache_proto::frame::Operation;
use dcache_store::{CacheError, CacheStore};

/// One-byte response codes.
pub const ERR_OK: u8 = 0;
pub const ERR_NOTOK: u8 = 1;
/// Multiplexer-synthesized only; a cache server itself never emits this.
pub const ERR_DISCONNECTED: u8 = 2;

pub const ADD_ERR_CORRUPT: u8 = 100;
pub const ADD_ERR_MATCHING_SESSION: u8 = 101;
pub const ADD_ERR_TIMEOUT_RANGE: u8 = 102;
pub const ADD_ERR_ID_RANGE: u8 = 103;
pub const ADD_ERR_DATA_RANGE: u8 = 104;

const MAX_EXPIRY_MS: u64 = dcache_store::MAX_EXPIRY_MS;
const MAX_ID_LEN: usize = dcache_proto::MAX_ID_LEN;
const MAX_DATA_LEN: usize = dcache_proto::MAX_DATA_LEN;

/// Runs `cmd` against `store` with request `payload`, returning the response
/// body to write back through the originating plug.
pub fn dispatch(store: &mut CacheStore, now: Instant, cmd: Operation, payload: &[u8]) -> Vec<u8> {
    match cmd {
        Operation::Add => do_add(store, now, payload),
        Operation::Get => do_get(store, now, payload),
        Operation::Remove => do_remove(store, now, payload),
        Operation::Have => do_have(store, now, payload),
    }
}

fn do_add(store: &mut CacheStore, now: Instant, payload: &[u8]) -> Vec<u8> {
    // `u32 timeout_ms | u32 id_len | id_bytes | blob_bytes`
    if payload.len() < 8 {
        return vec![ADD_ERR_CORRUPT];
    }
    let timeout_ms = u32::from_be_bytes(payload[0..4].try_into().unwrap()) as u64;
    let id_len = u32::from_be_bytes(payload[4..8].try_into().unwrap()) as usize;
    let rest = &payload[8..];

    if timeout_ms > MAX_EXPIRY_MS {
        return vec![ADD_ERR_TIMEOUT_RANGE];
    }
    if id_len >= rest.len() {
        return vec![ADD_ERR_CORRUPT];
    }
    if id_len == 0 || id_len > MAX_ID_LEN {
        return vec![ADD_ERR_ID_RANGE];
    }
    let data_len = rest.len() - id_len;
    if data_len == 0 || data_len > MAX_DATA_LEN {
        return vec![ADD_ERR_DATA_RANGE];
    }
    let id = &rest[..id_len];
    let blob = &rest[id_len..];

    match store.add(now, timeout_ms, id, blob) {
        Ok(()) => vec![ERR_OK],
        Err(CacheError::Duplicate) => vec![ADD_ERR_MATCHING_SESSION],
        Err(CacheError::RangeTimeout) => vec![ADD_ERR_TIMEOUT_RANGE],
        Err(CacheError::RangeId) => vec![ADD_ERR_ID_RANGE],
        Err(CacheError::RangeData) => vec![ADD_ERR_DATA_RANGE],
    }
}

fn do_get(store: &mut CacheStore, now: Instant, payload: &[u8]) -> Vec<u8> {
    let len = store.get(now, payload, None);
    if len == 0 {
        return vec![ERR_NOTOK];
    }
    let mut buf = vec![0u8; len];
    let got = store.get(now, payload, Some(&mut buf));
    debug_assert_eq!(got, len);
    buf
}

fn do_remove(store: &mut CacheStore, now: Instant, payload: &[u8]) -> Vec<u8> {
    if store.remove(now, payload) {
        vec![ERR_OK]
    } else {
        vec![ERR_NOTOK]
    }
}

fn do_have(store: &mut CacheStore, now: Instant, payload: &[u8]) -> Vec<u8> {
    if store.have(now, payload) {
        vec![ERR_OK]
    } else {
        vec![ERR_NOTOK]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Logger;

    fn store() -> CacheStore {
        CacheStore::new(64, Logger::root(slog::Discard, slog::o!()))
    }

    fn add_payload(timeout_ms: u32, id: &[u8], blob: &[u8]) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&timeout_ms.to_be_bytes());
        p.extend_from_slice(&(id.len() as u32).to_be_bytes());
        p.extend_from_slice(id);
        p.extend_from_slice(blob);
        p
    }

    #[test]
    fn add_then_get_scenario() {
        let mut c = store();
        let now = Instant::now();
        let resp = dispatch(&mut c, now, Operation::Add, &add_payload(10_000, b"abc", b"\x01\x02\x03"));
        assert_eq!(resp, vec![ERR_OK]);
        let resp = dispatch(&mut c, now, Operation::Get, b"abc");
        assert_eq!(resp, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn add_duplicate_scenario() {
        let mut c = store();
        let now = Instant::now();
        dispatch(&mut c, now, Operation::Add, &add_payload(10_000, b"abc", b"x"));
        let resp = dispatch(&mut c, now, Operation::Add, &add_payload(10_000, b"abc", b"y"));
        assert_eq!(resp, vec![ADD_ERR_MATCHING_SESSION]);
    }

    #[test]
    fn get_miss_scenario() {
        let mut c = store();
        let resp = dispatch(&mut c, Instant::now(), Operation::Get, b"nope");
        assert_eq!(resp, vec![ERR_NOTOK]);
    }

    #[test]
    fn have_after_remove_scenario() {
        let mut c = store();
        let now = Instant::now();
        dispatch(&mut c, now, Operation::Add, &add_payload(10_000, b"abc", b"x"));
        assert_eq!(dispatch(&mut c, now, Operation::Remove, b"abc"), vec![ERR_OK]);
        assert_eq!(dispatch(&mut c, now, Operation::Have, b"abc"), vec![ERR_NOTOK]);
    }

    #[test]
    fn add_timeout_out_of_range() {
        let mut c = store();
        let resp = dispatch(
            &mut c,
            Instant::now(),
            Operation::Add,
            &add_payload(u32::MAX, b"abc", b"x"),
        );
        assert_eq!(resp, vec![ADD_ERR_TIMEOUT_RANGE]);
    }

    #[test]
    fn add_corrupt_payload_too_short() {
        let mut c = store();
        let resp = dispatch(&mut c, Instant::now(), Operation::Add, &[0u8; 4]);
        assert_eq!(resp, vec![ADD_ERR_CORRUPT]);
    }
}
