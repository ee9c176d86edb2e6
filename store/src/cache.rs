//! Expiry-ordered session cache store.
//!
//! Entries live in fixed slots (`slots: Vec<Option<Entry>>`, reused via a
//! free list) so that neither a bulk expiry sweep nor a forced eviction ever
//! has to renumber survivors. A separate `order: VecDeque<usize>` of slot
//! indices, always kept sorted ascending by expiry, gives O(1) access to the
//! next-to-expire entry and an O(k) sweep/eviction in the evicted count `k`,
//! replacing the original's single-slot lookup memo. `index:
//! FnvHashMap<session_id, slot>` replaces that memo outright with an O(1)
//! lookup on every call, not just the common immediately-repeated one.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dcache_proto::{MAX_DATA_LEN, MAX_ID_LEN};
use fnv::FnvHashMap;
use slog::Logger;

use crate::entry::Entry;
use crate::error::CacheError;

/// 7 days, in milliseconds: the ceiling a requested timeout is clamped to.
pub const MAX_EXPIRY_MS: u64 = 604_800_000;

pub struct CacheStore {
    log: Logger,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    order: VecDeque<usize>,
    index: FnvHashMap<Vec<u8>, usize>,
    max_sessions: usize,
    expire_delta: usize,
}

impl CacheStore {
    /// `max_sessions` must already be validated into `[CACHE_MIN_SIZE,
    /// CACHE_MAX_SIZE]` by the caller (the server's CLI parsing does this).
    pub fn new(max_sessions: usize, log: Logger) -> Self {
        let expire_delta = (max_sessions / 30).max(1);
        CacheStore {
            log,
            slots: Vec::with_capacity(max_sessions),
            free: Vec::new(),
            order: VecDeque::with_capacity(max_sessions),
            index: FnvHashMap::default(),
            max_sessions,
            expire_delta,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sweeps expired entries from the head of `order`. O(k) in the number
    /// actually expired, since eviction never touches a surviving slot.
    fn sweep_expired(&mut self, now: Instant) {
        let mut expired = 0;
        while let Some(&idx) = self.order.front() {
            let expiry = self.slots[idx].as_ref().expect("order points at live slot").expiry;
            if expiry < now {
                self.order.pop_front();
                self.evict_slot(idx);
                expired += 1;
            } else {
                break;
            }
        }
        if expired > 0 {
            slog::debug!(self.log, "expired sessions swept"; "count" => expired);
        }
    }

    fn evict_slot(&mut self, idx: usize) {
        let entry = self.slots[idx].take().expect("slot was live");
        self.index.remove(&entry.session_id);
        self.free.push(idx);
    }

    /// Forcibly removes `count` entries from the head of `order`,
    /// irrespective of expiry. Trades strict fairness for far fewer
    /// bulk-memmove operations.
    fn force_expire(&mut self, count: usize) {
        let n = count.min(self.order.len());
        for _ in 0..n {
            let idx = self.order.pop_front().expect("checked len");
            self.evict_slot(idx);
        }
        if n > 0 {
            slog::info!(self.log, "forced eviction"; "count" => n);
        }
    }

    fn alloc_slot(&mut self, entry: Entry) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(entry);
            idx
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        }
    }

    /// Inserts `slot_idx` into `order`, preserving ascending-expiry order.
    /// Walks from the tail toward the head, same as the original's
    /// insertion-point scan, and inserts right after the first entry whose
    /// expiry is `<=` the new one.
    fn insert_ordered(&mut self, slot_idx: usize, expiry: Instant) {
        let mut pos = self.order.len();
        while pos > 0 {
            let candidate = self.order[pos - 1];
            let candidate_expiry = self.slots[candidate].as_ref().unwrap().expiry;
            if candidate_expiry <= expiry {
                break;
            }
            pos -= 1;
        }
        self.order.insert(pos, slot_idx);
    }

    pub fn add(
        &mut self,
        now: Instant,
        timeout_ms: u64,
        session_id: &[u8],
        blob: &[u8],
    ) -> Result<(), CacheError> {
        if timeout_ms as u128 > MAX_EXPIRY_MS as u128 {
            return Err(CacheError::RangeTimeout);
        }
        if session_id.is_empty() || session_id.len() > MAX_ID_LEN {
            return Err(CacheError::RangeId);
        }
        if blob.is_empty() || blob.len() > MAX_DATA_LEN {
            return Err(CacheError::RangeData);
        }

        self.sweep_expired(now);

        if self.index.contains_key(session_id) {
            return Err(CacheError::Duplicate);
        }

        if self.order.len() == self.max_sessions {
            self.force_expire(self.expire_delta);
        }

        let expiry = now + Duration::from_millis(timeout_ms.min(MAX_EXPIRY_MS));
        let entry = Entry {
            expiry,
            session_id: session_id.to_vec(),
            blob: blob.to_vec(),
        };
        let slot_idx = self.alloc_slot(entry);
        self.index.insert(session_id.to_vec(), slot_idx);
        self.insert_ordered(slot_idx, expiry);
        Ok(())
    }

    /// Returns the blob's length (0 if absent). If `out` is `Some`, copies up
    /// to `out.len()` bytes of the blob into it. Callers that only want the
    /// size, to allocate a correctly-sized response buffer, pass `None`.
    pub fn get(&mut self, now: Instant, session_id: &[u8], out: Option<&mut [u8]>) -> usize {
        self.sweep_expired(now);
        let Some(&idx) = self.index.get(session_id) else {
            return 0;
        };
        let entry = self.slots[idx].as_ref().expect("index points at live slot");
        if let Some(buf) = out {
            let n = entry.blob.len().min(buf.len());
            buf[..n].copy_from_slice(&entry.blob[..n]);
        }
        entry.blob.len()
    }

    pub fn remove(&mut self, now: Instant, session_id: &[u8]) -> bool {
        self.sweep_expired(now);
        let Some(idx) = self.index.remove(session_id) else {
            return false;
        };
        if let Some(pos) = self.order.iter().position(|&i| i == idx) {
            self.order.remove(pos);
        }
        self.slots[idx] = None;
        self.free.push(idx);
        true
    }

    pub fn have(&mut self, now: Instant, session_id: &[u8]) -> bool {
        self.sweep_expired(now);
        self.index.contains_key(session_id)
    }

    pub fn num_items(&mut self, now: Instant) -> usize {
        self.sweep_expired(now);
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store(cap: usize) -> CacheStore {
        CacheStore::new(cap, Logger::root(slog::Discard, slog::o!()))
    }

    #[test]
    fn add_then_get_returns_exact_blob() {
        let mut c = store(64);
        let now = Instant::now();
        c.add(now, 10_000, b"abc", b"\x01\x02\x03").unwrap();
        let len = c.get(now, b"abc", None);
        assert_eq!(len, 3);
        let mut buf = [0u8; 3];
        assert_eq!(c.get(now, b"abc", Some(&mut buf)), 3);
        assert_eq!(&buf, b"\x01\x02\x03");
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut c = store(64);
        let now = Instant::now();
        c.add(now, 10_000, b"abc", b"x").unwrap();
        assert_eq!(c.add(now, 10_000, b"abc", b"y"), Err(CacheError::Duplicate));
    }

    #[test]
    fn expiry_fires() {
        let mut c = store(64);
        let now = Instant::now();
        c.add(now, 500, b"abc", b"x").unwrap();
        let later = now + Duration::from_millis(501);
        assert_eq!(c.get(later, b"abc", None), 0);
    }

    #[test]
    fn remove_then_have() {
        let mut c = store(64);
        let now = Instant::now();
        c.add(now, 10_000, b"abc", b"x").unwrap();
        assert!(c.remove(now, b"abc"));
        assert!(!c.have(now, b"abc"));
        assert!(!c.remove(now, b"abc"));
    }

    #[test]
    fn forced_eviction_removes_head_in_age_order() {
        let mut c = store(64);
        let now = Instant::now();
        for i in 0..64u32 {
            let id = format!("id{:04}", i).into_bytes();
            c.add(now + Duration::from_millis(i as u64), 600_000, &id, b"x").unwrap();
        }
        assert_eq!(c.num_items(now), 64);
        // one more insert forces expire_delta = max(1, 64/30) = 2 evictions
        c.add(now + Duration::from_millis(1000), 600_000, b"newcomer", b"x").unwrap();
        assert_eq!(c.num_items(now), 63);
        assert!(!c.have(now, b"id0000"));
        assert!(!c.have(now, b"id0001"));
        assert!(c.have(now, b"id0002"));
        assert!(c.have(now, b"newcomer"));
    }

    #[test]
    fn entries_stay_sorted_by_expiry() {
        let mut c = store(64);
        let now = Instant::now();
        c.add(now, 5_000, b"a", b"x").unwrap();
        c.add(now, 1_000, b"b", b"x").unwrap();
        c.add(now, 9_000, b"c", b"x").unwrap();
        let expiries: Vec<Instant> =
            c.order.iter().map(|&i| c.slots[i].as_ref().unwrap().expiry).collect();
        let mut sorted = expiries.clone();
        sorted.sort();
        assert_eq!(expiries, sorted);
    }

    #[test]
    fn out_of_range_inputs_rejected() {
        let mut c = store(64);
        let now = Instant::now();
        assert_eq!(c.add(now, MAX_EXPIRY_MS + 1, b"a", b"x"), Err(CacheError::RangeTimeout));
        assert_eq!(c.add(now, 1000, b"", b"x"), Err(CacheError::RangeId));
        assert_eq!(c.add(now, 1000, b"a", b""), Err(CacheError::RangeData));
    }
}
