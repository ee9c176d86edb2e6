//! The multiplex table: tracks every request currently forwarded to the
//! upstream cache server, keyed by a multiplexer-assigned `m_uid` that
//! becomes the wire-level `request_uid` sent upstream. Grounded in
//! `sessclient/multiplexer.c`'s `item_t`/`st_multiplexer_t`.

/// `MULTIPLEXER_MAX_ITEMS`: bound on requests in flight at once.
pub const MAX_ITEMS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Normal,
    ClientDead,
}

struct Item {
    m_uid: u32,
    c_uid: u64,
    s_uid: u64,
    state: ItemState,
}

pub struct Table {
    items: Vec<Item>,
    uid_seed: u32,
}

impl Table {
    pub fn new() -> Self {
        Table {
            items: Vec::new(),
            uid_seed: 1,
        }
    }

    pub fn has_space(&self) -> bool {
        self.items.len() < MAX_ITEMS
    }

    /// Registers a new in-flight request, returning its `m_uid`.
    pub fn add(&mut self, c_uid: u64, s_uid: u64) -> u32 {
        let m_uid = self.uid_seed;
        self.uid_seed = self.uid_seed.wrapping_add(1);
        if self.uid_seed == 0 {
            self.uid_seed = 1;
        }
        self.items.push(Item {
            m_uid,
            c_uid,
            s_uid,
            state: ItemState::Normal,
        });
        m_uid
    }

    /// Removes an item the caller just added but then failed to place
    /// upstream (`server_place_request` returning false in the original).
    pub fn delete_item(&mut self, m_uid: u32) {
        if let Some(pos) = self.items.iter().rposition(|i| i.m_uid == m_uid) {
            self.items.remove(pos);
        }
    }

    /// A downstream client connection has died: every item still waiting
    /// on that client is now orphaned. Unlike the original, whose
    /// `multiplexer_mark_dead_client` ignores its `client_uid` argument and
    /// marks every in-flight item dead, this only touches items belonging
    /// to `c_uid`.
    pub fn mark_dead_client(&mut self, c_uid: u64) {
        for item in self.items.iter_mut() {
            if item.c_uid == c_uid {
                item.state = ItemState::ClientDead;
            }
        }
    }

    /// The upstream connection died: every item pointing at `s_uid` is
    /// removed. Returns the client uids that were still waiting on a
    /// response (and therefore need a synthesized `ERR_DISCONNECTED`).
    pub fn mark_dead_server(&mut self, s_uid: u64) -> Vec<u64> {
        let mut notify = Vec::new();
        self.items.retain(|item| {
            if item.s_uid != s_uid {
                return true;
            }
            if item.state != ItemState::ClientDead {
                notify.push(item.c_uid);
            }
            false
        });
        notify
    }

    /// A response for `m_uid` arrived from upstream. Removes the item and
    /// returns the client uid to deliver it to, unless that client already
    /// disconnected (in which case the response is silently absorbed).
    pub fn finish(&mut self, m_uid: u32) -> Option<u64> {
        let pos = self.items.iter().position(|i| i.m_uid == m_uid)?;
        let item = self.items.remove(pos);
        if item.state == ItemState::ClientDead {
            None
        } else {
            Some(item.c_uid)
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_finish_round_trip() {
        let mut t = Table::new();
        let m_uid = t.add(1, 100);
        assert_eq!(t.finish(m_uid), Some(1));
        assert_eq!(t.finish(m_uid), None);
    }

    #[test]
    fn dead_server_notifies_waiting_clients_only() {
        let mut t = Table::new();
        let a = t.add(1, 100);
        let _b = t.add(2, 200);
        let notify = t.mark_dead_server(100);
        assert_eq!(notify, vec![1]);
        assert_eq!(t.finish(a), None);
    }

    #[test]
    fn dead_client_does_not_touch_other_clients_items() {
        let mut t = Table::new();
        let a = t.add(1, 100);
        let b = t.add(2, 100);
        t.mark_dead_client(1);
        // client 1's item is now silently absorbable, client 2's is untouched
        assert_eq!(t.finish(a), None);
        assert_eq!(t.finish(b), Some(2));
    }

    #[test]
    fn has_space_respects_max_items() {
        let mut t = Table::new();
        for i in 0..MAX_ITEMS as u64 {
            assert!(t.has_space());
            t.add(i, 1);
        }
        assert!(!t.has_space());
    }

    #[test]
    fn delete_item_removes_just_added_entry() {
        let mut t = Table::new();
        let m_uid = t.add(1, 100);
        t.delete_item(m_uid);
        assert_eq!(t.finish(m_uid), None);
    }

    #[test]
    fn uid_seed_wraps_past_u32_max_and_still_matches() {
        let mut t = Table::new();
        t.uid_seed = u32::MAX;
        let m_uid = t.add(1, 100);
        assert_eq!(m_uid, u32::MAX);
        assert_eq!(t.finish(m_uid), Some(1));
        assert_eq!(t.uid_seed, 1);
    }
}
