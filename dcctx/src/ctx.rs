//! Synchronous client shim a TLS library's session-cache callbacks call
//! into: the Rust counterpart of `libdistcache`'s `DC_CTX`. Exposes a
//! blocking API over the async `proto::Plug`, since an OpenSSL-style C ABI
//! callback is inherently call/return, not task-based.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use dcache_proto::frame::Operation;
use dcache_proto::{Address, AnyStream, Plug, TO_SERVER};
use slog::Logger;
use tokio::runtime::{Builder, Runtime};

use crate::error::ClientError;
use crate::transact::transact;

/// Keep a single persistent connection open across operations instead of
/// opening and closing one per call.
pub const PERSISTENT: u32 = 0x01;
/// Only meaningful alongside `PERSISTENT`: reconnect if the calling
/// process id has changed since the last connect (guards against a
/// persistent connection surviving an unexpected `fork`).
pub const PERSISTENT_PIDCHECK: u32 = 0x02;
/// Only meaningful alongside `PERSISTENT`: defer the initial connect until
/// the first operation instead of connecting in `Ctx::new`.
pub const PERSISTENT_LATE: u32 = 0x04;
/// Only meaningful alongside `PERSISTENT`: on a transport failure of an
/// active persistent connection, reconnect once and retry the in-flight
/// operation exactly once before giving up.
pub const PERSISTENT_RETRY: u32 = 0x08;

const ERR_OK: u8 = 0;
const ERR_NOTOK: u8 = 1;

/// Process-wide monotonic `request_uid` source, shared by every `Ctx` in
/// the process (mirrors `dc_client.c`'s static `global_uid`). Wraps to 1,
/// never 0: 0 is not a valid `request_uid` on the wire.
static NEXT_REQUEST_UID: AtomicU32 = AtomicU32::new(1);

fn next_request_uid() -> u32 {
    loop {
        let v = NEXT_REQUEST_UID.fetch_add(1, Ordering::Relaxed);
        if v != 0 {
            return v;
        }
    }
}

/// State cached from the most recent successful `get`, so a matching
/// `reget` can replay the response without a network round-trip.
struct LastGet {
    id: Vec<u8>,
    blob: Vec<u8>,
}

pub struct Ctx {
    rt: Runtime,
    address: Address,
    flags: u32,
    current_pid: u32,
    plug: Option<Plug<AnyStream>>,
    last_get: Option<LastGet>,
    log: Logger,
}

impl Ctx {
    /// Parses `target` (the same `IP:`/`UNIX:` grammar as `--listen`/
    /// `--server`) and, unless `PERSISTENT_LATE` is set, connects
    /// immediately when `PERSISTENT` is set.
    pub fn new(target: &str, flags: u32, log: Logger) -> Result<Ctx, ClientError> {
        let address = Address::from_str(target)?;
        // Drives exactly one transaction at a time, same as both binaries'
        // current_thread flavor.
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ClientError::RuntimeInit)?;
        let current_pid = std::process::id();

        let plug = if (flags & PERSISTENT != 0) && (flags & PERSISTENT_LATE == 0) {
            Some(rt.block_on(Self::connect(&address, &log))?)
        } else {
            None
        };

        Ok(Ctx {
            rt,
            address,
            flags,
            current_pid,
            plug,
            last_get: None,
            log,
        })
    }

    async fn connect(address: &Address, log: &Logger) -> Result<Plug<AnyStream>, ClientError> {
        let stream = dcache_proto::connect(address).await?;
        Ok(Plug::new(stream, TO_SERVER, log.clone()))
    }

    /// Adds a session. `timeout_ms` must be at least
    /// [`dcache_proto::MIN_TIMEOUT_MS`]; the server separately enforces the
    /// `MAX_EXPIRY_MS` ceiling and reports `Status(ADD_ERR_TIMEOUT_RANGE)`
    /// if exceeded.
    pub fn add(&mut self, id: &[u8], blob: &[u8], timeout_ms: u64) -> Result<(), ClientError> {
        validate_id(id)?;
        validate_blob(blob)?;
        if timeout_ms < dcache_proto::MIN_TIMEOUT_MS {
            return Err(ClientError::TimeoutTooLow {
                got: timeout_ms,
                min: dcache_proto::MIN_TIMEOUT_MS,
            });
        }

        let mut payload = Vec::with_capacity(8 + id.len() + blob.len());
        payload.extend_from_slice(&(timeout_ms as u32).to_be_bytes());
        payload.extend_from_slice(&(id.len() as u32).to_be_bytes());
        payload.extend_from_slice(id);
        payload.extend_from_slice(blob);

        let resp = self.do_transact(Operation::Add, &payload)?;
        expect_ok(&resp)
    }

    pub fn remove(&mut self, id: &[u8]) -> Result<(), ClientError> {
        validate_id(id)?;
        let resp = self.do_transact(Operation::Remove, id)?;
        expect_ok(&resp)
    }

    /// Returns `Ok(None)` on a cache miss (the wire-level one-byte
    /// `ERR_NOTOK` response), `Ok(Some(blob))` otherwise. Caches the id and
    /// blob on a hit so a following `reget` for the same id can replay it.
    pub fn get(&mut self, id: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        validate_id(id)?;
        let resp = self.do_transact(Operation::Get, id)?;
        if is_miss(&resp) {
            self.last_get = None;
            return Ok(None);
        }
        self.last_get = Some(LastGet {
            id: id.to_vec(),
            blob: resp.clone(),
        });
        Ok(Some(resp))
    }

    /// Replays the most recent successful `get`'s result for `id` without a
    /// network round-trip. Fails if the last operation wasn't a `get`, or
    /// was a `get` for a different id.
    pub fn reget(&mut self, id: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        match &self.last_get {
            Some(cached) if cached.id == id => Ok(Some(cached.blob.clone())),
            _ => Err(ClientError::NoPriorGet),
        }
    }

    pub fn has(&mut self, id: &[u8]) -> Result<bool, ClientError> {
        validate_id(id)?;
        let resp = self.do_transact(Operation::Have, id)?;
        match resp.as_slice() {
            [ERR_OK] => Ok(true),
            [ERR_NOTOK] => Ok(false),
            _ => Err(ClientError::ProtocolMismatch),
        }
    }

    /// Implements `int_transact`'s connection-mode handling: non-persistent
    /// operations get a fresh transient connection each time; persistent
    /// ones reuse `self.plug`, reconnecting first under `PIDCHECK`/`LATE`,
    /// and retrying once under `PERSISTENT_RETRY` if the transaction's
    /// transport fails.
    fn do_transact(&mut self, cmd: Operation, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        if cmd != Operation::Get {
            self.last_get = None;
        }
        let request_uid = next_request_uid();
        let persistent = self.flags & PERSISTENT != 0;

        if !persistent {
            let address = self.address.clone();
            let log = self.log.clone();
            return self.rt.block_on(async move {
                let mut plug = Self::connect(&address, &log).await?;
                transact(&mut plug, request_uid, cmd, payload).await
            });
        }

        let pid = std::process::id();
        let need_reconnect = (self.flags & PERSISTENT_PIDCHECK != 0 && pid != self.current_pid)
            || (self.flags & PERSISTENT_LATE != 0 && self.plug.is_none())
            || self.plug.is_none();
        if need_reconnect {
            self.reconnect()?;
        }

        let retriable = self.flags & PERSISTENT_RETRY != 0;
        let first = {
            let plug = self.plug.as_mut().expect("connected above");
            self.rt.block_on(transact(plug, request_uid, cmd, payload))
        };
        match first {
            Ok(body) => Ok(body),
            Err(ClientError::Transport(_)) if retriable => {
                self.reconnect()?;
                let plug = self.plug.as_mut().expect("just reconnected");
                self.rt.block_on(transact(plug, request_uid, cmd, payload))
            }
            Err(e) => Err(e),
        }
    }

    fn reconnect(&mut self) -> Result<(), ClientError> {
        self.plug = None;
        let address = self.address.clone();
        let log = self.log.clone();
        let plug = self.rt.block_on(Self::connect(&address, &log))?;
        self.plug = Some(plug);
        self.current_pid = std::process::id();
        Ok(())
    }
}

fn validate_id(id: &[u8]) -> Result<(), ClientError> {
    if id.is_empty() || id.len() > dcache_proto::MAX_ID_LEN {
        return Err(ClientError::InvalidId {
            got: id.len(),
            max: dcache_proto::MAX_ID_LEN,
        });
    }
    Ok(())
}

fn validate_blob(blob: &[u8]) -> Result<(), ClientError> {
    if blob.is_empty() || blob.len() > dcache_proto::MAX_DATA_LEN {
        return Err(ClientError::InvalidBlob {
            got: blob.len(),
            max: dcache_proto::MAX_DATA_LEN,
        });
    }
    Ok(())
}

fn is_miss(resp: &[u8]) -> bool {
    resp.len() == 1 && resp[0] == ERR_NOTOK
}

fn expect_ok(resp: &[u8]) -> Result<(), ClientError> {
    match resp {
        [ERR_OK] => Ok(()),
        [status] => Err(ClientError::Status(*status)),
        _ => Err(ClientError::ProtocolMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn request_uid_counter_is_monotonic_and_never_zero() {
        let a = next_request_uid();
        let b = next_request_uid();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_eq!(b, a.wrapping_add(1).max(1));
    }

    #[test]
    fn new_non_persistent_does_not_require_a_live_server() {
        // Non-persistent contexts never connect until an operation runs.
        let ctx = Ctx::new("UNIX:/tmp/nonexistent-dcache-test.sock", 0, test_log()).unwrap();
        assert!(ctx.plug.is_none());
    }

    #[test]
    fn reget_without_a_prior_get_fails() {
        let mut ctx = Ctx::new("UNIX:/tmp/nonexistent-dcache-test.sock", 0, test_log()).unwrap();
        assert!(matches!(ctx.reget(b"abc"), Err(ClientError::NoPriorGet)));
    }

    #[test]
    fn validate_id_rejects_empty_and_oversized() {
        assert!(validate_id(b"").is_err());
        assert!(validate_id(&vec![0u8; dcache_proto::MAX_ID_LEN + 1]).is_err());
        assert!(validate_id(b"ok").is_ok());
    }

    #[test]
    fn expect_ok_maps_status_bytes() {
        assert!(expect_ok(&[ERR_OK]).is_ok());
        assert!(matches!(expect_ok(&[42]), Err(ClientError::Status(42))));
    }
}
