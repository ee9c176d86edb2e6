//! CLI surface for `sessclient`, mirroring `dcached`'s `structopt`-derived
//! `Opt` pattern with the multiplexer-specific `--server`/`--retry`/`--idle`
//! flags layered on top, grounded in `sclient.c`'s option table.

use structopt::StructOpt;

use dcache_proto::Address;

use crate::error::MuxError;

/// `SERVER_RETRY_MIN_MSECS`/`SERVER_RETRY_MAX_MSECS` equivalents.
const RETRY_MIN_MS: u64 = 1;
const RETRY_MAX_MS: u64 = 3_600_000;
/// `CLIENT_IDLE_TIMEOUT_MIN_MSECS`/`..._MAX_MSECS` equivalents; 0 disables
/// idle disconnection entirely.
const IDLE_MIN_MS: u64 = 0;
const IDLE_MAX_MS: u64 = 3_600_000;

#[derive(Debug, StructOpt)]
#[structopt(name = "sessclient", about = "Client-side multiplexer for the distributed session cache")]
pub struct Opt {
    /// Address to accept client connections on.
    #[structopt(long, parse(try_from_str))]
    pub listen: Address,

    /// Upstream cache server address to multiplex requests to.
    #[structopt(long, parse(try_from_str))]
    pub server: Address,

    /// Milliseconds to wait between upstream reconnect attempts.
    #[structopt(long, default_value = "1000")]
    pub retry: u64,

    /// Milliseconds of client inactivity (no open request) before
    /// disconnecting it; 0 disables.
    #[structopt(long, default_value = "0")]
    pub idle: u64,

    /// Daemonize after startup.
    #[structopt(long)]
    pub daemon: bool,

    /// Drop privileges to this user after binding the listener.
    #[structopt(long)]
    pub user: Option<String>,

    /// Owning user for a UNIX-domain listener socket.
    #[structopt(long)]
    pub sockowner: Option<String>,

    /// Owning group for a UNIX-domain listener socket.
    #[structopt(long)]
    pub sockgroup: Option<String>,

    /// Octal permission bits for a UNIX-domain listener socket (e.g. "0600").
    #[structopt(long, parse(try_from_str = parse_octal))]
    pub sockperms: Option<u32>,

    /// Write the daemon's pid to this file.
    #[structopt(long, parse(from_os_str))]
    pub pidfile: Option<std::path::PathBuf>,

    /// Install a SIGUSR1 handler for graceful shutdown.
    #[structopt(long)]
    pub killable: bool,

    /// Increase log verbosity; may be repeated.
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u64,
}

fn parse_octal(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(s.trim_start_matches('0'), 8)
}

impl Opt {
    pub fn validated_retry(&self) -> Result<u64, MuxError> {
        if self.retry < RETRY_MIN_MS || self.retry > RETRY_MAX_MS {
            return Err(MuxError::RetryOutOfRange {
                min: RETRY_MIN_MS,
                max: RETRY_MAX_MS,
                got: self.retry,
            });
        }
        Ok(self.retry)
    }

    pub fn validated_idle(&self) -> Result<u64, MuxError> {
        if self.idle < IDLE_MIN_MS || self.idle > IDLE_MAX_MS {
            return Err(MuxError::IdleOutOfRange {
                min: IDLE_MIN_MS,
                max: IDLE_MAX_MS,
                got: self.idle,
            });
        }
        Ok(self.idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_opt() -> Opt {
        Opt {
            listen: "IP:4433".parse().unwrap(),
            server: "IP:127.0.0.1:4434".parse().unwrap(),
            retry: 1000,
            idle: 0,
            daemon: false,
            user: None,
            sockowner: None,
            sockgroup: None,
            sockperms: None,
            pidfile: None,
            killable: false,
            verbose: 0,
        }
    }

    #[test]
    fn retry_out_of_range_is_rejected() {
        let mut opt = base_opt();
        opt.retry = 0;
        assert!(opt.validated_retry().is_err());
    }

    #[test]
    fn idle_zero_is_allowed() {
        let opt = base_opt();
        assert_eq!(opt.validated_idle().unwrap(), 0);
    }

    #[test]
    fn idle_out_of_range_is_rejected() {
        let mut opt = base_opt();
        opt.idle = RETRY_MAX_MS * 10;
        assert!(opt.validated_idle().is_err());
    }
}
