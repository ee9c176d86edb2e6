//! CLI surface for `dcached`, following `examples/geeklint-quinn/perf`'s
//! `structopt`-derived `Opt` pattern (the teacher itself has no binary).

use dcache_proto::{Address, CACHE_MAX_SIZE, CACHE_MIN_SIZE};
use structopt::StructOpt;

use crate::error::ServerError;

#[derive(Debug, StructOpt)]
#[structopt(name = "dcached", about = "Distributed TLS session cache server")]
pub struct Opt {
    /// Listener address: `IP:<port>`, `IP:<host>:<port>`, `IPv4:<host>:<port>`, or `UNIX:<path>`.
    #[structopt(long, parse(try_from_str))]
    pub listen: Address,

    /// Maximum number of sessions to hold at once.
    #[structopt(long, default_value = "10000")]
    pub sessions: u32,

    /// Log a stats line every N ticks; 0 disables.
    #[structopt(long, default_value = "0")]
    pub progress: u64,

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

    /// Install a SIGUSR1/SIGUSR2 handler for graceful/immediate shutdown.
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
    /// Validates `--sessions` into `[CACHE_MIN_SIZE, CACHE_MAX_SIZE]`,
    /// a fatal error otherwise.
    pub fn validated_sessions(&self) -> Result<u32, ServerError> {
        if self.sessions < CACHE_MIN_SIZE || self.sessions > CACHE_MAX_SIZE {
            return Err(ServerError::SessionsOutOfRange {
                min: CACHE_MIN_SIZE,
                max: CACHE_MAX_SIZE,
                got: self.sessions,
            });
        }
        Ok(self.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_out_of_range_is_rejected() {
        let opt = Opt {
            listen: "IP:4433".parse().unwrap(),
            sessions: 10,
            progress: 0,
            daemon: false,
            user: None,
            sockowner: None,
            sockgroup: None,
            sockperms: None,
            pidfile: None,
            killable: false,
            verbose: 0,
        };
        assert!(opt.validated_sessions().is_err());
    }

    #[test]
    fn octal_sockperms_parses() {
        assert_eq!(parse_octal("0600").unwrap(), 0o600);
        assert_eq!(parse_octal("600").unwrap(), 0o600);
    }
}
