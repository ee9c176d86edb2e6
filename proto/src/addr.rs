//! Listener/upstream address grammar shared by both binaries, so `--listen`
//! and `--server` parse the same four textual forms everywhere.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use failure::Fail;

#[derive(Debug, Fail)]
pub enum AddressParseError {
    #[fail(display = "unrecognized address scheme in {:?}", _0)]
    UnknownScheme(String),
    #[fail(display = "malformed address {:?}: {}", _0, _1)]
    Malformed(String, &'static str),
}

/// A parsed `IP:<port>`, `IP:<host>:<port>`, `IPv4:<host>:<port>`, or
/// `UNIX:<path>` listener/upstream address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Tcp(sa) => write!(f, "IP:{}", sa),
            Address::Unix(path) => write!(f, "UNIX:{}", path.display()),
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| AddressParseError::Malformed(s.to_string(), "missing scheme"))?;
        match scheme {
            "UNIX" => Ok(Address::Unix(PathBuf::from(rest))),
            "IP" | "IPv4" => {
                // `host:port`, or bare `port` for `IP:<port>` on any interface.
                if let Ok(port) = rest.parse::<u16>() {
                    let ip: IpAddr = if scheme == "IPv4" {
                        "0.0.0.0".parse().unwrap()
                    } else {
                        "::".parse().unwrap()
                    };
                    return Ok(Address::Tcp(SocketAddr::new(ip, port)));
                }
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| AddressParseError::Malformed(s.to_string(), "missing port"))?;
                let port: u16 = port
                    .parse()
                    .map_err(|_| AddressParseError::Malformed(s.to_string(), "bad port"))?;
                let ip: IpAddr = host
                    .parse()
                    .map_err(|_| AddressParseError::Malformed(s.to_string(), "bad host"))?;
                Ok(Address::Tcp(SocketAddr::new(ip, port)))
            }
            _ => Err(AddressParseError::UnknownScheme(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_ip_port() {
        let a: Address = "IP:4433".parse().unwrap();
        assert_eq!(a, Address::Tcp("[::]:4433".parse().unwrap()));
    }

    #[test]
    fn parses_host_port() {
        let a: Address = "IP:127.0.0.1:4433".parse().unwrap();
        assert_eq!(a, Address::Tcp("127.0.0.1:4433".parse().unwrap()));
    }

    #[test]
    fn parses_unix() {
        let a: Address = "UNIX:/tmp/dcache.sock".parse().unwrap();
        assert_eq!(a, Address::Unix(PathBuf::from("/tmp/dcache.sock")));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!("FOO:bar".parse::<Address>().is_err());
    }
}
