// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! IPv6 address/prefix values as they appear in table rows.
//!
//! Accepted text form: `ADDR[/PREFIX_LEN][,PREFERRED_LFT[,VALID_LFT]]`.
//! Lifetimes are seconds, with `-1` meaning infinite.
//!
//! ```
//! use netcache::Ip6Addr;
//!
//! let a: Ip6Addr = "2001:db8::1/64,3600,7200".parse().unwrap();
//! assert_eq!(a.prefix_len, Some(64));
//! assert_eq!(a.preferred_lifetime, Some(3600));
//! assert_eq!(a.to_string(), "2001:db8::1/64,3600,7200");
//! ```

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("Invalid IPv6 address: {0}")]
    Address(String),
    #[error("Invalid prefix length: {0}")]
    PrefixLength(String),
    #[error("Invalid lifetime: {0}")]
    Lifetime(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ip6Addr {
    pub addr: Ipv6Addr,
    pub prefix_len: Option<u8>,
    pub preferred_lifetime: Option<i32>,
    pub valid_lifetime: Option<i32>,
}

impl Ip6Addr {
    #[must_use]
    pub fn new(addr: Ipv6Addr, prefix_len: Option<u8>) -> Self {
        Self {
            addr,
            prefix_len,
            preferred_lifetime: None,
            valid_lifetime: None,
        }
    }

    /// Same address and prefix, lifetimes dropped.
    #[must_use]
    pub fn without_lifetimes(self) -> Self {
        Self::new(self.addr, self.prefix_len)
    }
}

fn parse_lifetime(s: &str) -> Result<i32, AddrError> {
    s.trim().parse::<i32>().map_err(|_| AddrError::Lifetime(s.to_string()))
}

impl FromStr for Ip6Addr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');
        let head = parts.next().unwrap_or_default();
        let preferred_lifetime = parts.next().map(parse_lifetime).transpose()?;
        let valid_lifetime = parts.next().map(parse_lifetime).transpose()?;

        let (addr, prefix) = match head.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (head, None),
        };

        let addr = addr
            .trim()
            .parse::<Ipv6Addr>()
            .map_err(|_| AddrError::Address(s.to_string()))?;

        let prefix_len = match prefix {
            Some(p) => match p.trim().parse::<u8>() {
                Ok(len) if len <= 128 => Some(len),
                _ => return Err(AddrError::PrefixLength(p.to_string())),
            },
            None => None,
        };

        Ok(Self {
            addr,
            prefix_len,
            preferred_lifetime,
            valid_lifetime,
        })
    }
}

impl fmt::Display for Ip6Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)?;
        if let Some(len) = self.prefix_len {
            write!(f, "/{len}")?;
        }
        if self.preferred_lifetime.is_some() || self.valid_lifetime.is_some() {
            write!(
                f,
                ",{},{}",
                self.preferred_lifetime.unwrap_or(-1),
                self.valid_lifetime.unwrap_or(-1)
            )?;
        }
        Ok(())
    }
}
