//! Discovery address pool parsing.
//!
//! A pool is a comma-separated list of IPv4 addresses and inclusive
//! `START:END` ranges. Characters other than digits, dots, colons and commas
//! are stripped first, so `"[10.0.0.1:10.0.0.3, 10.0.1.1]"` is accepted.

use regex::Regex;
use std::net::{AddrParseError, Ipv4Addr};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

/// Ranges wider than this are treated as typos rather than probed
pub const MAX_RANGE_LEN: u64 = 65_536;

static NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9.:,]+").expect("IP pool noise pattern is valid"));

/// Why a single pool entry was skipped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolEntryError {
    #[error("'{text}' is not an IPv4 address: {source}")]
    InvalidAddress {
        text: String,
        source: AddrParseError,
    },

    #[error("range start {start} is after end {end}")]
    ReversedRange { start: Ipv4Addr, end: Ipv4Addr },

    #[error("range holds more than {} addresses", MAX_RANGE_LEN)]
    RangeTooLarge,
}

/// Expand `pool` into the addresses to probe, in pool order.
///
/// Malformed entries are logged and skipped.
pub fn parse_ip_pool(pool: &str) -> Vec<Ipv4Addr> {
    let cleaned = NOISE.replace_all(pool, "");

    let mut addresses = Vec::new();
    for entry in cleaned.split(',').filter(|entry| !entry.is_empty()) {
        match parse_entry(entry) {
            Ok(expanded) => addresses.extend(expanded),
            Err(e) => warn!(entry, "Skipping IP pool entry: {}", e),
        }
    }
    addresses
}

/// Expand one address or inclusive `START:END` range
pub fn parse_entry(entry: &str) -> Result<Vec<Ipv4Addr>, PoolEntryError> {
    match entry.split_once(':') {
        Some((start, end)) => {
            let start = parse_addr(start)?;
            let end = parse_addr(end)?;
            let (first, last) = (u32::from(start), u32::from(end));
            if first > last {
                return Err(PoolEntryError::ReversedRange { start, end });
            }
            if u64::from(last - first) + 1 > MAX_RANGE_LEN {
                return Err(PoolEntryError::RangeTooLarge);
            }
            Ok((first..=last).map(Ipv4Addr::from).collect())
        }
        None => Ok(vec![parse_addr(entry)?]),
    }
}

fn parse_addr(text: &str) -> Result<Ipv4Addr, PoolEntryError> {
    text.parse::<Ipv4Addr>()
        .map_err(|source| PoolEntryError::InvalidAddress {
            text: text.to_string(),
            source,
        })
}
