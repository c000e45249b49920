//! CIDR membership engine used for whitelist and proxy-list bypass decisions
//! (spec.md §4.A).
//!
//! Entries are stored as fixed `[u8; 16]` address/mask pairs with an
//! explicit `length` of 4 or 16, deliberately not `IpAddr`/`ipnetwork`: the
//! spec's invariant ("no host bits set outside the mask") and the
//! normalized-round-trip test in §8 are checked directly against this byte
//! representation, and lists are small enough that a linear scan is the
//! right shape (spec.md §4.A).

mod parse;

pub use parse::NetmapParseError;

use tracing::warn;

/// One parsed `addr[/prefix]` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetmapEntry {
    pub length: usize,
    pub address: [u8; 16],
    pub mask: [u8; 16],
    pub prefix: u8,
}

/// An immutable CIDR list, built once at startup (spec.md §5).
#[derive(Debug, Clone, Default)]
pub struct Netmap {
    entries: Vec<NetmapEntry>,
}

impl Netmap {
    /// Parses a comma-separated `addr[/prefix]` list. Returns
    /// `NetmapParseError` on the first malformed token, consistent with
    /// "fatal for that list" (spec.md §7).
    pub fn parse(list: &str) -> Result<Self, NetmapParseError> {
        let entries = parse::parse_list(list)?;
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Membership test (spec.md §4.A): true iff some entry has equal length
    /// and the masked bytes match. Malformed *query* addresses (not parsed
    /// at startup, so this can't be a `NetmapParseError`) yield no-match
    /// with a logged warning rather than propagating an error, matching the
    /// fail-soft posture the rest of the core takes toward malformed input.
    pub fn is_in(&self, addr: &str) -> bool {
        match parse::address_bytes(addr) {
            Some((bytes, len)) => self
                .entries
                .iter()
                .any(|entry| entry.length == len && masked_eq(entry, &bytes, len)),
            None => {
                warn!(address = addr, "malformed address in membership test");
                false
            }
        }
    }
}

fn masked_eq(entry: &NetmapEntry, addr: &[u8; 16], len: usize) -> bool {
    (0..len).all(|i| (addr[i] & entry.mask[i]) == entry.address[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_v4_match() {
        let map = Netmap::parse("203.0.113.5").unwrap();
        assert!(map.is_in("203.0.113.5"));
        assert!(!map.is_in("203.0.113.6"));
    }

    #[test]
    fn cidr_v4_block_accepts_exactly_its_range() {
        let map = Netmap::parse("203.0.113.0/24").unwrap();
        assert!(map.is_in("203.0.113.0"));
        assert!(map.is_in("203.0.113.255"));
        assert!(!map.is_in("203.0.114.0"));
        assert!(!map.is_in("203.0.112.255"));
    }

    #[test]
    fn cidr_v6_block() {
        let map = Netmap::parse("2001:db8::/32").unwrap();
        assert!(map.is_in("2001:db8::1"));
        assert!(!map.is_in("2001:db9::1"));
    }

    #[test]
    fn host_bits_set_is_rejected() {
        assert!(Netmap::parse("203.0.113.5/24").is_err());
    }

    #[test]
    fn no_prefix_means_all_ones_mask() {
        let map = Netmap::parse("10.1.2.3").unwrap();
        assert!(map.is_in("10.1.2.3"));
        assert!(!map.is_in("10.1.2.4"));
    }

    #[test]
    fn malformed_token_is_neither_v4_nor_v6() {
        assert!(Netmap::parse("not-an-address").is_err());
    }

    #[test]
    fn mixed_family_list() {
        let map = Netmap::parse("10.0.0.0/8,2001:db8::/32").unwrap();
        assert!(map.is_in("10.5.5.5"));
        assert!(map.is_in("2001:db8::ffff"));
        assert!(!map.is_in("11.0.0.1"));
    }

    #[test]
    fn empty_list_matches_nothing() {
        let map = Netmap::parse("").unwrap();
        assert!(map.is_empty());
        assert!(!map.is_in("1.2.3.4"));
    }

    #[test]
    fn malformed_query_address_is_no_match_not_error() {
        let map = Netmap::parse("10.0.0.0/8").unwrap();
        assert!(!map.is_in("not-an-address"));
    }
}
