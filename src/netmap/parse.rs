use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use super::NetmapEntry;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NetmapParseError {
    #[error("address <{0}> is neither IPv4 (contains '.') nor IPv6 (contains ':')")]
    AmbiguousFamily(String),
    #[error("could not parse address <{0}>")]
    InvalidAddress(String),
    #[error("could not parse prefix length in <{0}>")]
    InvalidPrefix(String),
    #[error("prefix length {prefix} exceeds address length {length} bytes in <{token}>")]
    PrefixTooLong {
        token: String,
        prefix: u8,
        length: usize,
    },
    #[error("address <{0}> has non-zero bits outside its mask")]
    HostBitsSet(String),
}

pub fn parse_list(list: &str) -> Result<Vec<NetmapEntry>, NetmapParseError> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    list.split(',').map(|token| fill_entry(token.trim())).collect()
}

fn fill_entry(token: &str) -> Result<NetmapEntry, NetmapParseError> {
    let (addr_str, prefix_str) = match token.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (token, None),
    };

    let (address, length) =
        address_bytes(addr_str).ok_or_else(|| classify_address_error(addr_str))?;

    let max_prefix = (length * 8) as u8;
    let prefix = match prefix_str {
        Some(p) => p
            .parse::<u8>()
            .ok()
            .filter(|p| *p as usize <= length * 8)
            .ok_or_else(|| {
                if p.parse::<u32>().is_ok() {
                    NetmapParseError::PrefixTooLong {
                        token: token.to_owned(),
                        prefix: p.parse().unwrap_or(u8::MAX),
                        length,
                    }
                } else {
                    NetmapParseError::InvalidPrefix(token.to_owned())
                }
            })?,
        None => max_prefix,
    };

    let mask = build_mask(prefix, length);

    for i in 0..length {
        if address[i] & !mask[i] != 0 {
            return Err(NetmapParseError::HostBitsSet(token.to_owned()));
        }
    }

    Ok(NetmapEntry {
        length,
        address,
        mask,
        prefix,
    })
}

fn classify_address_error(addr_str: &str) -> NetmapParseError {
    if !addr_str.contains(':') && !addr_str.contains('.') {
        NetmapParseError::AmbiguousFamily(addr_str.to_owned())
    } else {
        NetmapParseError::InvalidAddress(addr_str.to_owned())
    }
}

/// Parses a bare address (no `/prefix`) into its byte form, dispatching on
/// family the way the original does: `:` means IPv6, `.` means IPv4,
/// neither is rejected (spec.md §4.A).
pub fn address_bytes(addr_str: &str) -> Option<([u8; 16], usize)> {
    if addr_str.contains(':') {
        let v6: Ipv6Addr = addr_str.parse().ok()?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&v6.octets());
        Some((bytes, 16))
    } else if addr_str.contains('.') {
        let v4: Ipv4Addr = addr_str.parse().ok()?;
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&v4.octets());
        Some((bytes, 4))
    } else {
        None
    }
}

fn build_mask(prefix: u8, length: usize) -> [u8; 16] {
    let mut mask = [0u8; 16];
    let mut remaining = prefix;
    for byte in mask.iter_mut().take(length) {
        if remaining >= 8 {
            *byte = 0xff;
            remaining -= 8;
        } else if remaining > 0 {
            *byte = !(0xffu8 >> remaining);
            remaining = 0;
        } else {
            break;
        }
    }
    mask
}

impl fmt::Display for NetmapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.length == 16 {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&self.address[..16]);
            write!(f, "{}/{}", Ipv6Addr::from(octets), self.prefix)
        } else {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&self.address[..4]);
            write!(f, "{}/{}", Ipv4Addr::from(octets), self.prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_accepts_exactly_its_block_size() {
        let entry = fill_entry("192.168.1.0/30").unwrap();
        let block: Vec<_> = (0..4)
            .map(|i| format!("192.168.1.{}", i))
            .filter(|a| {
                let (bytes, len) = address_bytes(a).unwrap();
                (0..len).all(|j| bytes[j] & entry.mask[j] == entry.address[j])
            })
            .collect();
        assert_eq!(block.len(), 4); // 2^(32-30) = 4
    }

    #[test]
    fn round_trip_preserves_normalized_form() {
        let entry = fill_entry("10.0.0.0/8").unwrap();
        assert_eq!(entry.to_string(), "10.0.0.0/8");

        let entry = fill_entry("2001:db8::/32").unwrap();
        assert_eq!(entry.to_string(), "2001:db8::/32");
    }

    #[test]
    fn no_prefix_round_trips_as_max_length() {
        let entry = fill_entry("192.168.1.1").unwrap();
        assert_eq!(entry.to_string(), "192.168.1.1/32");
    }

    #[test]
    fn host_bits_set_is_rejected_with_specific_error() {
        assert_eq!(
            fill_entry("203.0.113.5/24").unwrap_err(),
            NetmapParseError::HostBitsSet("203.0.113.5/24".to_owned())
        );
    }

    #[test]
    fn prefix_longer_than_address_is_rejected() {
        assert!(fill_entry("10.0.0.0/33").is_err());
    }
}
