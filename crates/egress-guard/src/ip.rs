//! IP literal parsing and address classification.
//!
//! Browsers accept far more IPv4 spellings than dotted-decimal: a single
//! 32-bit integer (`2130706433`), hexadecimal (`0x7f000001`), octal parts
//! (`0177.0.0.1`) and short forms (`127.1`). Every one of them has to be
//! recognised before a hostname is treated as a name to resolve.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Why an address is not allowed as an egress destination.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddrCategory {
    Unspecified,
    Loopback,
    Private,
    LinkLocal,
    Multicast,
    Reserved,
}

impl AddrCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddrCategory::Unspecified => "unspecified",
            AddrCategory::Loopback => "loopback",
            AddrCategory::Private => "private",
            AddrCategory::LinkLocal => "link-local",
            AddrCategory::Multicast => "multicast",
            AddrCategory::Reserved => "reserved",
        }
    }
}

impl std::fmt::Display for AddrCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips `[...]` brackets and any IPv6 zone identifier (`%eth0`, `%25eth0`).
pub fn strip_brackets_and_zone(host: &str) -> &str {
    let inner = host
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(host);
    match inner.find('%') {
        Some(idx) if inner.contains(':') => &inner[..idx],
        _ => inner,
    }
}

/// Parses `host` as an IP literal in any representation a browser accepts.
///
/// Returns `None` when the host is a name that needs resolving.
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let host = strip_brackets_and_zone(host.trim());
    if host.is_empty() {
        return None;
    }
    if host.contains(':') {
        return host.parse::<Ipv6Addr>().ok().map(IpAddr::V6);
    }
    parse_ipv4_loose(host).map(IpAddr::V4)
}

fn parse_ipv4_loose(host: &str) -> Option<Ipv4Addr> {
    let host = host.strip_suffix('.').unwrap_or(host);
    let parts: Vec<&str> = host.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }
    let mut numbers = Vec::with_capacity(parts.len());
    for part in &parts {
        numbers.push(parse_ipv4_part(part)?);
    }

    let (head, last) = numbers.split_at(numbers.len() - 1);
    if head.iter().any(|value| *value > 0xff) {
        return None;
    }
    let tail_bits = 8 * (4 - head.len() as u32);
    let last = last[0];
    if tail_bits < 32 && last >= (1u64 << tail_bits) {
        return None;
    }
    if tail_bits == 32 && last > u32::MAX as u64 {
        return None;
    }

    let mut value: u64 = 0;
    for (idx, part) in head.iter().enumerate() {
        value |= part << (24 - 8 * idx as u32);
    }
    value |= last;
    Some(Ipv4Addr::from(value as u32))
}

fn parse_ipv4_part(part: &str) -> Option<u64> {
    if part.is_empty() {
        return None;
    }
    let lower = part.to_ascii_lowercase();
    let (digits, radix) = if let Some(hex) = lower.strip_prefix("0x") {
        (hex, 16)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (&lower[1..], 8)
    } else {
        (lower.as_str(), 10)
    };
    if digits.is_empty() {
        // "0x" alone is zero in the WHATWG host parser.
        return if radix == 16 { Some(0) } else { None };
    }
    if !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok().filter(|v| *v <= u32::MAX as u64)
}

/// Classifies an address; `None` means globally routable.
pub fn classify(ip: &IpAddr) -> Option<AddrCategory> {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

pub fn classify_v4(ip: &Ipv4Addr) -> Option<AddrCategory> {
    let [a, b, c, _] = ip.octets();
    if a == 0 {
        return Some(AddrCategory::Unspecified);
    }
    if a == 127 {
        return Some(AddrCategory::Loopback);
    }
    if a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168) {
        return Some(AddrCategory::Private);
    }
    if a == 169 && b == 254 {
        return Some(AddrCategory::LinkLocal);
    }
    if (224..=239).contains(&a) {
        return Some(AddrCategory::Multicast);
    }
    let reserved = (a == 100 && (64..=127).contains(&b))
        || (a == 192 && b == 0 && c == 0)
        || (a == 192 && b == 0 && c == 2)
        || (a == 192 && b == 88 && c == 99)
        || (a == 198 && (b == 18 || b == 19))
        || (a == 198 && b == 51 && c == 100)
        || (a == 203 && b == 0 && c == 113)
        || a >= 240;
    if reserved {
        return Some(AddrCategory::Reserved);
    }
    None
}

pub fn classify_v6(ip: &Ipv6Addr) -> Option<AddrCategory> {
    if ip.is_unspecified() {
        return Some(AddrCategory::Unspecified);
    }
    if ip.is_loopback() {
        return Some(AddrCategory::Loopback);
    }
    let segments = ip.segments();
    let octets = ip.octets();

    // ::ffff:a.b.c.d
    if segments[..5].iter().all(|s| *s == 0) && segments[5] == 0xffff {
        return classify_v4(&Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]));
    }
    // Deprecated IPv4-compatible form ::a.b.c.d
    if segments[..6].iter().all(|s| *s == 0) {
        return Some(
            classify_v4(&Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]))
                .unwrap_or(AddrCategory::Reserved),
        );
    }
    // NAT64 well-known prefix 64:ff9b::/96
    if segments[0] == 0x64 && segments[1] == 0xff9b && segments[2..6].iter().all(|s| *s == 0) {
        return classify_v4(&Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]));
    }
    // 6to4 2002::/16 embeds an IPv4 address in bits 16..48
    if segments[0] == 0x2002 {
        return classify_v4(&Ipv4Addr::new(octets[2], octets[3], octets[4], octets[5]));
    }
    if (segments[0] & 0xfe00) == 0xfc00 {
        return Some(AddrCategory::Private);
    }
    if (segments[0] & 0xffc0) == 0xfe80 {
        return Some(AddrCategory::LinkLocal);
    }
    if (segments[0] & 0xff00) == 0xff00 {
        return Some(AddrCategory::Multicast);
    }
    let reserved = (segments[0] & 0xffc0) == 0xfec0
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        || (segments[0] == 0x2001 && segments[1] < 0x0200)
        || (segments[0] == 0x0100 && segments[1..4].iter().all(|s| *s == 0))
        || (segments[0] == 0x64 && segments[1] == 0xff9b && segments[2] == 1)
        || (segments[0] & 0xe000) != 0x2000;
    if reserved {
        return Some(AddrCategory::Reserved);
    }
    None
}
