//! Reusable per-value validators for schema attributes.

use std::net::{IpAddr, Ipv4Addr};

use vcd_sdk::Urn;

use crate::value::AttrValue;

fn text(value: &AttrValue) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected string, got {}", value.type_name()))
}

pub fn ip_address(value: &AttrValue) -> Result<(), String> {
    let raw = text(value)?;
    raw.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| format!("'{raw}' is not an IP address"))
}

pub fn ipv4_address(value: &AttrValue) -> Result<(), String> {
    let raw = text(value)?;
    raw.parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| format!("'{raw}' is not an IPv4 address"))
}

/// `a.b.c.d/n`, `a.b.c.d` or an IPv6 equivalent.
pub fn ip_or_cidr(value: &AttrValue) -> Result<(), String> {
    let raw = text(value)?;
    let (addr, prefix) = match raw.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (raw, None),
    };
    let ip: IpAddr = addr
        .parse()
        .map_err(|_| format!("'{raw}' is not an IP address or CIDR"))?;
    if let Some(prefix) = prefix {
        let max = if ip.is_ipv4() { 32 } else { 128 };
        match prefix.parse::<u8>() {
            Ok(n) if n <= max => {}
            _ => return Err(format!("'{raw}' has an invalid prefix length")),
        }
    }
    Ok(())
}

pub fn prefix_length(value: &AttrValue) -> Result<(), String> {
    match value.as_int() {
        Some(n) if (0..=32).contains(&n) => Ok(()),
        _ => Err("must be between 0 and 32".into()),
    }
}

pub fn non_empty(value: &AttrValue) -> Result<(), String> {
    match text(value)?.trim() {
        "" => Err("must not be empty".into()),
        _ => Ok(()),
    }
}

pub fn urn(value: &AttrValue) -> Result<(), String> {
    Urn::parse(text(value)?).map(|_| ()).map_err(|err| err.to_string())
}

/// A port (`80`) or an inclusive range (`8000-8080`).
pub fn port_or_range(value: &AttrValue) -> Result<(), String> {
    let raw = text(value)?;
    let port = |p: &str| {
        p.trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| format!("'{raw}' is not a port or port range"))
    };
    match raw.split_once('-') {
        Some((lo, hi)) => {
            if port(lo)? > port(hi)? {
                return Err(format!("'{raw}' has a range that ends before it starts"));
            }
            Ok(())
        }
        None => port(raw).map(|_| ()),
    }
}

/// Building block for enum-like string attributes.
pub fn one_of(value: &AttrValue, allowed: &[&str]) -> Result<(), String> {
    let raw = text(value)?;
    if allowed.contains(&raw) {
        Ok(())
    } else {
        Err(format!("'{raw}' must be one of {}", allowed.join(", ")))
    }
}

pub fn positive(value: &AttrValue) -> Result<(), String> {
    match value.as_int() {
        Some(n) if n > 0 => Ok(()),
        _ => Err("must be a positive integer".into()),
    }
}

/// Every element of a string set must be an IP address.
pub fn ip_addresses(value: &AttrValue) -> Result<(), String> {
    match value {
        AttrValue::Set(items) => items
            .iter()
            .try_for_each(|ip| ip_address(&AttrValue::String(ip.clone()))),
        AttrValue::List(items) => items
            .iter()
            .try_for_each(|ip| ip_address(&AttrValue::String(ip.clone()))),
        other => ip_address(other),
    }
}

/// Every element of a string set must be a port or range.
pub fn ports(value: &AttrValue) -> Result<(), String> {
    match value {
        AttrValue::Set(items) => items
            .iter()
            .try_for_each(|p| port_or_range(&AttrValue::String(p.clone()))),
        AttrValue::List(items) => items
            .iter()
            .try_for_each(|p| port_or_range(&AttrValue::String(p.clone()))),
        other => port_or_range(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_and_ports() {
        assert!(ip_or_cidr(&"10.0.0.0/24".into()).is_ok());
        assert!(ip_or_cidr(&"10.0.0.0/33".into()).is_err());
        assert!(ip_or_cidr(&"fe80::1/64".into()).is_ok());
        assert!(port_or_range(&"8000-8080".into()).is_ok());
        assert!(port_or_range(&"9000-80".into()).is_err());
        assert!(port_or_range(&"0".into()).is_err());
        assert!(ports(&AttrValue::set(["22", "443", "8000-8100"])).is_ok());
        assert!(urn(&"urn:vcloud:gateway:1".into()).is_ok());
        assert!(urn(&"gateway-1".into()).is_err());
        assert!(ip_addresses(&AttrValue::set(["10.0.0.1", "fe80::1"])).is_ok());
        assert!(one_of(&"DNAT".into(), &["DNAT", "SNAT"]).is_ok());
        assert!(one_of(&"dnat".into(), &["DNAT", "SNAT"]).unwrap_err().contains("DNAT, SNAT"));
        assert!(ip_addresses(&AttrValue::set(["10.0.0.1", "dns.example"])).is_err());
    }
}
