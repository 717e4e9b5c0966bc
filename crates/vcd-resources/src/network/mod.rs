//! Org VDC networks on the OpenAPI `networks` endpoint.
//!
//! The three network kinds share a subnet block: one gateway and prefix,
//! optional DNS settings and any number of static IP pools.

use std::net::Ipv4Addr;

use serde_json::{Value, json};
use vcd_kernel::{
    AttrMap, Attribute, KernelError, KernelResult, RecordExt, ResourceData, Schema, attrs,
    validate,
};
use vcd_sdk::Entity;

use crate::common::{canonical, int_at, opt_str, str_at};

pub mod imported;
pub mod isolated;
pub mod routed;

pub use imported::ImportedNetwork;
pub use isolated::IsolatedNetwork;
pub use routed::{RoutedNetwork, RoutedNetworkData};

pub const STATIC_IP_POOL: &str = "static_ip_pool";

fn pool_schema() -> Schema {
    Schema::new([
        Attribute::string("start_address")
            .required()
            .validate(validate::ipv4_address),
        Attribute::string("end_address")
            .required()
            .validate(validate::ipv4_address),
    ])
}

pub(crate) fn subnet_attributes() -> Vec<Attribute> {
    vec![
        Attribute::string("gateway")
            .required()
            .force_new()
            .validate(validate::ipv4_address),
        Attribute::int("prefix_length")
            .required()
            .force_new()
            .validate(validate::prefix_length),
        Attribute::string("dns1").validate(validate::ip_address),
        Attribute::string("dns2").validate(validate::ip_address),
        Attribute::string("dns_suffix"),
        Attribute::records(STATIC_IP_POOL, pool_schema())
            .unordered()
            .describe("IP ranges handed out to connected VMs"),
    ]
}

/// Same attributes, all computed, for data sources.
pub(crate) fn computed_subnet_attributes() -> Vec<Attribute> {
    vec![
        Attribute::string("gateway").computed(),
        Attribute::int("prefix_length").computed(),
        Attribute::string("dns1").computed(),
        Attribute::string("dns2").computed(),
        Attribute::string("dns_suffix").computed(),
        Attribute::records(STATIC_IP_POOL, pool_schema()).computed(),
    ]
}

pub(crate) fn check_pools(bag: &ResourceData) -> KernelResult<()> {
    for pool in bag.get_records(STATIC_IP_POOL) {
        let (Some(start), Some(end)) = (pool.str_of("start_address"), pool.str_of("end_address")) else {
            continue;
        };
        let (Ok(first), Ok(last)) = (start.parse::<Ipv4Addr>(), end.parse::<Ipv4Addr>()) else {
            continue;
        };
        if first > last {
            return Err(KernelError::validation(format!(
                "static_ip_pool {start}-{end} ends before it starts"
            )));
        }
    }
    Ok(())
}

pub(crate) fn subnet_payload(bag: &ResourceData) -> Value {
    let ranges: Vec<Value> = bag
        .get_records(STATIC_IP_POOL)
        .iter()
        .map(|pool| {
            json!({
                "startAddress": pool.str_of("start_address"),
                "endAddress": pool.str_of("end_address"),
            })
        })
        .collect();
    json!({
        "values": [{
            "gateway": opt_str(bag, "gateway"),
            "prefixLength": bag.get_int("prefix_length"),
            "dnsServer1": bag.get_string("dns1"),
            "dnsServer2": bag.get_string("dns2"),
            "dnsSuffix": bag.get_string("dns_suffix"),
            "ipRanges": {"values": ranges},
        }]
    })
}

pub(crate) fn read_subnet(entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
    let subnet = entity
        .body
        .pointer("/subnets/values/0")
        .cloned()
        .unwrap_or(Value::Null);
    bag.set("gateway", canonical(str_at(&subnet, "/gateway")))?;
    bag.set("prefix_length", int_at(&subnet, "/prefixLength"))?;
    bag.set("dns1", canonical(str_at(&subnet, "/dnsServer1")))?;
    bag.set("dns2", canonical(str_at(&subnet, "/dnsServer2")))?;
    bag.set("dns_suffix", str_at(&subnet, "/dnsSuffix"))?;
    let pools: Vec<AttrMap> = subnet
        .pointer("/ipRanges/values")
        .and_then(Value::as_array)
        .map(|ranges| {
            ranges
                .iter()
                .map(|range| {
                    attrs! {
                        "start_address" => canonical(str_at(range, "/startAddress")),
                        "end_address" => canonical(str_at(range, "/endAddress")),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    bag.set(STATIC_IP_POOL, pools)
}

/// Common name, description and owner fields.
pub(crate) fn read_common(entity: &Entity, bag: &mut ResourceData) -> KernelResult<()> {
    bag.set("name", entity.name.as_str())?;
    bag.set("description", str_at(&entity.body, "/description"))?;
    bag.set("owner_id", str_at(&entity.body, "/ownerRef/id"))
}

pub(crate) fn ensure_network_type(network: &Entity, expected: &str) -> KernelResult<()> {
    match str_at(&network.body, "/networkType") {
        Some(actual) if actual == expected => Ok(()),
        other => Err(KernelError::validation(format!(
            "network '{}' is of type {}, expected {expected}",
            network.name,
            other.unwrap_or("unknown")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn bag(desired: AttrMap) -> ResourceData {
        ResourceData::for_create(Arc::new(Schema::new(subnet_attributes())), desired)
    }

    #[test]
    fn reversed_pool_is_rejected() {
        let reversed = bag(attrs! {
            "gateway" => "10.0.0.1",
            "prefix_length" => 24,
            STATIC_IP_POOL => vec![attrs! {"start_address" => "10.0.0.20", "end_address" => "10.0.0.10"}],
        });
        assert!(check_pools(&reversed).unwrap_err().to_string().contains("ends before"));
    }

    #[test]
    fn payload_carries_ranges_in_declared_order() {
        let bag = bag(attrs! {
            "gateway" => "10.0.0.1",
            "prefix_length" => 24,
            STATIC_IP_POOL => vec![
                attrs! {"start_address" => "10.0.0.30", "end_address" => "10.0.0.40"},
                attrs! {"start_address" => "10.0.0.10", "end_address" => "10.0.0.20"},
            ],
        });
        let payload = subnet_payload(&bag);
        assert_eq!(payload["values"][0]["prefixLength"], 24);
        assert_eq!(
            payload["values"][0]["ipRanges"]["values"][1]["startAddress"],
            "10.0.0.10"
        );
        assert_eq!(payload["values"][0]["dnsServer1"], "");
    }
}
