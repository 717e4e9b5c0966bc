use anyhow::Result;
use vcd_kernel::{AttrMap, Plan, attrs};
use vcd_resources::kinds::IPSEC_VPN_TUNNEL;
use vcd_sdk::ConfigSection;

#[path = "helpers.rs"]
mod helpers;
use helpers::{World, id_of, world};

fn tunnel(world: &World, profile: Option<AttrMap>) -> AttrMap {
    let mut desired = attrs! {
        "org" => helpers::ORG,
        "edge_gateway_id" => world.edge.to_string(),
        "name" => "to-branch",
        "pre_shared_key" => "s3cret",
        "local_ip_address" => "10.150.0.10",
        "local_networks" => vec!["10.10.10.0/24".to_string()],
        "remote_ip_address" => "1.2.3.4",
        "remote_networks" => vec!["192.168.10.0/24".to_string()],
    };
    if let Some(profile) = profile {
        desired.insert("security_profile_customization".into(), vec![profile].into());
    }
    desired
}

fn custom() -> AttrMap {
    attrs! {
        "ike_version" => "IKE_V2",
        "ike_encryption_algorithms" => vec!["AES_128".to_string()],
        "ike_digest_algorithms" => vec!["SHA2_256".to_string()],
        "ike_dh_groups" => vec!["GROUP14".to_string()],
        "ike_sa_lifetime" => 86400,
        "tunnel_pfs_enabled" => true,
        "tunnel_df_policy" => "COPY",
        "tunnel_encryption_algorithms" => vec!["AES_256".to_string()],
        "tunnel_digest_algorithms" => vec!["SHA2_256".to_string()],
        "tunnel_dh_groups" => vec!["GROUP14".to_string()],
        "tunnel_sa_lifetime" => 3600,
        "dpd_probe_internal" => 30,
    }
}

#[tokio::test]
async fn security_profile_goes_custom_and_back() -> Result<()> {
    let world = world();

    let created = world.create(IPSEC_VPN_TUNNEL, tunnel(&world, None)).await?;
    let id = id_of(&created);
    assert_eq!(created.get_str("security_type"), Some("DEFAULT"));
    assert!(created.get_records("security_profile_customization").is_empty());

    let desired = tunnel(&world, Some(custom()));
    let customized = world.update(IPSEC_VPN_TUNNEL, &created, desired.clone()).await?;
    assert_eq!(id_of(&customized), id);
    assert_eq!(customized.get_str("security_type"), Some("CUSTOM"));
    assert_eq!(
        world.vcd.config(&id, ConfigSection::IpsecSecurityProfile)["securityType"],
        "CUSTOM"
    );
    let read = world.read(IPSEC_VPN_TUNNEL, &customized).await?;
    let plan = world
        .kernel
        .plan(IPSEC_VPN_TUNNEL, Some(&read.state()), &desired)?;
    assert_eq!(plan, Plan::NoOp);

    let desired = tunnel(&world, None);
    let reverted = world.update(IPSEC_VPN_TUNNEL, &read, desired.clone()).await?;
    assert_eq!(reverted.get_str("security_type"), Some("DEFAULT"));
    assert!(reverted.get_records("security_profile_customization").is_empty());
    let read = world.read(IPSEC_VPN_TUNNEL, &reverted).await?;
    let plan = world
        .kernel
        .plan(IPSEC_VPN_TUNNEL, Some(&read.state()), &desired)?;
    assert_eq!(plan, Plan::NoOp);
    Ok(())
}

#[tokio::test]
async fn custom_profile_at_create_is_written_once() -> Result<()> {
    let world = world();
    let created = world
        .create(IPSEC_VPN_TUNNEL, tunnel(&world, Some(custom())))
        .await?;
    let id = id_of(&created);
    assert_eq!(created.get_str("security_type"), Some("CUSTOM"));
    let writes = world
        .vcd
        .calls()
        .iter()
        .filter(|call| call.op == "put_config" && call.target.as_ref() == Some(&id))
        .count();
    assert_eq!(writes, 1);
    Ok(())
}

#[tokio::test]
async fn tunnel_imports_by_name() -> Result<()> {
    let world = world();
    let created = world.create(IPSEC_VPN_TUNNEL, tunnel(&world, None)).await?;
    let imported = world
        .import(IPSEC_VPN_TUNNEL, "acme.vdc-nsxt.edge-1.to-branch")
        .await?;
    assert_eq!(imported.id(), created.id());
    assert_eq!(imported.get_str("remote_ip_address"), Some("1.2.3.4"));
    assert_eq!(imported.get_str("security_type"), Some("DEFAULT"));
    Ok(())
}
