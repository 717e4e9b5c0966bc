use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use vcd_kernel::{Kernel, KernelConfig, ProviderConfig};
use vcd_resources::{HostRequest, Provider, ProviderError, registry};
use vcd_sdk::OpContext;
use vcd_testkit::MemVcd;

#[path = "helpers.rs"]
mod helpers;

struct Host {
    vcd: MemVcd,
    provider: Provider,
    ctx: OpContext,
    edge: String,
}

fn host_with(separator: &str) -> Result<Host> {
    vcd_testkit::init_tracing();
    let vcd = MemVcd::new();
    let org = vcd.org(helpers::ORG);
    let vdc = vcd.vdc(&org, helpers::VDC, true);
    let edge = vcd.edge_gateway(&vdc, helpers::EDGE);
    let config = KernelConfig {
        import_separator: separator.to_string(),
        ..KernelConfig::fast().with_defaults(Some(helpers::ORG), Some(helpers::VDC))
    };
    let kernel = Kernel::builder(Arc::new(vcd.clone()))
        .with_config(config)
        .build(registry()?);
    Ok(Host {
        vcd,
        provider: Provider::new(kernel),
        ctx: OpContext::new(),
        edge: edge.to_string(),
    })
}

impl Host {
    async fn send(&self, request: Value) -> Result<Value> {
        let raw = self.provider.handle_json(&self.ctx, &request.to_string()).await;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn has_errors(response: &Value) -> bool {
    response["diagnostics"]
        .as_array()
        .is_some_and(|diags| diags.iter().any(|d| d["severity"] == "error"))
}

#[tokio::test]
async fn json_round_trip_through_every_operation() -> Result<()> {
    let host = host_with(".")?;
    let config = json!({
        "org": helpers::ORG,
        "edge_gateway_id": host.edge,
        "name": "web",
        "rule_type": "DNAT",
        "external_address": "10.10.10.1",
        "internal_address": "192.168.1.10",
        "dnat_external_port": "8080",
    });

    let created = host
        .send(json!({"op": "create", "kind": "vcd_nsxt_nat_rule", "config": config}))
        .await?;
    assert!(!has_errors(&created), "{created}");
    let id = created["id"].as_str().unwrap_or_default().to_string();
    assert!(id.starts_with("urn:vcloud:"));
    assert_eq!(created["state"]["dnat_external_port"], "8080");

    let plan = host
        .send(json!({
            "op": "plan",
            "kind": "vcd_nsxt_nat_rule",
            "state": created["state"],
            "config": config,
        }))
        .await?;
    assert_eq!(plan["plan"]["action"], "no_op", "{plan}");

    let mut changed = config.clone();
    changed["rule_type"] = json!("NO_DNAT");
    let plan = host
        .send(json!({
            "op": "plan",
            "kind": "vcd_nsxt_nat_rule",
            "state": created["state"],
            "config": changed,
        }))
        .await?;
    assert_eq!(plan["plan"]["action"], "replace");
    assert_eq!(plan["plan"]["forced_by"], json!(["rule_type"]));

    let imported = host
        .send(json!({"op": "import", "kind": "vcd_nsxt_nat_rule", "path": "acme.vdc-nsxt.edge-1.web"}))
        .await?;
    assert_eq!(imported["id"], id.as_str());

    let deleted = host
        .send(json!({
            "op": "delete",
            "kind": "vcd_nsxt_nat_rule",
            "id": id,
            "state": created["state"],
        }))
        .await?;
    assert!(!has_errors(&deleted), "{deleted}");
    assert!(deleted.get("id").is_none());
    assert_eq!(host.vcd.count(vcd_sdk::EntityKind::NatRule), 0);

    let read = host
        .send(json!({
            "op": "read",
            "kind": "vcd_nsxt_nat_rule",
            "id": id,
            "state": created["state"],
        }))
        .await?;
    assert!(!has_errors(&read));
    assert!(read.get("id").is_none(), "gone objects come back without an ID");
    Ok(())
}

#[tokio::test]
async fn custom_import_separator() -> Result<()> {
    let host = host_with("/")?;
    host.send(json!({
        "op": "create",
        "kind": "vcd_network_routed_v2",
        "config": {
            "edge_gateway_id": host.edge,
            "name": "app.v2",
            "gateway": "10.2.0.1",
            "prefix_length": 24,
        },
    }))
    .await?;

    let imported = host
        .send(json!({
            "op": "import",
            "kind": "vcd_network_routed_v2",
            "path": "acme/vdc-nsxt/app.v2",
        }))
        .await?;
    assert!(!has_errors(&imported), "{imported}");
    assert_eq!(imported["state"]["name"], "app.v2");
    Ok(())
}

#[tokio::test]
async fn unknown_kind_and_bad_json_become_diagnostics() -> Result<()> {
    let host = host_with(".")?;

    let unknown = host
        .send(json!({"op": "create", "kind": "vcd_nsxt_alb_pool", "config": {}}))
        .await?;
    assert!(has_errors(&unknown));
    assert!(unknown["diagnostics"][0]["summary"]
        .as_str()
        .unwrap_or_default()
        .contains("vcd_nsxt_alb_pool"));

    let raw = host.provider.handle_json(&host.ctx, "{not json").await;
    let response: Value = serde_json::from_str(&raw)?;
    assert!(has_errors(&response));

    let err = host
        .provider
        .handle(
            &host.ctx,
            HostRequest::Create {
                kind: "vcd_nsxt_nat_rule".into(),
                config: vcd_kernel::attrs! {"name" => 42},
            },
        )
        .await
        .expect_err("a number is not a name");
    assert!(matches!(err, ProviderError::Kernel(_)));
    Ok(())
}

#[tokio::test]
async fn provider_config_is_checked_before_use() {
    let vcd = MemVcd::new();
    let missing_credentials = ProviderConfig {
        url: "https://vcd.example.com/api".into(),
        ..ProviderConfig::default()
    };
    let err = Provider::from_config(Arc::new(vcd.clone()), &missing_credentials)
        .err()
        .expect("no credentials");
    assert!(err.to_string().contains("no credentials configured"));

    let good = ProviderConfig {
        url: "https://vcd.example.com/api".into(),
        api_token: Some("t0ken".into()),
        org: Some(helpers::ORG.into()),
        ..ProviderConfig::default()
    };
    let provider = Provider::from_config(Arc::new(vcd), &good).expect("valid config");
    assert_eq!(provider.kernel().config().default_org.as_deref(), Some(helpers::ORG));
}
