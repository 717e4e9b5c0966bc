//! Attribute sets and lookups shared by several kinds.

use serde_json::Value;
use vcd_kernel::identity::child_by_name;
use vcd_kernel::{
    Attribute, CandidateTable, ImportPath, KernelError, KernelResult, ResourceData, Session,
    VdcOrGroup, validate,
};
use vcd_sdk::{Entity, EntityKind, Query, Urn};

pub const ORG: &str = "org";
pub const VDC: &str = "vdc";
pub const OWNER_ID: &str = "owner_id";
pub const EDGE_GATEWAY_ID: &str = "edge_gateway_id";
pub const NAME: &str = "name";
pub const DESCRIPTION: &str = "description";

pub fn org() -> Attribute {
    Attribute::string(ORG)
        .force_new()
        .describe("Org name; defaults to the provider org")
}

/// `vdc` and `owner_id` for kinds that live in a VDC or a VDC group.
pub fn owner() -> [Attribute; 2] {
    [
        Attribute::string(VDC)
            .force_new()
            .conflicts_with(&[OWNER_ID])
            .deprecated("`vdc` can only name a VDC; use `owner_id`, which also accepts VDC groups")
            .describe("VDC name; defaults to the provider VDC"),
        Attribute::string(OWNER_ID)
            .optional_computed()
            .force_new()
            .validate(validate::urn)
            .describe("URN of the owning VDC or VDC group"),
    ]
}

pub fn edge_gateway_id() -> Attribute {
    Attribute::string(EDGE_GATEWAY_ID)
        .required()
        .force_new()
        .validate(validate::urn)
        .describe("Edge gateway URN")
}

pub fn name() -> Attribute {
    Attribute::string(NAME).required().validate(validate::non_empty)
}

pub fn description() -> Attribute {
    Attribute::string(DESCRIPTION)
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// String at a JSON pointer; empty strings count as absent.
pub fn str_at<'a>(body: &'a Value, pointer: &str) -> Option<&'a str> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub fn bool_at(body: &Value, pointer: &str) -> bool {
    body.pointer(pointer).and_then(Value::as_bool).unwrap_or(false)
}

pub fn int_at(body: &Value, pointer: &str) -> Option<i64> {
    body.pointer(pointer).and_then(Value::as_i64)
}

/// Strings in the array at `pointer`; non-strings are skipped.
pub fn strings_at(body: &Value, pointer: &str) -> Vec<String> {
    body.pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Optional string as JSON, `null` when unset.
pub fn opt_str(bag: &ResourceData, name: &str) -> Value {
    bag.get_str(name)
        .map_or(Value::Null, |s| Value::String(s.to_string()))
}

/// Lowercased copy of a string read from the remote.
pub fn canonical(raw: Option<&str>) -> Option<String> {
    raw.map(str::to_ascii_lowercase)
}

/// URN in `attr`, lowercased like the remote returns it.
pub fn urn_attr(bag: &ResourceData, attr: &str) -> KernelResult<Urn> {
    let raw = bag.require_str(attr)?;
    Urn::parse(raw).map_err(|err| KernelError::validation(format!("`{attr}`: {err}")))
}

// ---------------------------------------------------------------------------
// Import helpers
// ---------------------------------------------------------------------------

/// Org and VDC-or-group named by the first two path segments.
pub async fn owner_from_path(session: &Session, path: &ImportPath) -> KernelResult<(Entity, VdcOrGroup)> {
    let resolver = session.resolver();
    let org = resolver.org_by_name(path.segment(0)).await?;
    let owner = resolver.lookup_vdc_or_group(&org, path.segment(1)).await?;
    Ok((org, owner))
}

/// Org, owner and edge gateway named by the first three path segments.
pub async fn edge_from_path(session: &Session, path: &ImportPath) -> KernelResult<(Entity, VdcOrGroup, Entity)> {
    let (org, owner) = owner_from_path(session, path).await?;
    let edge = owner.edge_gateway_by_name(session, path.segment(2)).await?;
    Ok((org, owner, edge))
}

/// Child named by the last segment, or addressed directly by URN.
pub async fn child_from_path(
    session: &Session,
    parent: &Urn,
    kind: EntityKind,
    path: &ImportPath,
) -> KernelResult<Entity> {
    match path.last_as_urn() {
        Some(urn) => {
            let entity = session.fetch(&urn).await?;
            if entity.kind != kind || entity.parent.as_ref() != Some(parent) {
                return Err(KernelError::not_found(format!("{kind} {urn} under {parent}")));
            }
            Ok(entity)
        }
        None => child_by_name(session, parent, kind, path.last()).await,
    }
}

/// Single match of `query`; several matches render a candidate table built
/// by `row`.
pub async fn find_unique<F>(
    session: &Session,
    query: Query,
    headers: &[&'static str],
    row: F,
) -> KernelResult<Entity>
where
    F: Fn(&Entity) -> Vec<String>,
{
    let name = query.name.clone().unwrap_or_default();
    let kind = query.kind;
    let mut found = session.client.query(&session.ctx, &query).await?;
    match found.len() {
        0 => Err(KernelError::not_found(format!("{kind} '{name}'"))),
        1 => Ok(found.remove(0)),
        _ => {
            let mut table = CandidateTable::new(headers);
            for entity in &found {
                table.row(row(entity));
            }
            Err(table.into_error(&kind.to_string(), &name))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_helpers_treat_empty_as_absent() {
        let body = json!({"a": {"b": ""}, "c": "x", "l": ["1", 2, "3"], "n": 4});
        assert_eq!(str_at(&body, "/a/b"), None);
        assert_eq!(str_at(&body, "/c"), Some("x"));
        assert_eq!(strings_at(&body, "/l"), vec!["1", "3"]);
        assert_eq!(int_at(&body, "/n"), Some(4));
        assert!(!bool_at(&body, "/missing"));
        assert_eq!(canonical(Some("FE80::1/64")).as_deref(), Some("fe80::1/64"));
    }
}
