//! Declared attribute schema for a resource kind.
//!
//! A schema is built once at registry construction and shared through `Arc`.
//! It owns type checking, relation checks (conflicts / required-with /
//! exactly-one-of), API-version gates and the plan computation that enforces
//! the force-new rule.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use vcd_sdk::ApiVersion;

use crate::error::{KernelError, KernelResult};
use crate::value::{AttrMap, AttrValue, normalized};

pub type Validator = fn(&AttrValue) -> Result<(), String>;

#[derive(Debug, Clone)]
pub enum AttrType {
    String,
    Int,
    Bool,
    StringSet,
    StringList,
    /// Free-form string to string map.
    StringMap,
    Record(Arc<Schema>),
    RecordList(Arc<Schema>),
}

impl AttrType {
    pub fn name(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Int => "integer",
            AttrType::Bool => "boolean",
            AttrType::StringSet => "set of strings",
            AttrType::StringList => "list of strings",
            AttrType::StringMap => "map of strings",
            AttrType::Record(_) => "record",
            AttrType::RecordList(_) => "list of records",
        }
    }

    /// Re-shape a host-supplied value into this type.
    ///
    /// Only lossless conversions are performed: arrays become sets or lists,
    /// an empty array becomes an empty record list, and nested records are
    /// coerced recursively.
    pub fn coerce(&self, value: AttrValue) -> Result<AttrValue, String> {
        let mismatch = |v: &AttrValue| format!("expected {}, got {}", self.name(), v.type_name());
        match (self, value) {
            (_, AttrValue::Null) => Ok(AttrValue::Null),
            (AttrType::String, v @ AttrValue::String(_)) => Ok(v),
            (AttrType::Int, v @ AttrValue::Int(_)) => Ok(v),
            (AttrType::Bool, v @ AttrValue::Bool(_)) => Ok(v),
            (AttrType::StringSet, AttrValue::List(items)) => Ok(AttrValue::Set(items.into_iter().collect())),
            (AttrType::StringSet, v @ AttrValue::Set(_)) => Ok(v),
            (AttrType::StringList, v @ AttrValue::List(_)) => Ok(v),
            (AttrType::StringList, AttrValue::Set(items)) => Ok(AttrValue::List(items.into_iter().collect())),
            (AttrType::StringMap, AttrValue::Record(map)) => {
                match map.iter().find(|(_, v)| !matches!(v, AttrValue::String(_))) {
                    Some((key, v)) => Err(format!("map value for '{key}' must be a string, got {}", v.type_name())),
                    None => Ok(AttrValue::Record(map)),
                }
            }
            (AttrType::Record(schema), AttrValue::Record(map)) => Ok(AttrValue::Record(schema.coerce(map)?)),
            (AttrType::RecordList(_), AttrValue::List(items)) if items.is_empty() => Ok(AttrValue::Records(Vec::new())),
            (AttrType::RecordList(schema), AttrValue::Records(records)) => records
                .into_iter()
                .map(|record| schema.coerce(record))
                .collect::<Result<Vec<_>, _>>()
                .map(AttrValue::Records),
            (_, other) => Err(mismatch(&other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    /// Written only by the kernel.
    Computed,
    /// User may set it; the kernel fills it in when they do not.
    OptionalComputed,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub ty: AttrType,
    pub presence: Presence,
    pub force_new: bool,
    pub sensitive: bool,
    pub default: Option<AttrValue>,
    pub conflicts_with: Vec<&'static str>,
    pub required_with: Vec<&'static str>,
    pub exactly_one_of: Vec<&'static str>,
    pub validators: Vec<Validator>,
    pub min_api_version: Option<ApiVersion>,
    pub max_items: Option<usize>,
    /// Record lists compared as multisets.
    pub unordered: bool,
    pub deprecated: Option<&'static str>,
    pub description: &'static str,
}

impl Attribute {
    fn of(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Optional,
            force_new: false,
            sensitive: false,
            default: None,
            conflicts_with: Vec::new(),
            required_with: Vec::new(),
            exactly_one_of: Vec::new(),
            validators: Vec::new(),
            min_api_version: None,
            max_items: None,
            unordered: false,
            deprecated: None,
            description: "",
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::of(name, AttrType::String)
    }

    pub fn int(name: &'static str) -> Self {
        Self::of(name, AttrType::Int)
    }

    pub fn bool(name: &'static str) -> Self {
        Self::of(name, AttrType::Bool)
    }

    pub fn string_set(name: &'static str) -> Self {
        Self::of(name, AttrType::StringSet)
    }

    pub fn string_list(name: &'static str) -> Self {
        Self::of(name, AttrType::StringList)
    }

    pub fn string_map(name: &'static str) -> Self {
        Self::of(name, AttrType::StringMap)
    }

    pub fn record(name: &'static str, nested: Schema) -> Self {
        Self::of(name, AttrType::Record(Arc::new(nested)))
    }

    pub fn records(name: &'static str, nested: Schema) -> Self {
        Self::of(name, AttrType::RecordList(Arc::new(nested)))
    }

    pub fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    pub fn optional(mut self) -> Self {
        self.presence = Presence::Optional;
        self
    }

    pub fn computed(mut self) -> Self {
        self.presence = Presence::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.presence = Presence::OptionalComputed;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn default(mut self, value: impl Into<AttrValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn conflicts_with(mut self, others: &[&'static str]) -> Self {
        self.conflicts_with.extend_from_slice(others);
        self
    }

    pub fn required_with(mut self, others: &[&'static str]) -> Self {
        self.required_with.extend_from_slice(others);
        self
    }

    /// `group` must list every member, including this attribute.
    pub fn exactly_one_of(mut self, group: &[&'static str]) -> Self {
        self.exactly_one_of.extend_from_slice(group);
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn min_api_version(mut self, major: u16, minor: u16) -> Self {
        self.min_api_version = Some(ApiVersion::new(major, minor));
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn unordered(mut self) -> Self {
        self.unordered = true;
        self
    }

    pub fn deprecated(mut self, message: &'static str) -> Self {
        self.deprecated = Some(message);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn is_computed_only(&self) -> bool {
        self.presence == Presence::Computed
    }

    pub fn user_settable(&self) -> bool {
        self.presence != Presence::Computed
    }
}

/// Result of comparing prior state with a desired declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Plan {
    NoOp,
    Create,
    Update { changed: Vec<String> },
    /// Destroy-before-create; lists the force-new attributes that changed.
    Replace { forced_by: Vec<String> },
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    attrs: IndexMap<&'static str, Attribute>,
}

impl Schema {
    pub fn new(attrs: impl IntoIterator<Item = Attribute>) -> Self {
        Self {
            attrs: attrs.into_iter().map(|a| (a.name, a)).collect(),
        }
    }

    /// Append attributes shared by several kinds (metadata blocks, org field...).
    pub fn with(mut self, attrs: impl IntoIterator<Item = Attribute>) -> Self {
        for attr in attrs {
            self.attrs.insert(attr.name, attr);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn default_of(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name).and_then(|a| a.default.as_ref())
    }

    pub fn is_force_new(&self, name: &str) -> bool {
        self.attrs.get(name).is_some_and(|a| a.force_new)
    }

    pub fn coerce(&self, raw: AttrMap) -> Result<AttrMap, String> {
        let mut out = AttrMap::new();
        for (name, value) in raw {
            let Some(attr) = self.attrs.get(name.as_str()) else {
                return Err(format!("unknown attribute `{name}`"));
            };
            let value = attr.ty.coerce(value).map_err(|e| format!("`{name}`: {e}"))?;
            out.insert(name, value);
        }
        Ok(out)
    }

    /// Check a desired declaration; every problem is reported in one error.
    pub fn validate(&self, desired: &AttrMap) -> KernelResult<()> {
        let mut problems = Vec::new();
        self.collect_problems("", desired, &mut problems);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(KernelError::Validation(problems.join("; ")))
        }
    }

    fn collect_problems(&self, prefix: &str, desired: &AttrMap, problems: &mut Vec<String>) {
        let is_set = |name: &str| normalized(desired.get(name)).is_some();

        for name in desired.keys() {
            if !self.attrs.contains_key(name.as_str()) {
                problems.push(format!("unknown attribute `{prefix}{name}`"));
            }
        }

        let mut reported_groups: BTreeSet<Vec<&'static str>> = BTreeSet::new();
        for attr in self.attrs.values() {
            let label = format!("{prefix}{}", attr.name);
            let value = normalized(desired.get(attr.name));

            match value {
                None => {
                    if attr.presence == Presence::Required && attr.default.is_none() {
                        problems.push(format!("attribute `{label}` is required"));
                    }
                }
                Some(value) => {
                    if attr.is_computed_only() {
                        problems.push(format!("attribute `{label}` is computed and cannot be set"));
                        continue;
                    }
                    if let Err(err) = attr.ty.coerce(value.clone()) {
                        problems.push(format!("`{label}`: {err}"));
                        continue;
                    }
                    for other in &attr.conflicts_with {
                        if is_set(other) {
                            problems.push(format!("`{label}` conflicts with `{prefix}{other}`"));
                        }
                    }
                    for other in &attr.required_with {
                        if !is_set(other) {
                            problems.push(format!("`{label}` requires `{prefix}{other}` to be set"));
                        }
                    }
                    if let Some(max) = attr.max_items {
                        let len = match value {
                            AttrValue::List(v) => v.len(),
                            AttrValue::Set(v) => v.len(),
                            AttrValue::Records(v) => v.len(),
                            _ => 0,
                        };
                        if len > max {
                            problems.push(format!("`{label}` accepts at most {max} item(s), got {len}"));
                        }
                    }
                    for validator in &attr.validators {
                        if let Err(err) = validator(value) {
                            problems.push(format!("`{label}`: {err}"));
                        }
                    }
                    match (&attr.ty, value) {
                        (AttrType::Record(nested), AttrValue::Record(map)) => {
                            nested.collect_problems(&format!("{label}."), map, problems);
                        }
                        (AttrType::RecordList(nested), AttrValue::Records(records)) => {
                            for (idx, record) in records.iter().enumerate() {
                                nested.collect_problems(&format!("{label}.{idx}."), record, problems);
                            }
                        }
                        _ => {}
                    }
                }
            }

            if !attr.exactly_one_of.is_empty() {
                let mut group = attr.exactly_one_of.clone();
                group.sort_unstable();
                if reported_groups.insert(group.clone()) {
                    let count = group.iter().filter(|name| is_set(name)).count();
                    if count != 1 {
                        let names: Vec<String> =
                            group.iter().map(|n| format!("`{prefix}{n}`")).collect();
                        problems.push(format!(
                            "exactly one of {} must be set, found {count}",
                            names.join(", ")
                        ));
                    }
                }
            }
        }
    }

    /// Reject attributes the connected API version cannot honour.
    pub fn check_api_version(&self, desired: &AttrMap, actual: ApiVersion) -> KernelResult<()> {
        for attr in self.attrs.values() {
            let Some(minimum) = attr.min_api_version else {
                continue;
            };
            if normalized(desired.get(attr.name)).is_some() && !actual.at_least(minimum) {
                return Err(KernelError::CapabilityMissing {
                    field: attr.name.to_string(),
                    minimum,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Names of deprecated attributes present in `desired`, with their notices.
    pub fn deprecations(&self, desired: &AttrMap) -> Vec<(&'static str, &'static str)> {
        self.attrs
            .values()
            .filter_map(|attr| {
                let notice = attr.deprecated?;
                normalized(desired.get(attr.name)).map(|_| (attr.name, notice))
            })
            .collect()
    }

    fn planned_value(&self, attr: &Attribute, map: &AttrMap) -> Option<AttrValue> {
        normalized(map.get(attr.name))
            .or_else(|| normalized(attr.default.as_ref()))
            .map(|value| canonical(attr, value))
    }

    /// Comparable form of a whole record: nested defaults filled in,
    /// kernel-computed fields and unset values dropped.
    pub fn canonical_record(&self, record: &AttrMap) -> AttrMap {
        self.attrs
            .values()
            .filter(|attr| !attr.is_computed_only())
            .filter_map(|attr| {
                self.planned_value(attr, record)
                    .map(|value| (attr.name.to_string(), value))
            })
            .collect()
    }

    /// Whether `name` differs between two maps under plan comparison.
    pub fn differs(&self, name: &str, before: &AttrMap, after: &AttrMap) -> bool {
        match self.attrs.get(name) {
            Some(attr) => self.planned_value(attr, before) != self.planned_value(attr, after),
            None => before.get(name) != after.get(name),
        }
    }

    /// Attributes whose desired value differs from prior state.
    ///
    /// Computed attributes never count; optional-computed ones count only when
    /// the declaration sets them.
    pub fn changed_attributes(&self, prior: &AttrMap, desired: &AttrMap) -> Vec<&'static str> {
        self.attrs
            .values()
            .filter(|attr| match attr.presence {
                Presence::Computed => false,
                Presence::OptionalComputed => normalized(desired.get(attr.name)).is_some(),
                Presence::Required | Presence::Optional => true,
            })
            .filter(|attr| self.differs(attr.name, prior, desired))
            .map(|attr| attr.name)
            .collect()
    }

    pub fn plan(&self, prior: Option<&AttrMap>, desired: &AttrMap) -> Plan {
        let Some(prior) = prior else {
            return Plan::Create;
        };
        let changed = self.changed_attributes(prior, desired);
        let forced_by: Vec<String> = changed
            .iter()
            .filter(|name| self.is_force_new(name))
            .map(|name| name.to_string())
            .collect();
        if !forced_by.is_empty() {
            Plan::Replace { forced_by }
        } else if changed.is_empty() {
            Plan::NoOp
        } else {
            Plan::Update {
                changed: changed.into_iter().map(String::from).collect(),
            }
        }
    }
}

fn canonical(attr: &Attribute, value: &AttrValue) -> AttrValue {
    match (&attr.ty, value) {
        (AttrType::RecordList(nested), AttrValue::Records(records)) => {
            let mut records: Vec<AttrMap> =
                records.iter().map(|r| nested.canonical_record(r)).collect();
            if attr.unordered {
                records.sort();
            }
            AttrValue::Records(records)
        }
        (AttrType::Record(nested), AttrValue::Record(record)) => {
            AttrValue::Record(nested.canonical_record(record))
        }
        (AttrType::StringSet, AttrValue::List(items)) => {
            AttrValue::Set(items.iter().cloned().collect())
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    fn schema() -> Schema {
        Schema::new([
            Attribute::string("name").required(),
            Attribute::string("edge_gateway_id").required().force_new(),
            Attribute::string("vdc").conflicts_with(&["owner_id"]),
            Attribute::string("owner_id").optional_computed(),
            Attribute::int("prefix_length").default(24),
            Attribute::string("href").computed(),
            Attribute::string("dnat_external_port").required_with(&["external_address"]),
            Attribute::string("external_address"),
            Attribute::records(
                "static_ip_pool",
                Schema::new([
                    Attribute::string("start_address").required(),
                    Attribute::string("end_address").required(),
                ]),
            ),
            Attribute::string("listener_ip").min_api_version(38, 0),
        ])
    }

    #[test]
    fn validate_collects_all_problems() {
        let err = schema()
            .validate(&attrs! {
                "vdc" => "vdc1",
                "owner_id" => "urn:vcloud:vdc:1",
                "href" => "x",
                "dnat_external_port" => "80",
                "static_ip_pool" => vec![attrs! {"start_address" => "1.1.1.1"}],
            })
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("`name` is required"));
        assert!(text.contains("`edge_gateway_id` is required"));
        assert!(text.contains("`vdc` conflicts with `owner_id`"));
        assert!(text.contains("`href` is computed"));
        assert!(text.contains("`dnat_external_port` requires `external_address`"));
        assert!(text.contains("`static_ip_pool.0.end_address` is required"));
    }

    #[test]
    fn exactly_one_of_reports_once_per_group() {
        let schema = Schema::new([
            Attribute::string("a").exactly_one_of(&["a", "b"]),
            Attribute::string("b").exactly_one_of(&["a", "b"]),
        ]);
        let err = schema.validate(&attrs! {"a" => "1", "b" => "2"}).unwrap_err();
        assert_eq!(err.to_string().matches("exactly one of").count(), 1);
        assert!(schema.validate(&attrs! {"b" => "2"}).is_ok());
    }

    #[test]
    fn plan_prefers_replace_for_force_new() {
        let schema = schema();
        let prior = attrs! {"name" => "a", "edge_gateway_id" => "urn:vcloud:gateway:1", "href" => "h"};
        let desired = attrs! {"name" => "b", "edge_gateway_id" => "urn:vcloud:gateway:2"};
        assert_eq!(
            schema.plan(Some(&prior), &desired),
            Plan::Replace {
                forced_by: vec!["edge_gateway_id".into()]
            }
        );
        let desired = attrs! {"name" => "b", "edge_gateway_id" => "urn:vcloud:gateway:1"};
        assert_eq!(
            schema.plan(Some(&prior), &desired),
            Plan::Update {
                changed: vec!["name".into()]
            }
        );
    }

    #[test]
    fn defaults_and_unset_values_do_not_show_as_changes() {
        let schema = schema();
        let prior = attrs! {"name" => "a", "edge_gateway_id" => "e", "prefix_length" => 24, "owner_id" => "o"};
        let desired = attrs! {"name" => "a", "edge_gateway_id" => "e", "static_ip_pool" => Vec::<AttrMap>::new()};
        assert_eq!(schema.plan(Some(&prior), &desired), Plan::NoOp);
    }

    #[test]
    fn unordered_records_compare_after_defaults() {
        let schema = Schema::new([Attribute::records(
            "metadata_entry",
            Schema::new([
                Attribute::string("id").computed(),
                Attribute::string("key").required(),
                Attribute::string("domain").default("TENANT"),
            ]),
        )
        .unordered()]);
        let prior = attrs! {"metadata_entry" => vec![
            attrs! {"id" => "2", "key" => "b", "domain" => "TENANT"},
            attrs! {"id" => "1", "key" => "a", "domain" => "TENANT"},
        ]};
        let desired = attrs! {"metadata_entry" => vec![attrs! {"key" => "a"}, attrs! {"key" => "b"}]};
        assert_eq!(schema.plan(Some(&prior), &desired), Plan::NoOp);
    }

    #[test]
    fn version_gate_names_field_and_minimum() {
        let err = schema()
            .check_api_version(&attrs! {"listener_ip" => "10.0.0.1"}, ApiVersion::new(37, 2))
            .unwrap_err();
        assert!(matches!(err, KernelError::CapabilityMissing { ref field, .. } if field == "listener_ip"));
        assert!(err.to_string().contains("38.0"));
    }

    #[test]
    fn coerce_turns_arrays_into_sets() {
        let schema = Schema::new([Attribute::string_set("local_networks")]);
        let coerced = schema
            .coerce(attrs! {"local_networks" => AttrValue::list(["b", "a", "a"])})
            .unwrap();
        assert_eq!(coerced["local_networks"], AttrValue::set(["a", "b"]));
    }
}
