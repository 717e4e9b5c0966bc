//! Metadata engine for both remote generations.
//!
//! Legacy metadata is a flat string map. OpenAPI metadata entries are typed,
//! namespaced and carry a domain plus readonly / persistent flags; only the
//! value and the persistent flag can change in place.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use vcd_sdk::{LegacyMetadataEntry, MetadataDomain, MetadataEntry, MetadataType, Urn};

use crate::bag::ResourceData;
use crate::error::{KernelError, KernelResult};
use crate::schema::{Attribute, Schema};
use crate::session::Session;
use crate::value::{AttrMap, AttrValue, RecordExt};

pub const METADATA: &str = "metadata";
pub const INHERITED_METADATA: &str = "inherited_metadata";
pub const METADATA_ENTRY: &str = "metadata_entry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStyle {
    Legacy,
    OpenApi,
}

/// Primary key of an OpenAPI entry. Kept as a pair so that no separator can
/// make two different entries collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetadataKey {
    pub namespace: String,
    pub key: String,
}

impl MetadataKey {
    pub fn new(namespace: &str, key: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }
    }
}

/// OpenAPI entry as declared (or as read back, rendered to text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntry {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub ty: MetadataType,
    pub domain: MetadataDomain,
    pub readonly: bool,
    pub persistent: bool,
}

fn type_label(ty: MetadataType) -> &'static str {
    match ty {
        MetadataType::String => "MetadataStringValue",
        MetadataType::Number => "MetadataNumberValue",
        MetadataType::Boolean => "MetadataBooleanValue",
    }
}

impl DesiredEntry {
    pub fn string(namespace: &str, key: &str, value: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            ty: MetadataType::String,
            domain: MetadataDomain::Tenant,
            readonly: false,
            persistent: false,
        }
    }

    pub fn key(&self) -> MetadataKey {
        MetadataKey::new(&self.namespace, &self.key)
    }

    fn immutable_fields_differ(&self, other: &DesiredEntry) -> bool {
        self.ty != other.ty || self.domain != other.domain || self.readonly != other.readonly
    }

    pub fn from_remote(entry: &MetadataEntry) -> Self {
        Self {
            namespace: entry.namespace.clone(),
            key: entry.key.clone(),
            value: render_value(&entry.value),
            ty: entry.ty,
            domain: entry.domain,
            readonly: entry.readonly,
            persistent: entry.persistent,
        }
    }

    pub fn to_remote(&self) -> KernelResult<MetadataEntry> {
        Ok(MetadataEntry {
            id: None,
            etag: None,
            namespace: self.namespace.clone(),
            key: self.key.clone(),
            value: coerce_value(&self.key, &self.value, self.ty)?,
            ty: self.ty,
            domain: self.domain,
            readonly: self.readonly,
            persistent: self.persistent,
        })
    }

    pub fn from_record(record: &AttrMap) -> KernelResult<Self> {
        let key = record
            .str_of("key")
            .ok_or_else(|| KernelError::validation("metadata_entry.key is required"))?;
        let ty = match record.str_of("type") {
            Some(raw) => MetadataType::parse(raw).ok_or_else(|| {
                KernelError::validation(format!("metadata_entry '{key}': unknown type '{raw}'"))
            })?,
            None => MetadataType::String,
        };
        let domain = match record.str_of("domain") {
            Some(raw) => MetadataDomain::parse(raw).ok_or_else(|| {
                KernelError::validation(format!("metadata_entry '{key}': unknown domain '{raw}'"))
            })?,
            None => MetadataDomain::Tenant,
        };
        Ok(Self {
            namespace: record.str_of("namespace").unwrap_or_default().to_string(),
            key: key.to_string(),
            value: record.str_of("value").unwrap_or_default().to_string(),
            ty,
            domain,
            readonly: record.bool_of("readonly"),
            persistent: record.bool_of("persistent"),
        })
    }

    pub fn to_record(&self, id: Option<&str>) -> AttrMap {
        let mut record = crate::attrs! {
            "key" => self.key.as_str(),
            "value" => self.value.as_str(),
            "type" => type_label(self.ty),
            "domain" => self.domain.as_str(),
            "readonly" => self.readonly,
            "persistent" => self.persistent,
        };
        if !self.namespace.is_empty() {
            record.insert("namespace".into(), self.namespace.as_str().into());
        }
        if let Some(id) = id {
            record.insert("id".into(), id.into());
        }
        record
    }
}

/// Render a JSON-typed value the way it is stored in state.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => render_number(n),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Integers print exactly; whole floats (the remote echoes `12` as `12.0`)
/// drop the fraction; other floats keep their digits.
fn render_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => format!("{f:.0}"),
        _ => n.to_string(),
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Some(Value::from(u));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

pub fn coerce_value(key: &str, raw: &str, ty: MetadataType) -> KernelResult<Value> {
    match ty {
        MetadataType::String => Ok(Value::String(raw.to_string())),
        MetadataType::Number => parse_number(raw).ok_or_else(|| {
            KernelError::validation(format!("metadata '{key}': '{raw}' is not a number"))
        }),
        MetadataType::Boolean => match raw.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(KernelError::validation(format!(
                "metadata '{key}': '{raw}' is not a boolean"
            ))),
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDiff {
    pub deletes: Vec<MetadataKey>,
    pub creates: Vec<DesiredEntry>,
    pub updates: Vec<DesiredEntry>,
}

impl MetadataDiff {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty() && self.updates.is_empty()
    }
}

pub fn diff_openapi(old: &[DesiredEntry], new: &[DesiredEntry]) -> MetadataDiff {
    let old: BTreeMap<MetadataKey, &DesiredEntry> = old.iter().map(|e| (e.key(), e)).collect();
    let new: BTreeMap<MetadataKey, &DesiredEntry> = new.iter().map(|e| (e.key(), e)).collect();
    let mut diff = MetadataDiff::default();
    for (key, before) in &old {
        match new.get(key) {
            None => diff.deletes.push(key.clone()),
            Some(after) if before.immutable_fields_differ(after) => {
                diff.deletes.push(key.clone());
                diff.creates.push((*after).clone());
            }
            Some(after) if before != after => diff.updates.push((*after).clone()),
            Some(_) => {}
        }
    }
    for (key, after) in &new {
        if !old.contains_key(key) {
            diff.creates.push((*after).clone());
        }
    }
    diff
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyDiff {
    pub upserts: Vec<(String, String)>,
    pub deletes: Vec<String>,
}

pub fn diff_legacy(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> LegacyDiff {
    LegacyDiff {
        upserts: new
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        deletes: old.keys().filter(|k| !new.contains_key(*k)).cloned().collect(),
    }
}

/// Objects that carry OpenAPI metadata.
#[async_trait]
pub trait MetadataCapable: Send + Sync {
    async fn get_metadata(&self) -> KernelResult<Vec<MetadataEntry>>;

    async fn get_metadata_by_key(&self, key: &MetadataKey) -> KernelResult<Option<MetadataEntry>> {
        Ok(self
            .get_metadata()
            .await?
            .into_iter()
            .find(|e| e.namespace == key.namespace && e.key == key.key))
    }

    async fn get_metadata_by_id(&self, id: &str) -> KernelResult<MetadataEntry>;
    async fn add_metadata(&self, entry: &MetadataEntry) -> KernelResult<MetadataEntry>;
    async fn update_metadata(&self, entry: &MetadataEntry) -> KernelResult<MetadataEntry>;
    async fn delete_metadata(&self, id: &str) -> KernelResult<()>;
}

/// Objects that carry legacy metadata.
#[async_trait]
pub trait LegacyMetadataCapable: Send + Sync {
    async fn get_legacy_metadata(&self) -> KernelResult<Vec<LegacyMetadataEntry>>;
    async fn merge_legacy_metadata(&self, entries: &[(String, String)]) -> KernelResult<()>;
    async fn delete_legacy_metadata(&self, key: &str) -> KernelResult<()>;
}

/// Converge remote OpenAPI metadata onto `desired`.
///
/// Every entry is refetched right before it is mutated so the call carries a
/// current ETag.
pub async fn apply_openapi(
    target: &dyn MetadataCapable,
    desired: &[DesiredEntry],
) -> KernelResult<MetadataDiff> {
    let current: Vec<DesiredEntry> = target
        .get_metadata()
        .await?
        .iter()
        .map(DesiredEntry::from_remote)
        .collect();
    let diff = diff_openapi(&current, desired);
    debug!(
        deletes = diff.deletes.len(),
        updates = diff.updates.len(),
        creates = diff.creates.len(),
        "applying metadata"
    );

    for key in &diff.deletes {
        if let Some(fresh) = target.get_metadata_by_key(key).await? {
            let id = fresh.id.ok_or_else(|| {
                KernelError::payload(format!("metadata entry '{}' has no ID", key.key))
            })?;
            target.delete_metadata(&id).await?;
        }
    }
    for entry in &diff.updates {
        let fresh = target
            .get_metadata_by_key(&entry.key())
            .await?
            .ok_or_else(|| KernelError::not_found(format!("metadata entry '{}'", entry.key)))?;
        let fresh = match &fresh.id {
            Some(id) => target.get_metadata_by_id(id).await?,
            None => fresh,
        };
        let mut update = entry.to_remote()?;
        update.id = fresh.id;
        update.etag = fresh.etag;
        target.update_metadata(&update).await?;
    }
    for entry in &diff.creates {
        target.add_metadata(&entry.to_remote()?).await?;
    }
    Ok(diff)
}

/// Converge remote legacy metadata onto `desired`. Inherited entries are
/// never touched.
pub async fn apply_legacy(
    target: &dyn LegacyMetadataCapable,
    desired: &BTreeMap<String, String>,
) -> KernelResult<LegacyDiff> {
    let current: BTreeMap<String, String> = target
        .get_legacy_metadata()
        .await?
        .into_iter()
        .filter(|e| !e.inherited)
        .map(|e| (e.key, e.value))
        .collect();
    let diff = diff_legacy(&current, desired);
    for key in &diff.deletes {
        target.delete_legacy_metadata(key).await?;
    }
    if !diff.upserts.is_empty() {
        target.merge_legacy_metadata(&diff.upserts).await?;
    }
    Ok(diff)
}

fn string_map(value: Option<&AttrMap>) -> BTreeMap<String, String> {
    value
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn to_attr_map(map: BTreeMap<String, String>) -> AttrMap {
    map.into_iter().map(|(k, v)| (k, AttrValue::String(v))).collect()
}

/// Attributes a kind gets for its metadata style.
pub fn metadata_attributes(style: MetadataStyle) -> Vec<Attribute> {
    match style {
        MetadataStyle::Legacy => vec![
            Attribute::string_map(METADATA).describe("Key/value metadata"),
            Attribute::string_map(INHERITED_METADATA)
                .computed()
                .describe("Metadata the system attaches from parent objects"),
        ],
        MetadataStyle::OpenApi => vec![Attribute::records(METADATA_ENTRY, metadata_entry_schema()).unordered()],
    }
}

fn check_type(value: &AttrValue) -> Result<(), String> {
    match value.as_str().and_then(MetadataType::parse) {
        Some(_) => Ok(()),
        None => Err("must be one of MetadataStringValue, MetadataNumberValue, MetadataBooleanValue".into()),
    }
}

fn check_domain(value: &AttrValue) -> Result<(), String> {
    match value.as_str() {
        Some("TENANT" | "PROVIDER") => Ok(()),
        _ => Err("must be TENANT or PROVIDER".into()),
    }
}

pub fn metadata_entry_schema() -> Schema {
    Schema::new([
        Attribute::string("id").computed(),
        Attribute::string("namespace"),
        Attribute::string("key").required(),
        Attribute::string("value").required(),
        Attribute::string("type").default("MetadataStringValue").validate(check_type),
        Attribute::string("domain").default("TENANT").validate(check_domain),
        Attribute::bool("readonly").default(false),
        Attribute::bool("persistent").default(false),
    ])
}

/// Write the bag's declared metadata to `owner`.
pub async fn write_metadata(
    session: &Session,
    owner: &Urn,
    style: MetadataStyle,
    bag: &ResourceData,
) -> KernelResult<()> {
    let handle = session.handle(owner);
    match style {
        MetadataStyle::Legacy => {
            let desired = string_map(bag.get_record(METADATA));
            apply_legacy(&handle, &desired).await?;
        }
        MetadataStyle::OpenApi => {
            let desired = bag
                .get_records(METADATA_ENTRY)
                .iter()
                .map(DesiredEntry::from_record)
                .collect::<KernelResult<Vec<_>>>()?;
            apply_openapi(&handle, &desired).await?;
        }
    }
    Ok(())
}

/// Populate metadata attributes from the remote.
pub async fn read_metadata(
    session: &Session,
    owner: &Urn,
    style: MetadataStyle,
    bag: &mut ResourceData,
) -> KernelResult<()> {
    let handle = session.handle(owner);
    match style {
        MetadataStyle::Legacy => {
            let (inherited, own): (Vec<_>, Vec<_>) = handle
                .get_legacy_metadata()
                .await?
                .into_iter()
                .partition(|e| e.inherited);
            let own: BTreeMap<String, String> = own.into_iter().map(|e| (e.key, e.value)).collect();
            let inherited: BTreeMap<String, String> =
                inherited.into_iter().map(|e| (e.key, e.value)).collect();
            bag.set(METADATA, to_attr_map(own))?;
            bag.set(INHERITED_METADATA, to_attr_map(inherited))?;
        }
        MetadataStyle::OpenApi => {
            let mut entries = handle.get_metadata().await?;
            entries.sort_by(|a, b| (&a.namespace, &a.key).cmp(&(&b.namespace, &b.key)));
            let records: Vec<AttrMap> = entries
                .iter()
                .map(|e| DesiredEntry::from_remote(e).to_record(e.id.as_deref()))
                .collect();
            bag.set(METADATA_ENTRY, records)?;
        }
    }
    Ok(())
}

/// Name of the attribute that triggers a metadata write for `style`.
pub fn trigger_attribute(style: MetadataStyle) -> &'static str {
    match style {
        MetadataStyle::Legacy => METADATA,
        MetadataStyle::OpenApi => METADATA_ENTRY,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn entry(ns: &str, key: &str, ty: MetadataType, value: &str) -> DesiredEntry {
        DesiredEntry {
            ty,
            ..DesiredEntry::string(ns, key, value)
        }
    }

    #[test]
    fn type_change_is_delete_plus_create() {
        let old = [entry("x", "a", MetadataType::String, "1")];
        let new = [entry("x", "a", MetadataType::Number, "1")];
        let diff = diff_openapi(&old, &new);
        assert_eq!(diff.deletes, vec![MetadataKey::new("x", "a")]);
        assert_eq!(diff.creates, vec![new[0].clone()]);
        assert!(diff.updates.is_empty());
    }

    #[test]
    fn value_and_persistent_change_in_place() {
        let old = [entry("", "a", MetadataType::String, "1")];
        let mut changed = entry("", "a", MetadataType::String, "2");
        changed.persistent = true;
        let diff = diff_openapi(&old, std::slice::from_ref(&changed));
        assert_eq!(diff.updates, vec![changed]);
        assert!(diff.deletes.is_empty() && diff.creates.is_empty());
    }

    #[test]
    fn namespace_is_part_of_the_key() {
        // "a.b" + "c" and "a" + "b.c" must stay distinct.
        let old = [entry("a.b", "c", MetadataType::String, "1")];
        let new = [entry("a", "b.c", MetadataType::String, "1")];
        let diff = diff_openapi(&old, &new);
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.creates.len(), 1);
    }

    #[test]
    fn render_uses_zero_fraction_digits() {
        assert_eq!(render_value(&json!(42.0)), "42");
        assert_eq!(render_value(&json!(7)), "7");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!("txt")), "txt");
        assert_eq!(coerce_value("k", "12", MetadataType::Number).unwrap(), json!(12));
        assert!(coerce_value("k", "yes", MetadataType::Boolean).is_err());
    }

    #[test]
    fn numbers_survive_a_store_and_read() {
        assert_eq!(render_value(&json!(9007199254740993u64)), "9007199254740993");
        assert_eq!(render_value(&json!(-9007199254740993i64)), "-9007199254740993");
        assert_eq!(render_value(&json!(2.5)), "2.5");

        for raw in ["9007199254740993", "18446744073709551615", "2.5", "-3"] {
            let value = coerce_value("k", raw, MetadataType::Number).unwrap();
            assert_eq!(render_value(&value), raw);
        }
        assert!(coerce_value("k", "2.5.1", MetadataType::Number).is_err());
    }

    #[test]
    fn record_round_trip_fills_defaults() {
        let record = crate::attrs! {"key" => "env", "value" => "prod"};
        let entry = DesiredEntry::from_record(&record).unwrap();
        assert_eq!(entry, DesiredEntry::string("", "env", "prod"));
        let back = entry.to_record(Some("urn:vcloud:metadata:1"));
        assert_eq!(back.str_of("type"), Some("MetadataStringValue"));
        assert_eq!(back.str_of("domain"), Some("TENANT"));
        assert!(!back.contains_key("namespace"));
    }

    #[test]
    fn legacy_diff_removes_dropped_keys() {
        let old = BTreeMap::from([("key1".to_string(), "value1".to_string())]);
        let new = BTreeMap::from([("key2".to_string(), "value2".to_string())]);
        let diff = diff_legacy(&old, &new);
        assert_eq!(diff.deletes, vec!["key1".to_string()]);
        assert_eq!(diff.upserts, vec![("key2".to_string(), "value2".to_string())]);
    }

    fn arb_entry(key: usize) -> impl Strategy<Value = DesiredEntry> {
        (
            0..3usize,
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            0..3u8,
        )
            .prop_map(move |(ty, provider, readonly, persistent, value)| DesiredEntry {
                namespace: format!("ns{}", key % 2),
                key: format!("k{}", key / 2),
                value: value.to_string(),
                ty: [MetadataType::String, MetadataType::Number, MetadataType::Boolean][ty],
                domain: if provider {
                    MetadataDomain::Provider
                } else {
                    MetadataDomain::Tenant
                },
                readonly,
                persistent,
            })
    }

    fn arb_set() -> impl Strategy<Value = Vec<DesiredEntry>> {
        proptest::collection::btree_set(0..6usize, 0..6).prop_flat_map(|keys: BTreeSet<usize>| {
            keys.into_iter().map(arb_entry).collect::<Vec<_>>()
        })
    }

    proptest! {
        #[test]
        fn diff_is_minimal(old in arb_set(), new in arb_set()) {
            let diff = diff_openapi(&old, &new);
            let old_map: BTreeMap<_, _> = old.iter().map(|e| (e.key(), e)).collect();
            let new_map: BTreeMap<_, _> = new.iter().map(|e| (e.key(), e)).collect();

            let only_old = old_map.keys().filter(|k| !new_map.contains_key(*k)).count();
            let only_new = new_map.keys().filter(|k| !old_map.contains_key(*k)).count();
            let recreated = old_map
                .iter()
                .filter(|(k, o)| new_map.get(*k).is_some_and(|n| o.immutable_fields_differ(n)))
                .count();
            let updated = old_map
                .iter()
                .filter(|(k, o)| {
                    new_map
                        .get(*k)
                        .is_some_and(|n| !o.immutable_fields_differ(n) && ***o != **n)
                })
                .count();

            prop_assert_eq!(diff.deletes.len(), only_old + recreated);
            prop_assert_eq!(diff.creates.len(), only_new + recreated);
            prop_assert_eq!(diff.updates.len(), updated);

            // Applying the diff to `old` yields `new`.
            let mut applied: BTreeMap<MetadataKey, DesiredEntry> =
                old.iter().map(|e| (e.key(), e.clone())).collect();
            for key in &diff.deletes {
                applied.remove(key);
            }
            for e in diff.updates.iter().chain(&diff.creates) {
                applied.insert(e.key(), e.clone());
            }
            let expected: BTreeMap<MetadataKey, DesiredEntry> =
                new.iter().map(|e| (e.key(), e.clone())).collect();
            prop_assert_eq!(applied, expected);
        }
    }
}
