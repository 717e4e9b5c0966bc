//! Attribute bag: the prior / desired / effective views of one resource.
//!
//! `prior` and `desired` are what the host handed in and are never modified.
//! Everything the kernel learns from the remote goes into `effective`.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::schema::{Presence, Schema};
use crate::value::{AttrMap, AttrValue, normalized};

#[derive(Debug, Clone)]
pub struct ResourceData {
    schema: Arc<Schema>,
    id: Option<String>,
    prior: AttrMap,
    desired: Option<AttrMap>,
    effective: AttrMap,
}

impl ResourceData {
    fn build(
        schema: Arc<Schema>,
        id: Option<String>,
        prior: AttrMap,
        desired: Option<AttrMap>,
    ) -> Self {
        Self {
            schema,
            id: id.filter(|id| !id.is_empty()),
            prior,
            desired,
            effective: AttrMap::new(),
        }
    }

    pub fn for_create(schema: Arc<Schema>, desired: AttrMap) -> Self {
        Self::build(schema, None, AttrMap::new(), Some(desired))
    }

    pub fn for_read(schema: Arc<Schema>, id: impl Into<String>, prior: AttrMap) -> Self {
        Self::build(schema, Some(id.into()), prior, None)
    }

    pub fn for_update(
        schema: Arc<Schema>,
        id: impl Into<String>,
        prior: AttrMap,
        desired: AttrMap,
    ) -> Self {
        Self::build(schema, Some(id.into()), prior, Some(desired))
    }

    pub fn for_delete(schema: Arc<Schema>, id: impl Into<String>, prior: AttrMap) -> Self {
        Self::for_read(schema, id, prior)
    }

    /// Empty bag; import fills it from the remote.
    pub fn for_import(schema: Arc<Schema>) -> Self {
        Self::build(schema, None, AttrMap::new(), None)
    }

    /// Data sources have no ID yet, only lookup arguments.
    pub fn for_data_source(schema: Arc<Schema>, arguments: AttrMap) -> Self {
        Self::build(schema, None, AttrMap::new(), Some(arguments))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_arc(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn clear_id(&mut self) {
        self.id = None;
    }

    pub fn prior(&self) -> &AttrMap {
        &self.prior
    }

    pub fn desired(&self) -> Option<&AttrMap> {
        self.desired.as_ref()
    }

    pub fn effective(&self) -> &AttrMap {
        &self.effective
    }

    /// Current value: effective, then desired (or prior when there is no
    /// plan), then the schema default.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        if let Some(value) = self.effective.get(name) {
            return normalized(Some(value));
        }
        let source = self.desired.as_ref().unwrap_or(&self.prior);
        let declared = match source.get(name) {
            None if self.desired.is_some() && self.is_kernel_owned(name) => self.prior.get(name),
            other => other,
        };
        normalized(declared).or_else(|| self.schema.default_of(name))
    }

    fn is_kernel_owned(&self, name: &str) -> bool {
        self.schema.get(name).is_some_and(|attr| {
            matches!(attr.presence, Presence::Computed | Presence::OptionalComputed)
        })
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_str)
    }

    pub fn get_string(&self, name: &str) -> String {
        self.get_str(name).unwrap_or_default().to_string()
    }

    pub fn require_str(&self, name: &str) -> KernelResult<&str> {
        self.get_str(name)
            .ok_or_else(|| KernelError::validation(format!("attribute `{name}` is required")))
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttrValue::as_int)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(AttrValue::as_bool).unwrap_or(false)
    }

    pub fn get_set(&self, name: &str) -> BTreeSet<String> {
        match self.get(name) {
            Some(AttrValue::Set(items)) => items.clone(),
            Some(AttrValue::List(items)) => items.iter().cloned().collect(),
            _ => BTreeSet::new(),
        }
    }

    pub fn get_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(AttrValue::List(items)) => items.clone(),
            Some(AttrValue::Set(items)) => items.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_record(&self, name: &str) -> Option<&AttrMap> {
        self.get(name).and_then(AttrValue::as_record)
    }

    pub fn get_records(&self, name: &str) -> &[AttrMap] {
        self.get(name).and_then(AttrValue::as_records).unwrap_or(&[])
    }

    pub fn prior_str(&self, name: &str) -> Option<&str> {
        normalized(self.prior.get(name)).and_then(AttrValue::as_str)
    }

    /// Write a value into the effective view, re-shaped to the declared type.
    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) -> KernelResult<()> {
        let attr = self
            .schema
            .get(name)
            .ok_or_else(|| KernelError::payload(format!("unknown attribute `{name}`")))?;
        let value = attr
            .ty
            .coerce(value.into())
            .map_err(|err| KernelError::payload(format!("`{name}`: {err}")))?;
        self.effective.insert(name.to_string(), value);
        Ok(())
    }

    pub fn has_change(&self, name: &str) -> bool {
        let Some(desired) = &self.desired else {
            return false;
        };
        if normalized(desired.get(name)).is_none() && self.is_kernel_owned(name) {
            return false;
        }
        self.schema.differs(name, &self.prior, desired)
    }

    pub fn has_change_except(&self, ignored: &[&str]) -> bool {
        self.changed_attributes()
            .iter()
            .any(|name| !ignored.contains(name))
    }

    pub fn changed_attributes(&self) -> Vec<&'static str> {
        match &self.desired {
            Some(desired) => self.schema.changed_attributes(&self.prior, desired),
            None => Vec::new(),
        }
    }

    /// State handed back to the host.
    ///
    /// Declared values are taken from `desired` (or `prior` on plain reads),
    /// kernel-owned values the declaration leaves open come from `prior`, and
    /// the effective view overrides both. Unset values are dropped so two
    /// reads of the same remote object produce identical maps.
    pub fn state(&self) -> AttrMap {
        let mut state = AttrMap::new();
        for attr in self.schema.attributes() {
            let name = attr.name;
            let value = if let Some(value) = self.effective.get(name) {
                Some(value)
            } else {
                match &self.desired {
                    Some(desired) => match desired.get(name) {
                        Some(v) if !v.is_unset() => Some(v),
                        _ if self.is_kernel_owned(name) => self.prior.get(name),
                        _ => attr.default.as_ref(),
                    },
                    None => self.prior.get(name).or(attr.default.as_ref()),
                }
            };
            if let Some(value) = normalized(value) {
                state.insert(name.to_string(), value.clone());
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::schema::Attribute;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new([
            Attribute::string("name").required(),
            Attribute::string("description"),
            Attribute::string("owner_id").optional_computed(),
            Attribute::bool("force_delete").default(false),
            Attribute::string("href").computed(),
            Attribute::int("prefix_length").default(24),
        ]))
    }

    #[test]
    fn effective_overrides_desired_without_touching_it() {
        let mut bag = ResourceData::for_create(schema(), attrs! {"name" => "a"});
        bag.set("href", "https://vcd/api/network/1").unwrap();
        bag.set("name", "b").unwrap();
        assert_eq!(bag.get_str("name"), Some("b"));
        assert_eq!(bag.desired().unwrap()["name"], AttrValue::from("a"));
        assert_eq!(bag.get_int("prefix_length"), Some(24));
    }

    #[test]
    fn set_rejects_unknown_and_mistyped() {
        let mut bag = ResourceData::for_create(schema(), attrs! {"name" => "a"});
        assert!(bag.set("nope", "x").is_err());
        assert!(bag.set("prefix_length", "x").is_err());
    }

    #[test]
    fn has_change_except_skips_cosmetic_attributes() {
        let bag = ResourceData::for_update(
            schema(),
            "urn:vcloud:network:1",
            attrs! {"name" => "a", "force_delete" => false, "owner_id" => "urn:vcloud:vdc:1"},
            attrs! {"name" => "a", "force_delete" => true},
        );
        assert!(bag.has_change("force_delete"));
        assert!(!bag.has_change("owner_id"));
        assert!(!bag.has_change_except(&["force_delete"]));
        assert_eq!(bag.changed_attributes(), vec!["force_delete"]);
    }

    #[test]
    fn state_keeps_kernel_owned_values_from_prior() {
        let bag = ResourceData::for_update(
            schema(),
            "id",
            attrs! {"name" => "a", "href" => "h", "owner_id" => "o", "description" => "old"},
            attrs! {"name" => "b"},
        );
        let state = bag.state();
        assert_eq!(state["name"], AttrValue::from("b"));
        assert_eq!(state["href"], AttrValue::from("h"));
        assert_eq!(state["owner_id"], AttrValue::from("o"));
        assert!(!state.contains_key("description"));
        assert_eq!(state["prefix_length"], AttrValue::Int(24));
    }
}
