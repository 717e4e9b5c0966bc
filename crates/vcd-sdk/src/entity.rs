use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EntityKind, SdkError, SdkResult, Urn};

/// Handle to one remote object as last observed.
///
/// Handles are fetched at the start of every kernel call and dropped at its end;
/// the `etag` is what the remote checks on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Urn,
    pub kind: EntityKind,
    pub name: String,
    pub parent: Option<Urn>,
    pub etag: String,
    pub body: Value,
}

impl Entity {
    /// Decode the JSON body into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> SdkResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|err| SdkError::Decode {
            what: format!("{} {}", self.kind, self.id),
            message: err.to_string(),
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> bool {
        self.body.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Filter-style lookup, the shape shared by the OpenAPI `filter=` parameter and
/// the legacy query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub kind: EntityKind,
    pub parent: Option<Urn>,
    pub name: Option<String>,
    pub filters: Vec<(String, String)>,
}

impl Query {
    pub fn of(kind: EntityKind) -> Self {
        Self {
            kind,
            parent: None,
            name: None,
            filters: Vec::new(),
        }
    }

    pub fn under(mut self, parent: &Urn) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Match a top-level body field against its string rendering.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if entity.kind != self.kind {
            return false;
        }
        if let Some(parent) = &self.parent {
            if entity.parent.as_ref() != Some(parent) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &entity.name != name {
                return false;
            }
        }
        self.filters.iter().all(|(field, expected)| {
            match entity.body.get(field) {
                Some(Value::String(actual)) => actual == expected,
                Some(other) => other.to_string() == *expected,
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Entity {
        Entity {
            id: Urn::new("gateway", "1"),
            kind: EntityKind::EdgeGateway,
            name: "edge".into(),
            parent: Some(Urn::new("vdc", "a")),
            etag: "1".into(),
            body: json!({"name": "edge", "isNsxt": true, "priority": 5}),
        }
    }

    #[test]
    fn query_matches_parent_name_and_filters() {
        let entity = sample();
        let vdc = Urn::new("vdc", "a");
        assert!(Query::of(EntityKind::EdgeGateway).under(&vdc).named("edge").matches(&entity));
        assert!(Query::of(EntityKind::EdgeGateway).filter("isNsxt", "true").matches(&entity));
        assert!(Query::of(EntityKind::EdgeGateway).filter("priority", "5").matches(&entity));
        assert!(!Query::of(EntityKind::Vdc).matches(&entity));
        assert!(!Query::of(EntityKind::EdgeGateway).named("other").matches(&entity));
    }

    #[test]
    fn decode_reports_entity_on_failure() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Strict {
            missing: String,
        }
        let err = sample().decode::<Strict>().unwrap_err();
        assert!(err.to_string().contains("Edge Gateway"));
    }
}
