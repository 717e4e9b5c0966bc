//! Attribute values as exchanged with the host.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub type AttrMap = BTreeMap<String, AttrValue>;

/// One attribute value.
///
/// Serialized untagged so host payloads stay plain JSON; the declared schema
/// type is re-applied on the way in (see [`crate::schema::AttrType::coerce`]),
/// which is how a JSON array becomes a set rather than a list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<String>),
    Set(BTreeSet<String>),
    Records(Vec<AttrMap>),
    Record(AttrMap),
}

impl AttrValue {
    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttrValue::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttrValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttrValue::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&AttrMap> {
        match self {
            AttrValue::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[AttrMap]> {
        match self {
            AttrValue::Records(v) => Some(v),
            _ => None,
        }
    }

    /// Null, empty strings and empty collections all count as "not set".
    pub fn is_unset(&self) -> bool {
        match self {
            AttrValue::Null => true,
            AttrValue::String(s) => s.is_empty(),
            AttrValue::List(v) => v.is_empty(),
            AttrValue::Set(v) => v.is_empty(),
            AttrValue::Records(v) => v.is_empty(),
            AttrValue::Record(v) => v.is_empty(),
            AttrValue::Bool(_) | AttrValue::Int(_) => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Bool(_) => "boolean",
            AttrValue::Int(_) => "integer",
            AttrValue::String(_) => "string",
            AttrValue::List(_) => "list of strings",
            AttrValue::Set(_) => "set of strings",
            AttrValue::Records(_) => "list of records",
            AttrValue::Record(_) => "record",
        }
    }
}

/// Collapse "unset" spellings so that absent, null and empty compare equal.
pub fn normalized(value: Option<&AttrValue>) -> Option<&AttrValue> {
    value.filter(|v| !v.is_unset())
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<&String> for AttrValue {
    fn from(value: &String) -> Self {
        AttrValue::String(value.clone())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<BTreeSet<String>> for AttrValue {
    fn from(value: BTreeSet<String>) -> Self {
        AttrValue::Set(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::List(value)
    }
}

impl From<Vec<AttrMap>> for AttrValue {
    fn from(value: Vec<AttrMap>) -> Self {
        AttrValue::Records(value)
    }
}

impl From<AttrMap> for AttrValue {
    fn from(value: AttrMap) -> Self {
        AttrValue::Record(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttrValue::Null)
    }
}

/// Typed field access on nested records.
pub trait RecordExt {
    fn str_of(&self, name: &str) -> Option<&str>;
    fn int_of(&self, name: &str) -> Option<i64>;
    fn bool_of(&self, name: &str) -> bool;
    fn strings_of(&self, name: &str) -> Vec<String>;
}

impl RecordExt for AttrMap {
    fn str_of(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_str).filter(|s| !s.is_empty())
    }

    fn int_of(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttrValue::as_int)
    }

    fn bool_of(&self, name: &str) -> bool {
        self.get(name).and_then(AttrValue::as_bool).unwrap_or(false)
    }

    fn strings_of(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(AttrValue::Set(items)) => items.iter().cloned().collect(),
            Some(AttrValue::List(items)) => items.clone(),
            _ => Vec::new(),
        }
    }
}

/// Build an [`AttrMap`] from `"name" => value` pairs.
#[macro_export]
macro_rules! attrs {
    () => { $crate::value::AttrMap::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::AttrMap::new();
        $( map.insert(::std::string::String::from($key), $crate::value::AttrValue::from($value)); )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_json_round_trip_keeps_shapes() {
        let map = crate::attrs! {
            "name" => "net",
            "prefix_length" => 24,
            "guest_vlan_allowed" => true,
            "static_ip_pool" => vec![crate::attrs! {"start_address" => "1.1.1.10"}],
        };
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["prefix_length"], 24);
        let back: AttrMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn unset_covers_empty_collections() {
        assert!(AttrValue::Null.is_unset());
        assert!(AttrValue::from("").is_unset());
        assert!(AttrValue::Records(vec![]).is_unset());
        assert!(!AttrValue::Bool(false).is_unset());
        assert!(!AttrValue::Int(0).is_unset());
    }
}
