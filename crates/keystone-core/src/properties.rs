//! Service properties.
//!
//! Every registration carries a [`Properties`] snapshot. The registry always
//! stamps two entries on it: [`OBJECTCLASS`] (the service name) and
//! [`SERVICE_ID`]. Ranking is read from [`SERVICE_RANKING`] and defaults to
//! `0` when the value is missing or not an integer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property holding the registered service name.
pub const OBJECTCLASS: &str = "objectClass";

/// Property holding the registry-assigned service id.
pub const SERVICE_ID: &str = "service.id";

/// Property used to order competing services; higher wins.
pub const SERVICE_RANKING: &str = "service.ranking";

/// Property holding the version of a provided interface.
pub const SERVICE_VERSION: &str = "service.version";

/// Property naming the service id that a new registration replaces.
///
/// Trackers report such a registration as a single swap instead of an
/// add followed by a remove.
pub const SERVICE_REPLACES: &str = "service.replaces";

/// Ranking used when [`SERVICE_RANKING`] is absent or unparsable.
pub const DEFAULT_RANKING: i64 = 0;

/// An ordered string-keyed property map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    /// Creates an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> Option<String> {
        self.0.insert(key.into(), value.to_string())
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Returns `true` when `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses `key` as a signed integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Parses `key` as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// The service name stamped by the registry.
    pub fn object_class(&self) -> Option<&str> {
        self.get(OBJECTCLASS)
    }

    /// The service id stamped by the registry.
    pub fn service_id(&self) -> Option<u64> {
        self.get_u64(SERVICE_ID)
    }

    /// The service ranking, or [`DEFAULT_RANKING`].
    pub fn ranking(&self) -> i64 {
        self.get_i64(SERVICE_RANKING).unwrap_or(DEFAULT_RANKING)
    }

    /// Converts the map into a JSON object for diagnostics output.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}
