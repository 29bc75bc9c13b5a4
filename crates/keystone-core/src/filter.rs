//! Property filters.
//!
//! The registry never parses filter expressions. Anything that can answer
//! "do these properties match?" is a [`Filter`]; closures qualify through a
//! blanket implementation, and an LDAP-style parser can live outside this
//! crate and hand in its compiled predicate.
//!
//! ```rust,ignore
//! use keystone_core::filter::{self, Filter};
//!
//! let by_lang = filter::property_equals("lang", "en");
//! let ranked = |props: &Properties| props.ranking() > 10;
//! let both = filter::all_of(vec![Arc::new(by_lang), Arc::new(ranked)]);
//! ```

use std::sync::Arc;

use crate::properties::{OBJECTCLASS, Properties};

/// A predicate over a property map.
pub trait Filter: Send + Sync {
    /// Returns `true` when `properties` satisfies this filter.
    fn matches(&self, properties: &Properties) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Properties) -> bool + Send + Sync,
{
    fn matches(&self, properties: &Properties) -> bool {
        self(properties)
    }
}

/// Shared, type-erased filter.
pub type SharedFilter = Arc<dyn Filter>;

/// Matches when `key` is present and equal to `value`.
pub fn property_equals(key: impl Into<String>, value: impl Into<String>) -> impl Filter {
    let key = key.into();
    let value = value.into();
    move |props: &Properties| props.get(&key) == Some(value.as_str())
}

/// Matches when `key` is present.
pub fn property_present(key: impl Into<String>) -> impl Filter {
    let key = key.into();
    move |props: &Properties| props.contains(&key)
}

/// Matches registrations of the given service name.
pub fn object_class(name: impl Into<String>) -> impl Filter {
    property_equals(OBJECTCLASS, name)
}

/// Matches when every filter matches. An empty list matches everything.
pub fn all_of(filters: Vec<SharedFilter>) -> impl Filter {
    move |props: &Properties| filters.iter().all(|f| f.matches(props))
}

/// Matches when at least one filter matches.
pub fn any_of(filters: Vec<SharedFilter>) -> impl Filter {
    move |props: &Properties| filters.iter().any(|f| f.matches(props))
}

/// Inverts a filter.
pub fn not(filter: SharedFilter) -> impl Filter {
    move |props: &Properties| !filter.matches(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::new()
            .with(OBJECTCLASS, "Greeter")
            .with("lang", "en")
    }

    #[test]
    fn test_combinators() {
        let lang: SharedFilter = Arc::new(property_equals("lang", "en"));
        let class: SharedFilter = Arc::new(object_class("Greeter"));
        let missing: SharedFilter = Arc::new(property_present("region"));

        assert!(all_of(vec![lang.clone(), class.clone()]).matches(&props()));
        assert!(!all_of(vec![lang.clone(), missing.clone()]).matches(&props()));
        assert!(any_of(vec![missing.clone(), class]).matches(&props()));
        assert!(not(missing).matches(&props()));
        assert!(all_of(Vec::new()).matches(&Properties::new()));
    }

    #[test]
    fn test_closure_is_filter() {
        let filter = |p: &Properties| p.get("lang").is_some_and(|l| l.starts_with('e'));
        assert!(filter.matches(&props()));
    }
}
