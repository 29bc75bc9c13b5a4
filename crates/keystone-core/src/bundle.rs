//! Bundle identity.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifies a bundle, the unit that publishes and consumes services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub u64);

impl BundleId {
    /// The framework's own bundle.
    pub const FRAMEWORK: Self = Self(0);
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry-assigned service id. Ids are never reused.
pub type ServiceId = u64;

/// A type-erased service object.
///
/// Trait-object services are stored as `Arc<dyn Trait>` inside the `Any`, so
/// [`service_object`] and [`downcast_service`] round-trip both concrete types
/// and trait objects.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Wraps a shared service so it can be published.
pub fn service_object<T>(service: Arc<T>) -> ServiceObject
where
    T: ?Sized + Send + Sync + 'static,
{
    Arc::new(service)
}

/// Recovers the service published by [`service_object`].
pub fn downcast_service<T>(object: &ServiceObject) -> Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    object.downcast_ref::<Arc<T>>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn test_trait_object_round_trip() {
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        let object = service_object(greeter);

        let back = downcast_service::<dyn Greeter>(&object).unwrap();
        assert_eq!(back.greet(), "hello");
        assert!(downcast_service::<String>(&object).is_none());
    }
}
