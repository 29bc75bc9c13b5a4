//! Bundles: activators, static descriptors and lifecycle states.
//!
//! A bundle is the unit that publishes and consumes services. Keystone does
//! not load bundles from disk; each one is described by a static
//! [`BundleDescriptor`] whose factory builds its [`BundleActivator`].
//! Descriptors are either installed explicitly with
//! [`Framework::install_bundle`](crate::Framework::install_bundle) or
//! contributed to the [`BUNDLES`] slice at link time:
//!
//! ```rust,ignore
//! keystone_runtime::bundle! {
//!     /// Publishes the greeter service.
//!     pub static GREETER = "greeter" => create_greeter;
//! }
//!
//! fn create_greeter() -> Box<dyn BundleActivator> {
//!     Box::new(GreeterActivator::default())
//! }
//! ```

use std::fmt;

use keystone_dm::BoxError;
use linkme::distributed_slice;
use serde::Serialize;

use crate::context::BundleContext;

// ─── API versioning ─────────────────────────────────────────────────────────

/// Bundle API version of this runtime (1.0).
pub const KEYSTONE_BUNDLE_API_VERSION: u32 = 0x0001_0000;

/// Formats a packed `major.minor` API version.
pub(crate) fn format_api_version(version: u32) -> String {
    format!("{}.{}", version >> 16, version & 0xFFFF)
}

// ─── BundleActivator ────────────────────────────────────────────────────────

/// Lifecycle hooks of a bundle.
///
/// `start` typically registers services and adds components to the bundle's
/// dependency manager. Whatever the activator leaves behind is cleaned up by
/// the framework after `stop`: components are destroyed, registrations are
/// unregistered and references are released.
pub trait BundleActivator: Send {
    fn start(&mut self, ctx: &BundleContext) -> Result<(), BoxError>;

    fn stop(&mut self, ctx: &BundleContext) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }
}

// ─── BundleDescriptor ───────────────────────────────────────────────────────

/// A static, `Copy` descriptor that identifies and instantiates a bundle.
#[derive(Clone, Copy)]
pub struct BundleDescriptor {
    /// Bundle API version this descriptor was compiled against.
    pub api_version: u32,

    /// Bundle name, unique per framework. Also the key of the bundle's
    /// configuration section.
    pub name: &'static str,

    /// Semver version string of the bundle.
    pub version: &'static str,

    /// Creates the bundle's activator.
    pub create: fn() -> Box<dyn BundleActivator>,
}

impl BundleDescriptor {
    /// Describes a bundle built against the current API.
    pub const fn new(name: &'static str, create: fn() -> Box<dyn BundleActivator>) -> Self {
        Self {
            api_version: KEYSTONE_BUNDLE_API_VERSION,
            name,
            version: "0.0.0",
            create,
        }
    }

    pub const fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// The major part must match exactly; the descriptor's minor part must be
    /// at most the host's.
    pub fn is_compatible(&self) -> bool {
        let host_major = KEYSTONE_BUNDLE_API_VERSION >> 16;
        let host_minor = KEYSTONE_BUNDLE_API_VERSION & 0xFFFF;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }

    #[inline]
    pub fn instantiate(&self) -> Box<dyn BundleActivator> {
        (self.create)()
    }
}

impl fmt::Debug for BundleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleDescriptor")
            .field("api_version", &format_api_version(self.api_version))
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Bundles contributed at link time, installed by
/// [`Framework::install_static_bundles`](crate::Framework::install_static_bundles).
#[distributed_slice]
pub static BUNDLES: [BundleDescriptor];

/// Declares a [`BundleDescriptor`] static and contributes it to [`BUNDLES`].
#[macro_export]
macro_rules! bundle {
    ($(#[$meta:meta])* $vis:vis static $ident:ident = $name:literal => $create:path;) => {
        $(#[$meta])*
        #[$crate::linkme::distributed_slice($crate::BUNDLES)]
        #[linkme(crate = $crate::linkme)]
        $vis static $ident: $crate::BundleDescriptor = $crate::BundleDescriptor::new($name, $create)
            .with_version(env!("CARGO_PKG_VERSION"));
    };
}

// ─── BundleState ────────────────────────────────────────────────────────────

/// Lifecycle state of an installed bundle.
///
/// ```text
/// install_bundle() ──► Installed ──start──► Starting ──► Active
///                          ▲                   │           │
///                          └───── (failure) ───┘         stop
///                          ▲                               │
///                          └────────── Stopping ◀──────────┘
/// uninstall_bundle() ──► Uninstalled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleState {
    Installed,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

impl BundleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Uninstalled => "uninstalled",
        }
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an installed bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleInfo {
    pub id: keystone_core::BundleId,
    pub name: String,
    pub version: String,
    pub state: BundleState,
    /// Services the bundle currently has registered.
    pub registered_services: usize,
    /// References the bundle currently holds on other services.
    pub services_in_use: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl BundleActivator for Noop {
        fn start(&mut self, _ctx: &BundleContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn create_noop() -> Box<dyn BundleActivator> {
        Box::new(Noop)
    }

    #[test]
    fn test_descriptor_compatibility() {
        let desc = BundleDescriptor::new("noop", create_noop);
        assert!(desc.is_compatible());

        let older_minor = BundleDescriptor {
            api_version: KEYSTONE_BUNDLE_API_VERSION & 0xFFFF_0000,
            ..desc
        };
        assert!(older_minor.is_compatible());

        let newer_minor = BundleDescriptor {
            api_version: KEYSTONE_BUNDLE_API_VERSION + 1,
            ..desc
        };
        assert!(!newer_minor.is_compatible());

        let other_major = BundleDescriptor {
            api_version: 0x0002_0000,
            ..desc
        };
        assert!(!other_major.is_compatible());
    }

    #[test]
    fn test_descriptor_debug_and_version() {
        let desc = BundleDescriptor::new("noop", create_noop).with_version("1.2.3");
        let debug = format!("{desc:?}");
        assert!(debug.contains("\"noop\""));
        assert!(debug.contains("1.0"));
        assert_eq!(desc.version, "1.2.3");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(BundleState::Active.to_string(), "active");
        assert_eq!(
            serde_json::to_value(BundleState::Uninstalled).unwrap(),
            serde_json::json!("uninstalled")
        );
    }
}
