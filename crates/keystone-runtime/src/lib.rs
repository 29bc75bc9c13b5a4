//! # Keystone Runtime
//!
//! The framework layer of Keystone: it owns the service registry, installs
//! and drives bundles, loads configuration and sets up logging.
//!
//! - [`Framework`] installs, starts, stops and uninstalls bundles, and
//!   [`run`](Framework::run)s until Ctrl+C or SIGTERM.
//! - [`BundleActivator`] is implemented by each bundle; [`BundleDescriptor`]
//!   describes it statically and may be contributed to [`BUNDLES`] with the
//!   [`bundle!`] macro.
//! - [`BundleContext`] is the bundle's handle on the registry, its
//!   configuration section and its dependency manager.
//!
//! ```rust,ignore
//! use keystone_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let framework = Framework::builder().profile("production").build()?;
//!     framework.install_static_bundles();
//!     framework.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod config;
pub mod context;
pub mod error;
pub mod framework;
pub mod logging;

pub use bundle::{
    BUNDLES, BundleActivator, BundleDescriptor, BundleInfo, BundleState,
    KEYSTONE_BUNDLE_API_VERSION,
};
pub use config::{ConfigError, ConfigLoader, ConfigResult, FrameworkConfig, KeystoneConfig};
pub use context::BundleContext;
pub use error::{RuntimeError, RuntimeResult};
pub use framework::{Framework, FrameworkBuilder};
pub use logging::{LoggingBuilder, SpanEvents};

// Used by the `bundle!` macro.
#[doc(hidden)]
pub use linkme;

pub use tracing;

/// Prelude for common imports.
pub mod prelude {
    pub use super::bundle::{BundleActivator, BundleDescriptor, BundleState};
    pub use super::context::BundleContext;
    pub use super::error::{RuntimeError, RuntimeResult};
    pub use super::framework::Framework;
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
