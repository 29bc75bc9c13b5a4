//! The provider bundle: publishes a configurable [`Greeter`].

use keystone::prelude::*;
use serde::Deserialize;

/// Service name the greeter is published under.
pub const GREETER_SERVICE: &str = "keystone.demo.Greeter";

pub trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

/// `[bundles.greeter-provider]` in `keystone.toml`.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct ProviderConfig {
    greeting: String,
    ranking: i64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            greeting: "Hello".to_string(),
            ranking: 0,
        }
    }
}

struct TemplateGreeter {
    greeting: String,
}

impl Greeter for TemplateGreeter {
    fn greet(&self, name: &str) -> String {
        format!("{}, {name}!", self.greeting)
    }
}

pub struct ProviderActivator;

impl BundleActivator for ProviderActivator {
    fn start(&mut self, ctx: &BundleContext) -> Result<(), BoxError> {
        let config: ProviderConfig = ctx.get_config()?;
        let greeting = config.greeting.clone();

        let greeter: Arc<dyn Greeter> = Arc::new(TemplateGreeter {
            greeting: config.greeting,
        });

        let component = ctx.create_component("template-greeter");
        component.add_interface_with_version(
            GREETER_SERVICE,
            "1.0.0",
            service_object(greeter),
            Properties::new().with(SERVICE_RANKING, config.ranking),
        )?;
        component.set_callbacks(LifecycleCallbacks::new().on_start(move || {
            info!(greeting = %greeting, "Greeter published");
            Ok(())
        }))?;
        ctx.dependency_manager().add(component);
        Ok(())
    }
}

fn create_provider() -> Box<dyn BundleActivator> {
    Box::new(ProviderActivator)
}

keystone::bundle! {
    /// Installed by `Framework::install_static_bundles`.
    pub static PROVIDER = "greeter-provider" => create_provider;
}
