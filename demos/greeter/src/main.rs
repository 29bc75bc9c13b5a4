//! Greeter Demo
//!
//! Two bundles on one framework: `greeter-provider` publishes a greeter
//! service from a component, and `greeter-consumer` runs a component that
//! requires it.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package greeter -- --name Ada --name Linus --once
//! KEYSTONE_LOGGING__LEVEL=debug cargo run --package greeter -- --profile production
//! ```

mod consumer;
mod provider;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use keystone::prelude::*;

use crate::consumer::ConsumerActivator;

#[derive(Debug, Parser)]
#[command(name = "greeter", version, about = "Keystone greeter demo")]
struct Cli {
    /// Configuration file (defaults to keystone.toml in the current directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Who to greet. Repeat for several names.
    #[arg(short, long = "name", default_value = "world")]
    names: Vec<String>,

    /// Start the bundles, print the greetings and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = Framework::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }
    let framework = builder.build()?;

    framework.install_static_bundles();
    framework.install_activator(
        "greeter-consumer",
        env!("CARGO_PKG_VERSION"),
        Box::new(ConsumerActivator::new(cli.names)),
    )?;

    if cli.once {
        framework
            .run_until(async {
                for bundle in framework.bundles() {
                    info!(
                        bundle = %bundle.id,
                        name = %bundle.name,
                        state = %bundle.state,
                        services = bundle.registered_services,
                        "Bundle"
                    );
                }
            })
            .await?;
    } else {
        framework.run().await?;
    }

    Ok(())
}
