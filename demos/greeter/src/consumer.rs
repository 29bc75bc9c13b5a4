//! The consumer bundle: a component that greets everyone on its list once
//! a [`Greeter`] is available.

use keystone::prelude::*;

use crate::provider::{GREETER_SERVICE, Greeter};

pub struct ConsumerActivator {
    names: Vec<String>,
}

impl ConsumerActivator {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl BundleActivator for ConsumerActivator {
    fn start(&mut self, ctx: &BundleContext) -> Result<(), BoxError> {
        let slot = service_slot();
        let component = ctx.create_component("greeting-printer");

        component.add_service_dependency(
            ServiceDependency::new(GREETER_SERVICE)
                .required(true)
                .auto_inject(Arc::clone(&slot))
                .on_set(|event| match event {
                    Some(e) => info!(service_id = e.service_id(), ranking = e.ranking(), "Using greeter"),
                    None => info!("Greeter withdrawn"),
                }),
        );

        let names = self.names.clone();
        component.set_callbacks(
            LifecycleCallbacks::new()
                .on_start(move || {
                    let guard = slot.read();
                    let greeter = guard
                        .as_ref()
                        .and_then(downcast_service::<dyn Greeter>)
                        .ok_or("greeter was not injected")?;
                    for name in &names {
                        println!("{}", greeter.greet(name));
                    }
                    Ok(())
                })
                .on_stop(|| {
                    info!("Greeting printer stopped");
                    Ok(())
                }),
        )?;

        ctx.dependency_manager().add(component);
        Ok(())
    }
}
