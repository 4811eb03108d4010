//! Module lifecycle scaffold (§4.8), grounded in
//! `original_source/src/util/module.py`'s `ModuleBase`/registered-modules
//! list and `util/loader.py`'s `ModuleLoader`.
//!
//! The original's class-level registration list (`ModuleBase.register`,
//! populated by import-time side effects) becomes explicit construction
//! followed by registration into a [`ModuleRegistry`] — REDESIGN FLAGS §9,
//! "module registration via class-level side effects is replaced by
//! explicit construction ... followed by registration into a lifecycle
//! registry; ordering is deterministic and leaves-first."

/// A system module with the same four lifecycle hooks as `ModuleBase`.
/// `configure` takes no generic persistence handle here: each module already
/// owns whatever `&Persistence` reference it needs from construction, so the
/// hook only needs to run deferred setup that depends on other modules
/// having started (e.g. wiring device handlers into the radio link).
pub trait Module {
    fn name(&self) -> &str;
    fn initialize(&mut self) {
        log::info!("initializing {}", self.name());
    }
    fn configure(&mut self) {
        log::info!("configuring {}", self.name());
    }
    fn start(&mut self);
    fn stop(&mut self);
}

/// Registers modules in construction order and stops them in reverse order,
/// matching `ModuleLoader`'s `start_modules`/`stop_modules` (reverse-order
/// teardown, §4.8 "`stop` is called in reverse registration order").
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    pub fn register(&mut self, module: Box<dyn Module>) {
        log::info!("registering module: {}", module.name());
        self.modules.push(module);
    }

    pub fn initialize_all(&mut self) {
        for module in self.modules.iter_mut() {
            module.initialize();
        }
    }

    pub fn configure_all(&mut self) {
        for module in self.modules.iter_mut() {
            module.configure();
        }
    }

    pub fn start_all(&mut self) {
        for module in self.modules.iter_mut() {
            module.start();
        }
    }

    /// Reverse registration order — the last module started is the first
    /// stopped.
    pub fn stop_all(&mut self) {
        for module in self.modules.iter_mut().rev() {
            module.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Module for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn start(&mut self) {
            self.log.lock().unwrap().push(format!("start:{}", self.name));
        }
        fn stop(&mut self) {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
        }
    }

    #[test]
    fn stops_in_reverse_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(Recorder { name: "persistence", log: Arc::clone(&log) }));
        registry.register(Box::new(Recorder { name: "radio", log: Arc::clone(&log) }));
        registry.register(Box::new(Recorder { name: "client", log: Arc::clone(&log) }));

        registry.start_all();
        registry.stop_all();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start:persistence", "start:radio", "start:client", "stop:client", "stop:radio", "stop:persistence"]
        );
    }
}
