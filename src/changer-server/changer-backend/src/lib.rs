// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::time::Duration;

use changer_app::normalize_name;
use changer_core::changer::controller::ExponentialBackoff;
use changer_core::driver::{ChangerDriver, DriverAccess};
use changer_core::DynResult;

mod dummy;
#[cfg(feature = "ur")]
mod ur;

pub use dummy::DummyDriver;
#[cfg(feature = "ur")]
pub use ur::{UrDashboard, DASHBOARD_PORT};

/// Connection details for instantiating a robot backend.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub access: DriverAccess,
    /// Upper bound for a single request/reply exchange.
    pub timeout: Duration,
    /// Connection retry policy.
    pub retry: ExponentialBackoff,
}

impl DriverSettings {
    pub fn tcp(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            access: DriverAccess::Tcp { addr: addr.into() },
            timeout,
            retry: ExponentialBackoff::default_robot(),
        }
    }

    pub fn offline() -> Self {
        Self {
            access: DriverAccess::None,
            timeout: Duration::from_secs(1),
            retry: ExponentialBackoff::default_robot(),
        }
    }

    pub fn with_retry(mut self, retry: ExponentialBackoff) -> Self {
        self.retry = retry;
        self
    }
}

pub type BackendFactory = fn(DriverSettings) -> DynResult<Box<dyn ChangerDriver>>;

/// Context for registering and instantiating robot backends.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, BackendFactory>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under a stable name (e.g. "ur").
    pub fn register_backend(&mut self, name: &str, factory: BackendFactory) {
        self.factories.insert(normalize_name(name), factory);
    }

    pub fn is_backend_registered(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    /// Registered backend names, sorted.
    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the backend `name` with the given settings.
    pub fn build_driver(
        &self,
        name: &str,
        settings: DriverSettings,
    ) -> DynResult<Box<dyn ChangerDriver>> {
        let factory = self
            .factories
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown robot backend: {}", name))?;
        factory(settings)
    }

    /// Merge another registration context into this one.
    pub fn extend_from(&mut self, other: &RegistrationContext) {
        for (name, factory) in &other.factories {
            self.factories.insert(name.clone(), *factory);
        }
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Register all built-in backends enabled by features on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_backend("dummy", dummy_factory);
    #[cfg(feature = "ur")]
    context.register_backend("ur", ur_factory);
}

fn dummy_factory(_settings: DriverSettings) -> DynResult<Box<dyn ChangerDriver>> {
    Ok(Box::new(DummyDriver::new()))
}

#[cfg(feature = "ur")]
fn ur_factory(settings: DriverSettings) -> DynResult<Box<dyn ChangerDriver>> {
    match settings.access {
        DriverAccess::Tcp { addr } => Ok(Box::new(
            UrDashboard::new(addr, settings.timeout).with_retry(settings.retry),
        )),
        DriverAccess::None => Err("UR backend requires a dashboard address".into()),
    }
}
