//! Driver registry.
//!
//! Maps `(module, class)` names to driver factories. Built once at
//! startup and owned by the controller; definition modules can be
//! installed or replaced at runtime. Lookups fail closed: an unknown
//! name is a configuration error, never a fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::definition::{DefinitionDriver, ModuleDefinition};
use super::{DeviceDriver, DriverContext, DriverHandle, builtin};
use crate::bus::SharedBus;
use crate::error::CoreError;
use crate::model::DeviceRecord;

/// Factory building a driver instance for one device.
pub type DriverFactory =
    Arc<dyn Fn(&DriverContext) -> Result<Box<dyn DeviceDriver>, CoreError> + Send + Sync>;

/// Where a module's classes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    /// Compiled into the binary; has no editable source.
    Builtin,
    /// Loaded from a definition file.
    Definition,
}

struct DriverModule {
    origin: ModuleOrigin,
    classes: BTreeMap<String, DriverFactory>,
}

/// Registry of available driver modules and their classes.
pub struct DriverRegistry {
    modules: BTreeMap<String, DriverModule>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    /// Create a registry holding the [`builtin`] drivers.
    pub fn with_builtins() -> Result<Self, CoreError> {
        let mut registry = Self::new();
        builtin::register_all(&mut registry)?;
        Ok(registry)
    }

    /// Register a compiled driver class.
    ///
    /// # Errors
    /// [`CoreError::Config`] if the class is already registered in that
    /// module, or the module was loaded from a definition file.
    pub fn register<F>(
        &mut self,
        module: &str,
        class: &str,
        factory: F,
    ) -> Result<(), CoreError>
    where
        F: Fn(&DriverContext) -> Result<Box<dyn DeviceDriver>, CoreError> + Send + Sync + 'static,
    {
        let entry = self
            .modules
            .entry(module.to_owned())
            .or_insert_with(|| DriverModule {
                origin: ModuleOrigin::Builtin,
                classes: BTreeMap::new(),
            });
        if entry.origin == ModuleOrigin::Definition {
            return Err(CoreError::config(format!(
                "driver module '{module}' is a definition module; compiled classes cannot join it"
            )));
        }
        if entry.classes.contains_key(class) {
            return Err(CoreError::config(format!(
                "driver '{module}.{class}' is already registered"
            )));
        }
        entry.classes.insert(class.to_owned(), Arc::new(factory));
        Ok(())
    }

    /// Install or replace a definition module.
    ///
    /// Built-in module names cannot be shadowed.
    pub fn install_definition(
        &mut self,
        module: &str,
        definition: &ModuleDefinition,
    ) -> Result<(), CoreError> {
        if self.origin(module) == Some(ModuleOrigin::Builtin) {
            return Err(CoreError::config(format!(
                "driver module '{module}' is built in and cannot be replaced"
            )));
        }

        let classes = definition
            .classes
            .iter()
            .map(|(class, spec)| {
                let spec = spec.clone();
                let factory: DriverFactory = Arc::new(move |ctx: &DriverContext| {
                    DefinitionDriver::construct(ctx, spec.clone())
                        .map(|d| Box::new(d) as Box<dyn DeviceDriver>)
                });
                (class.clone(), factory)
            })
            .collect();

        self.modules.insert(
            module.to_owned(),
            DriverModule {
                origin: ModuleOrigin::Definition,
                classes,
            },
        );
        Ok(())
    }

    /// Build a driver for `record`.
    ///
    /// # Errors
    /// [`CoreError::Config`] when the binding is blank or names an unknown
    /// module/class; [`CoreError::Construction`] when the factory fails.
    pub fn instantiate(
        &self,
        record: &DeviceRecord,
        bus: &SharedBus,
    ) -> Result<DriverHandle, CoreError> {
        self.prepare(record, bus)?.build()
    }

    /// Resolve the factory for `record` without running it.
    ///
    /// Factories may probe the bus, so callers on an async runtime build
    /// the returned [`PendingDriver`] on a blocking thread.
    pub fn prepare(
        &self,
        record: &DeviceRecord,
        bus: &SharedBus,
    ) -> Result<PendingDriver, CoreError> {
        let (module, class) = record.binding();
        if module.is_empty() || class.is_empty() {
            return Err(CoreError::config(format!(
                "device {} has no driver binding",
                record.address
            )));
        }

        let factory = self
            .modules
            .get(module)
            .ok_or_else(|| CoreError::config(format!("unknown driver module '{module}'")))?
            .classes
            .get(class)
            .ok_or_else(|| {
                CoreError::config(format!("driver module '{module}' has no class '{class}'"))
            })?;

        Ok(PendingDriver {
            factory: Arc::clone(factory),
            ctx: DriverContext {
                address: record.address,
                bus: bus.clone(),
                qualified_name: format!("{module}.{class}"),
            },
        })
    }

    pub fn origin(&self, module: &str) -> Option<ModuleOrigin> {
        self.modules.get(module).map(|m| m.origin)
    }

    /// All module names, sorted.
    pub fn list_modules(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Class names of `module`, sorted; empty for unknown modules.
    pub fn classes(&self, module: &str) -> Vec<String> {
        self.modules
            .get(module)
            .map(|m| m.classes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved factory bound to one device, ready to run.
pub struct PendingDriver {
    factory: DriverFactory,
    ctx: DriverContext,
}

impl PendingDriver {
    pub fn qualified_name(&self) -> &str {
        &self.ctx.qualified_name
    }

    /// Run the factory. Any failure is reported as [`CoreError::Construction`].
    pub fn build(self) -> Result<DriverHandle, CoreError> {
        match (self.factory)(&self.ctx) {
            Ok(driver) => Ok(Arc::from(driver)),
            Err(e @ CoreError::Construction { .. }) => Err(e),
            Err(e) => Err(CoreError::Construction {
                driver: self.ctx.qualified_name,
                address: self.ctx.address,
                message: e.to_string(),
            }),
        }
    }
}
