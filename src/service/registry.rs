use super::ComponentState;
use crate::component::{Component, ConfigProvider, InitRunnable, Provided, Runnable};
use crate::error::{Result, ServiceError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A registered runnable together with its state
pub(crate) struct Slot<T: ?Sized> {
    pub(crate) component: Arc<T>,
    state: Mutex<ComponentState>,
}

impl<T: Component + ?Sized> Slot<T> {
    fn new(component: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            component,
            state: Mutex::new(ComponentState::Stopped),
        })
    }

    pub(crate) fn name(&self) -> &str {
        self.component.name()
    }

    pub(crate) fn state(&self) -> ComponentState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ComponentState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Component '{}' state changed to: {:?}", self.name(), state);
            *current = state;
        }
    }

    /// Record a failed run unless a stop is already under way
    pub(crate) fn mark_failed(&self) {
        let mut current = self.state.lock();
        if matches!(*current, ComponentState::Starting | ComponentState::Running) {
            debug!("Component '{}' state changed to: {:?}", self.name(), ComponentState::Failed);
            *current = ComponentState::Failed;
        }
    }

    /// Move to `Stopping` if the component was started and no stop request
    /// has been issued yet. Returns whether the caller must issue one.
    pub(crate) fn begin_stop(&self) -> bool {
        let mut current = self.state.lock();
        match *current {
            ComponentState::Starting | ComponentState::Running | ComponentState::Failed => {
                *current = ComponentState::Stopping;
                true
            }
            ComponentState::Stopped | ComponentState::Stopping => false,
        }
    }
}

/// Components of a service. Filled by the builder, read-only afterwards.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) runnables: Vec<Arc<Slot<dyn Runnable>>>,
    pub(crate) initializers: Vec<Arc<Slot<dyn InitRunnable>>>,
    pub(crate) configs: Vec<Arc<dyn ConfigProvider>>,
    init_index: HashMap<String, usize>,
    config_index: HashMap<String, usize>,
}

impl Registry {
    pub(crate) fn add_runnable(&mut self, runnable: Arc<dyn Runnable>) {
        self.runnables.push(Slot::new(runnable));
    }

    pub(crate) fn add_initializer(&mut self, initializer: Arc<dyn InitRunnable>) -> Result<()> {
        let prefix = initializer.prefix().to_string();
        if self.init_index.contains_key(&prefix) {
            return Err(ServiceError::DuplicatePrefix { prefix });
        }

        self.init_index.insert(prefix, self.initializers.len());
        self.initializers.push(Slot::new(initializer));
        Ok(())
    }

    pub(crate) fn add_config(&mut self, config: Arc<dyn ConfigProvider>) -> Result<()> {
        let prefix = config.prefix().to_string();
        if self.config_index.contains_key(&prefix) {
            return Err(ServiceError::DuplicatePrefix { prefix });
        }

        self.config_index.insert(prefix, self.configs.len());
        self.configs.push(config);
        Ok(())
    }

    /// Initializers are looked up before configure-only providers
    pub(crate) fn get(&self, prefix: &str) -> Option<Provided> {
        if let Some(&index) = self.init_index.get(prefix) {
            return Some(self.initializers[index].component.get());
        }

        self.config_index
            .get(prefix)
            .map(|&index| self.configs[index].get())
    }

    pub(crate) fn component_states(&self) -> HashMap<String, ComponentState> {
        let runnables = self.runnables.iter().map(|s| (s.name().to_string(), s.state()));
        let initializers = self
            .initializers
            .iter()
            .map(|s| (s.name().to_string(), s.state()));
        runnables.chain(initializers).collect()
    }

    pub(crate) fn component_state(&self, name: &str) -> Option<ComponentState> {
        self.runnables
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.state())
            .or_else(|| {
                self.initializers
                    .iter()
                    .find(|s| s.name() == name)
                    .map(|s| s.state())
            })
    }
}
