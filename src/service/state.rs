use super::{ComponentState, LifecycleState, Service};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::debug;

impl Service {
    /// Update the service lifecycle state
    pub(super) fn set_lifecycle(&self, state: LifecycleState) {
        let mut current = self.lifecycle.lock();
        if *current != state {
            debug!("Service '{}' state changed to: {:?}", self.name, state);
            *current = state;
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    /// Whether the initializers have completed since the last stop
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Get component state
    pub fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.registry.component_state(component)
    }

    /// Get all component states
    pub fn component_states(&self) -> HashMap<String, ComponentState> {
        self.registry.component_states()
    }
}
