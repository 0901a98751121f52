//! Server state

use std::sync::Arc;

use crate::store::DeploymentStore;
use crate::trigger::Trigger;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn DeploymentStore>,
    pub trigger: Arc<Trigger>,
}

impl ServerState {
    pub fn new(store: Arc<dyn DeploymentStore>, trigger: Arc<Trigger>) -> Self {
        Self { store, trigger }
    }
}
