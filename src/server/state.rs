use std::sync::Arc;

use action_flow::RunSupervisor;
use extensions_bridge::TargetSurface;

#[derive(Clone)]
pub struct ServeState {
    pub(crate) supervisor: Arc<RunSupervisor>,
    pub(crate) surface: Arc<dyn TargetSurface>,
}

impl ServeState {
    pub fn new(supervisor: Arc<RunSupervisor>, surface: Arc<dyn TargetSurface>) -> Self {
        Self {
            supervisor,
            surface,
        }
    }
}
