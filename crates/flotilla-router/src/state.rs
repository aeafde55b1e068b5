use std::sync::Arc;

use flotilla_router::Controller;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub metrics: Arc<Metrics>,
}
