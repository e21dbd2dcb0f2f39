//! Shared state for the API layer.

use std::sync::Arc;

use crate::gateway::ResponseGateway;

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub gateway: Arc<ResponseGateway>,
}

impl ApiContext {
    pub fn new(gateway: Arc<ResponseGateway>) -> Self {
        Self { gateway }
    }
}
