//! Shared application state.

use std::sync::Arc;

use crate::ops::AdminOps;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The audit store being administered.
    pub admin: Arc<dyn AdminOps>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(admin: Arc<dyn AdminOps>) -> Self {
        Self { admin }
    }
}
