//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;
use xengage_core::Engine;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}
