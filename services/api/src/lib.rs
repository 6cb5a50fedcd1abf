//! services/api/src/lib.rs
//!
//! The HTTP service around the xengage engine: configuration, adapters for the
//! browser and the database, and the axum web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
