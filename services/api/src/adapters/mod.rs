//! services/api/src/adapters/mod.rs
//!
//! Concrete implementations of the core crate's ports.

pub mod browser;
pub mod db;

pub use browser::{ChromiumLauncher, ChromiumPage};
pub use db::PgAccountStore;
