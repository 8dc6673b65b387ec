//! Libris book lending server
//!
//! A REST JSON API for managing a book catalog, its borrowers and the
//! lending ledger. The lending engine guarantees that a book's available
//! copy count stays consistent with its open loans under concurrent
//! borrow and return requests.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
