//! Elidune circulation engine
//!
//! Physical lending of fixed-copy resources, time-boxed digital access grants
//! with quota and premium policy, and reading session tracking.

use std::sync::Arc;

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared by the binary and embedders
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
