//! codesmithd: HTTP front end for the codesmith pipeline.

pub mod api;
pub mod clients;
pub mod config;
pub mod error;

pub use api::{router, AppState};
pub use config::Settings;
pub use error::{ApiError, ApiResult};
