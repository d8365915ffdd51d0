pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod service;
pub mod specialists;
pub mod storage;
pub mod tasks;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use service::{AppState, create_app};
pub use specialists::Specialist;
