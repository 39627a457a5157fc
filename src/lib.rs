pub mod cache;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod fairing;
pub mod images;
pub mod request;
pub mod scaling;

pub use config::{AppConfig, ConfigError, Settings};
pub use engine::Engine;
pub use error::Rejection;
pub use fairing::ResponsiveImages;
