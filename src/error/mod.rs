mod app;
mod config;
mod handler;
mod metrics;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use handler::HandlerError;
pub use metrics::MetricsError;
pub use validation::ValidationError;
