pub mod config;
pub mod error;

pub use config::{ModelSection, RolloutSection, ServerSection, ServiceConfig};
pub use error::{ConfigError, ConfigResult};
