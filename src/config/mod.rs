pub mod parser;
pub mod types;
pub mod validate;

pub use parser::{ConfigError, ConfigParser};
pub use types::{CommonConfig, Config, LocationConfig, ServerConfig};
pub use validate::validate_config;
