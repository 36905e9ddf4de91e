pub mod models;
pub mod parser;

pub use models::{CircuitBreakerConfig, NodeConfig, RelayConfig};
pub use parser::{default_config_path, load_config, ConfigError};
