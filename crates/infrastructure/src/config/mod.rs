pub mod loader;
pub mod settings;
pub mod validator;

pub use loader::{ConfigLoader, ConfigSource, ENV_PREFIX};
pub use settings::{AppConfig, LoggingSettings, PrimitiveConfig, StorageBackend, StorageConfig};
pub use validator::{validated, ConfigValidator};
