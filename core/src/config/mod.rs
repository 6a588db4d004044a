mod load;
mod types;

pub use load::{apply_env_overrides, get_outpost_data_dir, load, load_default};
pub use types::{
    AppConfig, LoggingConfig, RetryConfig, RunnerConfig, ServerConfig, ShutdownConfig,
    StreamConfig,
};
