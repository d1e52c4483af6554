pub type FleetResult<T = (), E = FleetError> = Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
    #[error("Missing required setting: {0}")]
    MissingSetting(String),
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
    #[error("Config already initialized")]
    AlreadyInitialized,
    #[error("Config not initialized")]
    NotInitialized,
    #[error("Logging error: {0}")]
    Logging(String),
}
