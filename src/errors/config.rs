use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid timing configuration: {0}")]
    InvalidTiming(String),
}

impl ConfigError {
    pub fn timing(details: impl Into<String>) -> Self {
        ConfigError::InvalidTiming(details.into())
    }
}
