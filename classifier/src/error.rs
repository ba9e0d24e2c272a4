use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid coordinates: {0}")]
    Coordinates(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl ClassifierError {
    pub fn config(message: impl Into<String>) -> Self {
        ClassifierError::Config(message.into())
    }
}

pub type ClassifierResult<T> = std::result::Result<T, ClassifierError>;
