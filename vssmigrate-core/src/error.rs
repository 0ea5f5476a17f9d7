use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid revision source: {0}")]
    InvalidSource(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Command `{command}` failed with exit code {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Operation aborted")]
    Aborted,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
