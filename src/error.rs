use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobqError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("job with id \"{0}\" already exists")]
    DuplicateId(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, JobqError>;
