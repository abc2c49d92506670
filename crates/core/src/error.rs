use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store configuration: {0}")]
    Configuration(String),

    #[error("cannot connect to {backend}: {details}")]
    Connection { backend: String, details: String },

    #[error("read from {backend} failed: {details}")]
    Read { backend: String, details: String },

    #[error("write to {backend} failed: {details}")]
    Write { backend: String, details: String },

    #[error("invalid chunk input: {0}")]
    InvalidChunk(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn connection(backend: &str, details: impl ToString) -> Self {
        Self::Connection {
            backend: backend.to_string(),
            details: details.to_string(),
        }
    }

    pub(crate) fn read(backend: &str, details: impl ToString) -> Self {
        Self::Read {
            backend: backend.to_string(),
            details: details.to_string(),
        }
    }

    pub(crate) fn write(backend: &str, details: impl ToString) -> Self {
        Self::Write {
            backend: backend.to_string(),
            details: details.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf extraction task failed: {0}")]
    ExtractionTask(String),

    #[error("directory does not exist: {0}")]
    MissingDirectory(String),

    #[error("no pdf files found in {0}")]
    NoInput(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
