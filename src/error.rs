use thiserror::Error;

/// Failure of the persistent store's underlying medium.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to serialize value for key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage rejected the operation: {0}")]
    Medium(#[from] sqlx::Error),
    #[error("failed to prepare storage location: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can go wrong while sending a chat message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No HTTP response was received.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("OpenAI API Error: {message}")]
    Api {
        status: u16,
        message: String,
        kind: Option<String>,
        code: Option<String>,
    },

    #[error("failed to decode completion response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("the completion response contained no choices")]
    EmptyCompletion,

    #[error("a message is already awaiting a response")]
    Busy,
}

/// Rejected image attachment.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image file is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported image type '{0}', only JPEG, PNG, GIF and WebP are accepted")]
    UnsupportedType(String),
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
}
