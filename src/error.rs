/// Error produced by the metrics collaborators.
///
/// Pipeline operations never return it to their callers: delivery and
/// storage failures are logged, retried, or reported as `error` metrics.
/// It surfaces only from constructors and from transport implementations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("collector responded with status {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("batch rejected by collector: {0}")]
    BadRequest(serde_json::Value),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for MetricsError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                reason: value.to_string(),
            },
            None => Self::Transport(value.to_string()),
        }
    }
}

impl MetricsError {
    /// Name reported in the `errorName` field of an error metric.
    pub fn name(&self) -> &'static str {
        match self {
            MetricsError::Transport(_) => "TransportError",
            MetricsError::Http { .. } => "HttpError",
            MetricsError::BadRequest(_) => "BadRequest",
            MetricsError::Storage(_) => "StorageError",
            MetricsError::Json(_) => "JsonError",
            MetricsError::InvalidUrl(_) => "InvalidUrl",
            MetricsError::Io(_) => "IoError",
        }
    }
}
