use thiserror::Error;

/// Core error type for the markglow relay.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Connection refused, non-200 status, or transport failure before the body was read.
    #[error("provider {provider} unavailable: {detail}")]
    UpstreamUnavailable {
        provider: String,
        status: Option<u16>,
        detail: String,
    },

    /// The upstream stream carried an `error` frame.
    #[error("upstream error: {message}")]
    UpstreamProtocol {
        message: String,
        code: Option<String>,
    },

    /// The client-facing channel rejected a write (client went away).
    #[error("client write failed: {0}")]
    ClientWrite(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// True when the client is unreachable and no terminal event can be delivered.
    pub fn is_client_gone(&self) -> bool {
        matches!(self, Self::ClientWrite(_))
    }

    /// Short, stable label used in span fields and usage records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamProtocol { .. } => "upstream_protocol",
            Self::ClientWrite(_) => "client_write",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, RelayError>;
