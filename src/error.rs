use thiserror::Error;

/// Broad classification of a [`SealError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Data,
    Security,
}

/// Base fault type for every sealbus operation.
#[derive(Error, Debug)]
pub enum SealError {
    /// Reading or writing the underlying stream or file failed.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Marshaling failure: unknown type tag, malformed envelope.
    #[error("Data error: {0}")]
    Data(String),

    /// Cryptography or protocol-state failure.
    #[error("Security error: {0}")]
    Security(String),
}

impl SealError {
    pub fn data<S: Into<String>>(msg: S) -> Self {
        Self::Data(msg.into())
    }

    pub fn security<S: Into<String>>(msg: S) -> Self {
        Self::Security(msg.into())
    }

    /// Illegal handshake phase transition or premature accessor call.
    pub fn illegal_state<S: std::fmt::Debug>(state: S) -> Self {
        Self::Security(format!("illegal state: {:?}", state))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Data(_) => ErrorKind::Data,
            Self::Security(_) => ErrorKind::Security,
        }
    }

    pub fn is_security(&self) -> bool {
        self.kind() == ErrorKind::Security
    }

    /// Message carried by `Data` and `Security` errors.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Transport(_) => None,
            Self::Data(msg) | Self::Security(msg) => Some(msg),
        }
    }

    /// Maps a bincode failure on an envelope: I/O stays a transport error,
    /// everything else is a marshaling error.
    pub(crate) fn from_envelope_codec(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io) => Self::Transport(io),
            other => Self::Data(other.to_string()),
        }
    }

    /// Maps a bincode failure on in-memory key material. Truncated or
    /// malformed keys are a security failure.
    pub(crate) fn from_key_codec(err: bincode::Error) -> Self {
        Self::Security(format!("malformed key material: {}", err))
    }
}

/// Result type alias using SealError
pub type SealResult<T> = Result<T, SealError>;

/// Convert SealError to HTTP status codes for transport responses
impl SealError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Data(_) => StatusCode::BAD_REQUEST,
            Self::Security(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl axum::response::IntoResponse for SealError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16()
        });
        (status, axum::Json(body)).into_response()
    }
}
