use reqwest::StatusCode;
use thiserror::Error;

use crate::time_window::WindowError;

/// Failure of a telemetry query. Every variant is transient from the caller's point of
/// view: nothing here is retried automatically, the caller decides.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("telemetry service unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("telemetry query timed out")]
    Timeout,
    #[error("telemetry service returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed telemetry response at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        true
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

/// Failure of a single image in a batch. Isolated to that image.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("image store rejected credentials (HTTP {status})")]
    Auth { status: StatusCode },
    #[error("image store returned HTTP {status}")]
    Status { status: StatusCode },
    #[error("image request timed out")]
    Timeout,
    #[error("image store unreachable: {0}")]
    Transport(String),
    #[error("image body could not be decoded: {0}")]
    Decode(String),
    #[error("temporary image buffer failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
            || matches!(self, Self::Status { status } if status.is_server_error())
    }

    pub(crate) fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Self::Auth { status }
        } else {
            Self::Status { status }
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("image page is locked; enter the dashboard password first")]
    Locked,
}
