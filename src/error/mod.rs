use thiserror::Error;

/// Maximum number of characters of a response body kept in an error message.
const MAX_BODY_IN_MESSAGE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Transport errors
    Timeout,
    Network,
    Redirect,

    // Client errors (4xx)
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    ClientClosed,

    // Server errors (5xx)
    ServerError,

    // Local errors
    IllegalArgument,
    IllegalState,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Network => "NETWORK",
            ErrorCode::Redirect => "REDIRECT",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::ClientClosed => "CLIENT_CLOSED",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::IllegalArgument => "ILLEGAL_ARGUMENT",
            ErrorCode::IllegalState => "ILLEGAL_STATE",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Classify a non-success HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            300..=399 => ErrorCode::Redirect,
            400 => ErrorCode::BadRequest,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            405 => ErrorCode::MethodNotAllowed,
            408 => ErrorCode::Timeout,
            413 => ErrorCode::PayloadTooLarge,
            499 => ErrorCode::ClientClosed,
            402..=498 => ErrorCode::BadRequest,
            500..=599 => ErrorCode::ServerError,
            _ => ErrorCode::Unknown,
        }
    }

    /// Only a closed/cancelled request is treated as transient by the transport retrier.
    pub fn is_retriable_by_transport(&self) -> bool {
        matches!(self, ErrorCode::ClientClosed)
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct FlagKitError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FlagKitError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build an error from a failed HTTP response.
    pub fn from_response(status: u16, body: &str) -> Self {
        let body: String = body.chars().take(MAX_BODY_IN_MESSAGE).collect();
        Self::new(
            ErrorCode::from_status(status),
            format!("HTTP {} - {}", status, body),
        )
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalArgument, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalState, message)
    }

    pub fn is_transport_retriable(&self) -> bool {
        self.code.is_retriable_by_transport()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, FlagKitError>;
