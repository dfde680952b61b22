use http::StatusCode;
use thiserror::Error;

/// Unified error type for the tunnel proxy
#[derive(Error, Debug)]
pub enum TunnelError {
    // Client request errors
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Client closed the connection before sending a request")]
    ClientClosed,

    #[error("Timed out waiting for the client request")]
    ClientTimeout,

    // Outbound resolution errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Direct connect failed: {0}")]
    DirectConnectFailed(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Operation timed out")]
    Timeout,

    // Pool refresh errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// Get the HTTP status code sent to the client for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            TunnelError::BadRequest(_) => StatusCode::BAD_REQUEST,

            // Never written: silent errors close the client without a reply
            TunnelError::ClientClosed | TunnelError::ClientTimeout => StatusCode::REQUEST_TIMEOUT,

            // 405 Method Not Allowed
            TunnelError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,

            // 502 Bad Gateway
            TunnelError::NoProxiesAvailable
            | TunnelError::DirectConnectFailed(_)
            | TunnelError::ProxyConnectionFailed(_)
            | TunnelError::InvalidProxyAddress(_)
            | TunnelError::Timeout => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            TunnelError::Http(_)
            | TunnelError::UnexpectedStatus(_)
            | TunnelError::InvalidConfig(_)
            | TunnelError::Io(_)
            | TunnelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client connection is closed without any reply
    pub fn is_silent(&self) -> bool {
        matches!(self, TunnelError::ClientClosed | TunnelError::ClientTimeout)
    }
}

impl From<reqwest::Error> for TunnelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TunnelError::Timeout
        } else {
            TunnelError::Http(err.to_string())
        }
    }
}

impl From<url::ParseError> for TunnelError {
    fn from(err: url::ParseError) -> Self {
        TunnelError::InvalidProxyAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            TunnelError::BadRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TunnelError::MethodNotAllowed("GET".to_string()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            TunnelError::NoProxiesAvailable.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            TunnelError::ProxyConnectionFailed("refused".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(TunnelError::Timeout.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            TunnelError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            TunnelError::Io(std::io::Error::other("reset")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_silent_errors() {
        assert!(TunnelError::ClientClosed.is_silent());
        assert!(TunnelError::ClientTimeout.is_silent());
        assert!(!TunnelError::BadRequest("bad".to_string()).is_silent());
        assert!(!TunnelError::MethodNotAllowed("GET".to_string()).is_silent());
        assert!(!TunnelError::Timeout.is_silent());
    }
}
