//! Classification of failures returned by the remote secrets service.
//!
//! The service reports failures as an error code plus message. Transport-level
//! failures (refused connections, resets, timeouts) never reach the service and
//! are classified from the underlying error instead.

use std::fmt;

/// Service code returned when a caller is throttled
pub const REJECTED_THROTTLING: &str = "Rejected.Throttling";
/// Service code returned while the service is temporarily unavailable
pub const SERVICE_UNAVAILABLE_TEMPORARY: &str = "ServiceUnavailableTemporary";
/// Service code returned on an internal service failure
pub const INTERNAL_FAILURE: &str = "InternalFailure";
/// Account suspended for an overdue payment
pub const FORBIDDEN_IN_DEBT_OVERDUE: &str = "Forbidden.InDebtOverdue";
/// Account suspended for debt
pub const FORBIDDEN_IN_DEBT: &str = "Forbidden.InDebt";

const CONNECTION_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "no connection could be made",
    "a connection attempt failed because the connected party did not properly respond",
    "broken pipe",
    "network is unreachable",
    "established connection failed because connected host has failed to respond",
];

/// Broad category of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Caller is being rate limited
    Throttling,
    /// Service temporarily unavailable
    ServiceUnavailable,
    /// Service-side internal failure
    InternalFailure,
    /// Request or connect timed out
    Timeout,
    /// Connection could not be established or was dropped
    Connection,
    /// Credentials were rejected or lack permission
    Unauthorized,
    /// Request was malformed
    BadRequest,
    /// Secret or version does not exist
    NotFound,
    /// Account is suspended (billing)
    AccountSuspended,
    /// Any other application-level error
    Other,
}

impl RemoteErrorKind {
    /// Map a service error code to a kind
    pub fn from_code(code: &str) -> Self {
        match code {
            REJECTED_THROTTLING => Self::Throttling,
            SERVICE_UNAVAILABLE_TEMPORARY => Self::ServiceUnavailable,
            INTERNAL_FAILURE => Self::InternalFailure,
            FORBIDDEN_IN_DEBT | FORBIDDEN_IN_DEBT_OVERDUE => Self::AccountSuspended,
            c if c.ends_with("NotFound") || c == "Forbidden.ResourceNotFound" => Self::NotFound,
            c if c.starts_with("InvalidAccessKeyId")
                || c.starts_with("IncompleteSignature")
                || c.starts_with("SignatureDoesNotMatch")
                || c.starts_with("InvalidSecurityToken")
                || c.starts_with("Forbidden") =>
            {
                Self::Unauthorized
            }
            c if c.starts_with("InvalidParameter")
                || c.starts_with("MissingParameter")
                || c.starts_with("InvalidParam")
                || c.starts_with("MissingParam") =>
            {
                Self::BadRequest
            }
            _ => Self::Other,
        }
    }

    /// Service-side pressure that warrants waiting before the next attempt
    pub fn needs_backoff(&self) -> bool {
        matches!(self, Self::Throttling | Self::ServiceUnavailable | Self::InternalFailure)
    }

    /// Failures worth retrying and racing across other endpoints
    pub fn is_recoverable(&self) -> bool {
        self.needs_backoff() || matches!(self, Self::Timeout | Self::Connection)
    }

    /// Account-state failures that make eager initialization abort
    pub fn is_account_state_fatal(&self) -> bool {
        matches!(self, Self::AccountSuspended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throttling => "throttling",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalFailure => "internal_failure",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Unauthorized => "unauthorized",
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::AccountSuspended => "account_suspended",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure reported by (or on the way to) the remote service
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    /// Service error code, absent for transport failures
    pub code: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
    /// HTTP status, when a response was received
    pub status: Option<u16>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}): {}", code, self.kind, self.message)?,
            None => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " [request_id={}]", request_id)?;
        }
        Ok(())
    }
}

impl RemoteError {
    /// Create an error of the given kind without a service code
    pub fn new<S: Into<String>>(kind: RemoteErrorKind, message: S) -> Self {
        Self { kind, code: None, message: message.into(), request_id: None, status: None }
    }

    /// Create an error from a service error code
    pub fn from_code<C: Into<String>, S: Into<String>>(code: C, message: S) -> Self {
        let code = code.into();
        Self {
            kind: RemoteErrorKind::from_code(&code),
            code: Some(code),
            message: message.into(),
            request_id: None,
            status: None,
        }
    }

    /// Create a connection failure
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::new(RemoteErrorKind::Connection, message)
    }

    /// Create a timeout failure
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    /// Classify a transport failure by its message text
    pub fn from_transport_message<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("timed out") || lower.contains("timeout") {
            RemoteErrorKind::Timeout
        } else if CONNECTION_ERRORS.iter().any(|pattern| lower.contains(pattern)) {
            RemoteErrorKind::Connection
        } else {
            RemoteErrorKind::Other
        };
        Self::new(kind, message)
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        let mut message = error.to_string();
        let mut source = std::error::Error::source(&error);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }

        let classified = if error.is_timeout() {
            Self::timeout(message)
        } else if error.is_connect() {
            Self::connection(message)
        } else {
            Self::from_transport_message(message)
        };
        match error.status() {
            Some(status) => classified.with_status(status.as_u16()),
            None => classified,
        }
    }
}
