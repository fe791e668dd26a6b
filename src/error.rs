//! Failure taxonomy for calls to the grade service.
//!
//! Every failed call ends up as an [`ApiError`] whose [`ErrorClass`] is chosen
//! by [`classify`], a pure function of what came back (a status code, or the
//! kind of transport failure when nothing did).

use crate::storage::StorageError;
use serde_json::Value;
use thiserror::Error;

/// What went wrong while sending, when no response was received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The configured timeout elapsed
    TimedOut,
    /// DNS lookup or TCP/TLS connect failed
    ConnectFailed,
    /// The request went out but the connection died before a response
    ResponseLost,
    /// Anything else (bad URL, unsupported scheme, ...)
    Other,
}

/// The structured outcome of a failed call, before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Transport(TransportKind),
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Timeout,
    NetworkUnreachable,
    NoResponse,
    UnknownTransport,
    Unauthorized,
    Forbidden,
    /// Validation errors and any other 4xx/5xx
    Rejected,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NetworkUnreachable => "network_unreachable",
            Self::NoResponse => "no_response",
            Self::UnknownTransport => "unknown_transport",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Rejected => "rejected",
        }
    }
}

pub fn classify(outcome: Outcome) -> ErrorClass {
    match outcome {
        Outcome::Transport(TransportKind::TimedOut) => ErrorClass::Timeout,
        Outcome::Transport(TransportKind::ConnectFailed) => ErrorClass::NetworkUnreachable,
        Outcome::Transport(TransportKind::ResponseLost) => ErrorClass::NoResponse,
        Outcome::Transport(TransportKind::Other) => ErrorClass::UnknownTransport,
        Outcome::Status(401) => ErrorClass::Unauthorized,
        Outcome::Status(403) => ErrorClass::Forbidden,
        Outcome::Status(_) => ErrorClass::Rejected,
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}

/// The call a message is being produced for; login phrases some classes differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Login,
    Other,
}

const TIMEOUT_MSG: &str =
    "Request timeout. The server may be waking up. Please wait 30 seconds and try again.";
const UNREACHABLE_MSG: &str =
    "Cannot connect to server. Please check your internet connection or try again later.";
const NO_RESPONSE_MSG: &str =
    "Cannot connect to server. The backend may be starting up. Please wait a moment and try again.";
const LOGIN_FAILED_MSG: &str = "Login failed. Please try again.";
const REQUEST_FAILED_MSG: &str = "Request failed. Please try again.";
const INVALID_CREDENTIALS_MSG: &str = "Invalid username or password.";
const SESSION_EXPIRED_MSG: &str = "Session expired. Please log in again.";
const LOGIN_FORBIDDEN_MSG: &str = "Access denied. Your account may be disabled.";
const FORBIDDEN_MSG: &str = "Access denied.";
const OPERATION_FAILED_MSG: &str = "Operation failed.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed ({class}): {detail}")]
    Transport { class: ErrorClass, detail: String },

    #[error("HTTP {status}{}", message_suffix(.server_message))]
    Status {
        class: ErrorClass,
        status: u16,
        server_message: Option<String>,
        body: String,
    },

    #[error("unexpected response body from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request body for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("login response is missing {0}")]
    IncompleteLogin(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn transport(kind: TransportKind, detail: impl Into<String>) -> Self {
        Self::Transport {
            class: classify(Outcome::Transport(kind)),
            detail: detail.into(),
        }
    }

    /// Build a status error, pulling `message`/`error` out of a JSON body when present
    pub fn status(status: u16, body: &[u8]) -> Self {
        let body = String::from_utf8_lossy(body).into_owned();
        Self::Status {
            class: classify(Outcome::Status(status)),
            status,
            server_message: server_message(&body),
            body,
        }
    }

    /// `None` for failures that are not about the exchange itself (encode, decode, storage, ...)
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Transport { class, .. } | Self::Status { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.class() == Some(ErrorClass::Unauthorized)
    }

    /// The human-readable message shown to the user
    pub fn user_message(&self, op: Operation) -> String {
        let server = match self {
            Self::Status { server_message, .. } => server_message.as_deref(),
            _ => None,
        };
        match (self.class(), op) {
            (Some(ErrorClass::Timeout), _) => TIMEOUT_MSG.to_string(),
            (Some(ErrorClass::NetworkUnreachable), _) => UNREACHABLE_MSG.to_string(),
            (Some(ErrorClass::NoResponse), _) => NO_RESPONSE_MSG.to_string(),
            (Some(ErrorClass::UnknownTransport), Operation::Login) => LOGIN_FAILED_MSG.to_string(),
            (Some(ErrorClass::UnknownTransport), Operation::Other) => {
                REQUEST_FAILED_MSG.to_string()
            }
            (Some(ErrorClass::Unauthorized), Operation::Login) => {
                INVALID_CREDENTIALS_MSG.to_string()
            }
            (Some(ErrorClass::Unauthorized), Operation::Other) => SESSION_EXPIRED_MSG.to_string(),
            (Some(ErrorClass::Forbidden), Operation::Login) => LOGIN_FORBIDDEN_MSG.to_string(),
            (Some(ErrorClass::Forbidden), Operation::Other) => {
                server.unwrap_or(FORBIDDEN_MSG).to_string()
            }
            (Some(ErrorClass::Rejected), _) => server.unwrap_or(OPERATION_FAILED_MSG).to_string(),
            (None, Operation::Login) => format!("{} ({})", LOGIN_FAILED_MSG, self),
            (None, Operation::Other) => self.to_string(),
        }
    }
}

/// `message`, then `error`, then the raw body text when it is not JSON
fn server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => ["message", "error"].iter().find_map(|field| {
            map.get(*field)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        }),
        Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transport_kinds() {
        assert_eq!(
            classify(Outcome::Transport(TransportKind::TimedOut)),
            ErrorClass::Timeout
        );
        assert_eq!(
            classify(Outcome::Transport(TransportKind::ConnectFailed)),
            ErrorClass::NetworkUnreachable
        );
        assert_eq!(
            classify(Outcome::Transport(TransportKind::ResponseLost)),
            ErrorClass::NoResponse
        );
        assert_eq!(
            classify(Outcome::Transport(TransportKind::Other)),
            ErrorClass::UnknownTransport
        );
    }

    #[test]
    fn test_classify_statuses() {
        assert_eq!(classify(Outcome::Status(401)), ErrorClass::Unauthorized);
        assert_eq!(classify(Outcome::Status(403)), ErrorClass::Forbidden);
        assert_eq!(classify(Outcome::Status(400)), ErrorClass::Rejected);
        assert_eq!(classify(Outcome::Status(404)), ErrorClass::Rejected);
        assert_eq!(classify(Outcome::Status(503)), ErrorClass::Rejected);
    }

    #[test]
    fn test_login_messages() {
        let err = ApiError::status(401, br#"{"message":"Bad credentials"}"#);
        assert_eq!(err.user_message(Operation::Login), "Invalid username or password.");

        let err = ApiError::status(403, b"");
        assert_eq!(
            err.user_message(Operation::Login),
            "Access denied. Your account may be disabled."
        );

        let err = ApiError::transport(TransportKind::Other, "invalid url");
        assert_eq!(err.user_message(Operation::Login), "Login failed. Please try again.");
    }

    #[test]
    fn test_transport_messages_are_distinct() {
        let msgs: Vec<String> = [
            TransportKind::TimedOut,
            TransportKind::ConnectFailed,
            TransportKind::ResponseLost,
            TransportKind::Other,
        ]
        .iter()
        .map(|k| ApiError::transport(*k, "x").user_message(Operation::Other))
        .collect();
        for (i, a) in msgs.iter().enumerate() {
            for b in &msgs[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(msgs[0].contains("timeout"));
    }

    #[test]
    fn test_server_message_precedence() {
        let err = ApiError::status(400, br#"{"message":"Email taken","error":"Bad Request"}"#);
        assert_eq!(err.user_message(Operation::Other), "Email taken");

        let err = ApiError::status(500, br#"{"error":"Internal Server Error"}"#);
        assert_eq!(err.user_message(Operation::Other), "Internal Server Error");

        let err = ApiError::status(409, b"Course code already exists");
        assert_eq!(err.user_message(Operation::Other), "Course code already exists");

        let err = ApiError::status(500, b"");
        assert_eq!(err.user_message(Operation::Other), "Operation failed.");

        let err = ApiError::status(422, br#"{"message":"","status":422}"#);
        assert_eq!(err.user_message(Operation::Other), "Operation failed.");
    }

    #[test]
    fn test_forbidden_outside_login_uses_server_message() {
        let err = ApiError::status(403, br#"{"message":"Admins only"}"#);
        assert_eq!(err.user_message(Operation::Other), "Admins only");
        let err = ApiError::status(403, b"");
        assert_eq!(err.user_message(Operation::Other), "Access denied.");
    }

    #[test]
    fn test_status_display() {
        let err = ApiError::status(404, br#"{"message":"Student not found"}"#);
        assert_eq!(err.to_string(), "HTTP 404: Student not found");
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
        assert!(!err.is_unauthorized());
        assert!(ApiError::status(401, b"").is_unauthorized());
    }
}
