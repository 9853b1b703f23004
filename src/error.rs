//! Error taxonomy with a stable error-code catalogue.
//!
//! Every failure the foundation can surface maps to exactly one code in the
//! catalogue, and every code maps once to an HTTP status and a gRPC code.
//! Messages are sanitized before they leave the process; internal causes are
//! never exposed to clients.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tonic::Code;

/// Substrings that must never appear in a client-facing message.
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "token",
    "key",
    "credential",
    "bearer",
    "authorization",
    "private",
];

/// Unified error type for the foundation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChassisError {
    /// No credentials were presented.
    #[error("authentication token missing")]
    TokenMissing,

    /// Signature, issuer or key lookup failed.
    #[error("authentication token invalid")]
    TokenInvalid,

    /// Token expired beyond the allowed clock skew.
    #[error("authentication token expired at {expired_at}")]
    TokenExpired {
        /// When the token expired.
        expired_at: DateTime<Utc>,
    },

    /// Token structure could not be parsed or uses a rejected algorithm.
    #[error("authentication token malformed: {reason}")]
    TokenMalformed {
        /// What was wrong with the token shape.
        reason: String,
    },

    /// Required claims are missing or invalid.
    #[error("required claims invalid: {claims:?}")]
    ClaimsInvalid {
        /// The offending claim names.
        claims: Vec<String>,
    },

    /// A peer outside the trusted perimeter presented identity headers.
    #[error("untrusted peer {peer}")]
    UntrustedPeer {
        /// The rejected peer address.
        peer: String,
    },

    /// The gateway strategy found no identity header within the perimeter.
    #[error("missing identity header {header}")]
    MissingIdentityHeader {
        /// The configured header name that was absent.
        header: String,
    },

    /// The JWKS endpoint could not produce a usable key set.
    #[error("key set unavailable: {reason}")]
    KeySetUnavailable {
        /// Why the key set could not be built.
        reason: String,
    },

    /// A remote dependency (counter, bus, JWKS host) is unreachable.
    #[error("{service} unavailable")]
    StoreUnavailable {
        /// Logical name of the dependency.
        service: &'static str,
        /// Suggested retry delay.
        retry_after: Duration,
    },

    /// The rate gate denied the request.
    #[error("rate limit exceeded")]
    RateLimited {
        /// When the client may retry.
        retry_after: Duration,
        /// The advertised limit.
        limit: u32,
    },

    /// Another request holding the same idempotency key is still running.
    #[error("request with this idempotency key is already in progress")]
    IdempotencyInProgress,

    /// The idempotency key was reused with a different payload.
    #[error("idempotency key reused with a different payload")]
    IdempotencyConflict,

    /// Caller input failed validation.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What failed validation.
        reason: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout {
        /// How long the operation ran.
        duration: Duration,
    },

    /// Unexpected infrastructure fault; details are sanitized in responses.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable error codes grouped by class prefix.
///
/// `SYS_` infrastructure, `VAL_` malformed input, `AUTH_` authentication,
/// `RES_` resource state, `BIZ_` business rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unexpected infrastructure fault.
    Internal,
    /// A required dependency is unreachable.
    ServiceUnavailable,
    /// Input failed validation.
    InvalidInput,
    /// Credentials absent.
    MissingToken,
    /// Credentials present but rejected.
    InvalidToken,
    /// Credentials expired.
    ExpiredToken,
    /// Peer is outside the trust perimeter.
    Forbidden,
    /// Resource state conflict (in-progress or payload mismatch).
    Conflict,
    /// Business rate limit exceeded.
    RateLimited,
    /// Business rule violated.
    RuleViolation,
}

impl ErrorCode {
    /// The wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "SYS_INTERNAL_ERROR",
            Self::ServiceUnavailable => "SYS_SERVICE_UNAVAILABLE",
            Self::InvalidInput => "VAL_INVALID_INPUT",
            Self::MissingToken => "AUTH_MISSING_TOKEN",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::ExpiredToken => "AUTH_EXPIRED",
            Self::Forbidden => "AUTH_FORBIDDEN",
            Self::Conflict => "RES_CONFLICT",
            Self::RateLimited => "BIZ_RATE_LIMIT_EXCEEDED",
            Self::RuleViolation => "BIZ_RULE_VIOLATION",
        }
    }

    /// The HTTP status this code maps to at the transport boundary.
    pub fn http_status(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::MissingToken | Self::InvalidToken | Self::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::RuleViolation => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// The gRPC status code this code maps to.
    pub fn grpc_code(&self) -> Code {
        match self {
            Self::Internal => Code::Internal,
            Self::ServiceUnavailable => Code::Unavailable,
            Self::InvalidInput => Code::InvalidArgument,
            Self::MissingToken | Self::InvalidToken | Self::ExpiredToken => Code::Unauthenticated,
            Self::Forbidden => Code::PermissionDenied,
            Self::Conflict => Code::Aborted,
            Self::RateLimited => Code::ResourceExhausted,
            Self::RuleViolation => Code::FailedPrecondition,
        }
    }
}

impl ChassisError {
    /// The catalogue code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TokenMissing => ErrorCode::MissingToken,
            Self::TokenInvalid
            | Self::TokenMalformed { .. }
            | Self::ClaimsInvalid { .. }
            | Self::KeySetUnavailable { .. } => ErrorCode::InvalidToken,
            Self::TokenExpired { .. } => ErrorCode::ExpiredToken,
            Self::UntrustedPeer { .. } => ErrorCode::Forbidden,
            Self::MissingIdentityHeader { .. } => ErrorCode::MissingToken,
            Self::StoreUnavailable { .. } => ErrorCode::ServiceUnavailable,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::IdempotencyInProgress | Self::IdempotencyConflict => ErrorCode::Conflict,
            Self::InvalidInput { .. } => ErrorCode::InvalidInput,
            Self::Timeout { .. } => ErrorCode::ServiceUnavailable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Client-safe message for this error.
    ///
    /// Authentication failures intentionally collapse to a generic message
    /// so the cause is never leaked to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::TokenMissing => "authentication required".to_string(),
            Self::TokenInvalid
            | Self::TokenExpired { .. }
            | Self::TokenMalformed { .. }
            | Self::ClaimsInvalid { .. }
            | Self::KeySetUnavailable { .. }
            | Self::MissingIdentityHeader { .. } => "invalid credentials".to_string(),
            Self::UntrustedPeer { .. } => "forbidden".to_string(),
            Self::StoreUnavailable { service, .. } => {
                format!("{service} temporarily unavailable")
            }
            Self::RateLimited { .. } => "rate limit exceeded".to_string(),
            Self::IdempotencyInProgress => "request already in progress".to_string(),
            Self::IdempotencyConflict => {
                "idempotency key reused with a different payload".to_string()
            }
            Self::InvalidInput { reason } => sanitize_message(reason),
            Self::Timeout { .. } => "request timed out".to_string(),
            Self::Internal(_) => "internal error".to_string(),
        }
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::RateLimited { .. }
                | Self::IdempotencyInProgress
                | Self::Timeout { .. }
        )
    }

    /// Retry hint, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::StoreUnavailable { retry_after, .. } => Some(*retry_after),
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::IdempotencyInProgress => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    /// Converts this error into a gRPC status with a sanitized message.
    pub fn to_status(&self) -> tonic::Status {
        tonic::Status::new(self.code().grpc_code(), self.public_message())
    }
}

/// Strips a message down to a neutral phrase when it looks like it carries
/// credential material.
pub fn sanitize_message(message: &str) -> String {
    let lower = message.to_lowercase();
    for pattern in SENSITIVE_PATTERNS {
        if lower.contains(pattern) {
            return "invalid request".to_string();
        }
    }
    message.to_string()
}

impl From<jsonwebtoken::errors::Error> for ChassisError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => ChassisError::TokenExpired {
                expired_at: Utc::now(),
            },
            ErrorKind::InvalidSignature | ErrorKind::InvalidIssuer | ErrorKind::ImmatureSignature => {
                ChassisError::TokenInvalid
            }
            ErrorKind::MissingRequiredClaim(claim) => ChassisError::ClaimsInvalid {
                claims: vec![claim.to_string()],
            },
            ErrorKind::InvalidToken
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => ChassisError::TokenMalformed {
                reason: sanitize_message(&err.to_string()),
            },
            _ => ChassisError::TokenMalformed {
                reason: "token validation failed".to_string(),
            },
        }
    }
}

impl From<redis::RedisError> for ChassisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            ChassisError::Timeout {
                duration: Duration::from_secs(3),
            }
        } else {
            tracing::error!(error = %err, "counter command failed");
            ChassisError::StoreUnavailable {
                service: "counter",
                retry_after: Duration::from_secs(5),
            }
        }
    }
}

impl From<reqwest::Error> for ChassisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChassisError::Timeout {
                duration: Duration::from_secs(10),
            }
        } else if err.is_connect() {
            ChassisError::StoreUnavailable {
                service: "jwks",
                retry_after: Duration::from_secs(5),
            }
        } else {
            ChassisError::KeySetUnavailable {
                reason: sanitize_message(&err.to_string()),
            }
        }
    }
}

impl From<serde_json::Error> for ChassisError {
    fn from(err: serde_json::Error) -> Self {
        ChassisError::InvalidInput {
            reason: format!("malformed JSON: {err}"),
        }
    }
}

impl From<std::io::Error> for ChassisError {
    fn from(err: std::io::Error) -> Self {
        ChassisError::Internal(anyhow::anyhow!("io error: {err}"))
    }
}
