//! Error catalogue: stable codes and transport mappings.

use std::time::Duration;

use chassis::error::{sanitize_message, ChassisError, ErrorCode};
use http::StatusCode;
use tonic::Code;

#[test]
fn codes_are_stable() {
    assert_eq!(ErrorCode::Internal.as_str(), "SYS_INTERNAL_ERROR");
    assert_eq!(ErrorCode::ServiceUnavailable.as_str(), "SYS_SERVICE_UNAVAILABLE");
    assert_eq!(ErrorCode::InvalidInput.as_str(), "VAL_INVALID_INPUT");
    assert_eq!(ErrorCode::MissingToken.as_str(), "AUTH_MISSING_TOKEN");
    assert_eq!(ErrorCode::InvalidToken.as_str(), "AUTH_INVALID_TOKEN");
    assert_eq!(ErrorCode::ExpiredToken.as_str(), "AUTH_EXPIRED");
    assert_eq!(ErrorCode::Forbidden.as_str(), "AUTH_FORBIDDEN");
    assert_eq!(ErrorCode::Conflict.as_str(), "RES_CONFLICT");
    assert_eq!(ErrorCode::RateLimited.as_str(), "BIZ_RATE_LIMIT_EXCEEDED");
    assert_eq!(ErrorCode::RuleViolation.as_str(), "BIZ_RULE_VIOLATION");
}

#[test]
fn http_statuses_follow_the_class() {
    assert_eq!(ErrorCode::MissingToken.http_status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ErrorCode::InvalidToken.http_status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ErrorCode::Forbidden.http_status(), StatusCode::FORBIDDEN);
    assert_eq!(ErrorCode::RateLimited.http_status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(ErrorCode::Conflict.http_status(), StatusCode::CONFLICT);
    assert_eq!(
        ErrorCode::ServiceUnavailable.http_status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        ErrorCode::Internal.http_status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn grpc_codes_follow_the_class() {
    assert_eq!(ErrorCode::MissingToken.grpc_code(), Code::Unauthenticated);
    assert_eq!(ErrorCode::Forbidden.grpc_code(), Code::PermissionDenied);
    assert_eq!(ErrorCode::RateLimited.grpc_code(), Code::ResourceExhausted);
    assert_eq!(ErrorCode::Internal.grpc_code(), Code::Internal);
    assert_eq!(ErrorCode::ServiceUnavailable.grpc_code(), Code::Unavailable);
}

#[test]
fn auth_failures_never_leak_their_cause() {
    let errors = [
        ChassisError::TokenInvalid,
        ChassisError::TokenExpired {
            expired_at: chrono::Utc::now(),
        },
        ChassisError::TokenMalformed {
            reason: "kid header refers to secret key material".to_string(),
        },
        ChassisError::ClaimsInvalid {
            claims: vec!["exp".to_string()],
        },
    ];
    for err in &errors {
        assert_eq!(err.public_message(), "invalid credentials", "{err}");
    }
}

#[test]
fn sensitive_substrings_are_scrubbed() {
    assert_eq!(sanitize_message("bad password for bob"), "invalid request");
    assert_eq!(sanitize_message("Bearer abc123 rejected"), "invalid request");
    assert_eq!(sanitize_message("field must be a number"), "field must be a number");
}

#[test]
fn retryability_classification() {
    assert!(ChassisError::StoreUnavailable {
        service: "counter",
        retry_after: Duration::from_secs(5),
    }
    .is_retryable());
    assert!(ChassisError::RateLimited {
        retry_after: Duration::from_secs(1),
        limit: 10,
    }
    .is_retryable());
    assert!(ChassisError::IdempotencyInProgress.is_retryable());
    assert!(!ChassisError::IdempotencyConflict.is_retryable());
    assert!(!ChassisError::TokenInvalid.is_retryable());
}

#[test]
fn status_conversion_uses_the_catalogue() {
    let status = ChassisError::UntrustedPeer {
        peer: "203.0.113.5".to_string(),
    }
    .to_status();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = ChassisError::TokenMissing.to_status();
    assert_eq!(status.code(), Code::Unauthenticated);
}
