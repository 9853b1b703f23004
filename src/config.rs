//! Environment-driven configuration.
//!
//! Every knob has a default so a bare environment boots a development
//! instance; production deployments override through the environment only.
//! Parse failures are surfaced instead of silently defaulted, because a
//! half-applied configuration is worse than a crashed boot.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::audit::AuditConfig;
use crate::bus::BusConfig;
use crate::error::ChassisError;
use crate::idempotency::IdempotencyConfig;
use crate::jwks::JwksConfig;
use crate::ratelimit::RateLimitSettings;
use crate::server::{MtlsConfig, ServerConfig};

/// Logging knobs; the subscriber itself is installed by the binary.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level (`trace` … `error`).
    pub level: String,
    /// Output format (`json` or `text`).
    pub format: String,
}

/// Complete foundation configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging knobs.
    pub log: LogConfig,
    /// Listener and shutdown configuration.
    pub server: ServerConfig,
    /// Token verifier configuration.
    pub jwks: JwksConfig,
    /// Default rate-limit parameters.
    pub rate_limit: RateLimitSettings,
    /// Idempotency gate configuration.
    pub idempotency: IdempotencyConfig,
    /// Audit trail configuration.
    pub audit: AuditConfig,
    /// Remote counter DSN.
    pub cache_url: String,
    /// Message bus bootstrap brokers.
    pub bus: BusConfig,
    /// CIDRs trusted to present gateway identity headers.
    pub trusted_proxies: Vec<String>,
}

impl Config {
    /// Loads configuration from the environment (and `.env` in development).
    pub fn from_env() -> Result<Self, ChassisError> {
        dotenvy::dotenv().ok();

        let http_enabled = parse_var("HTTP_ENABLED", true)?;
        let rpc_enabled = parse_var("GRPC_ENABLED", true)?;
        let http_port: u16 = parse_var("HTTP_PORT", 8080)?;
        let rpc_port: u16 = parse_var("GRPC_PORT", 9090)?;
        let host = var_or("HOST", "0.0.0.0");

        let mtls = if parse_var("MTLS_ENABLED", false)? {
            Some(MtlsConfig {
                ca_cert: require_var("MTLS_CA_CERT")?.into(),
                server_cert: require_var("MTLS_SERVER_CERT")?.into(),
                server_key: require_var("MTLS_SERVER_KEY")?.into(),
            })
        } else {
            None
        };

        let server = ServerConfig {
            http_addr: listener_addr(http_enabled, &host, http_port)?,
            rpc_addr: listener_addr(rpc_enabled, &host, rpc_port)?,
            http_request_timeout: secs_var("HTTP_REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout: secs_var("SHUTDOWN_TIMEOUT_SECS", 10)?,
            mtls,
        };

        let jwks = JwksConfig {
            url: var_or("JWKS_URL", "http://localhost:8081/.well-known/jwks.json"),
            issuer: var_or("JWT_ISSUER", "http://localhost:8081"),
            refresh_interval: secs_var("JWKS_REFRESH_SECS", 300)?,
            max_stale: secs_var("JWKS_MAX_STALE_SECS", 86_400)?,
        };

        let rate_limit = RateLimitSettings {
            rate: parse_var("RATE_LIMIT_RATE", 0)?,
            burst: parse_var("RATE_LIMIT_BURST", 0)?,
            period: secs_var("RATE_LIMIT_PERIOD_SECS", 1)?,
        };

        let idempotency = IdempotencyConfig {
            header: var_or("IDEMPOTENCY_HEADER", "X-Idempotency-Key"),
            processing_ttl: secs_var("IDEMPOTENCY_PROCESSING_TTL_SECS", 30)?,
            replay_ttl: secs_var("IDEMPOTENCY_REPLAY_TTL_SECS", 86_400)?,
        };

        let audit = AuditConfig {
            enabled: parse_var("AUDIT_ENABLED", true)?,
            buffer_size: parse_var("AUDIT_BUFFER_SIZE", 1024)?,
            block_on_full: parse_var("AUDIT_BLOCK_ON_FULL", false)?,
            max_body_size: parse_var("AUDIT_MAX_BODY_SIZE", 32_768)?,
            exclude_paths: list_var("AUDIT_EXCLUDE_PATHS", &["/health", "/ready", "/metrics"]),
        };

        let bus = BusConfig {
            brokers: list_var("BUS_BROKERS", &["localhost:9092"]),
        };

        Ok(Config {
            log: LogConfig {
                level: var_or("LOG_LEVEL", "info"),
                format: var_or("LOG_FORMAT", "json"),
            },
            server,
            jwks,
            rate_limit,
            idempotency,
            audit,
            cache_url: var_or("CACHE_URL", "redis://127.0.0.1:6379/0"),
            bus,
            trusted_proxies: list_var("TRUSTED_PROXIES", &[]),
        })
    }
}

fn listener_addr(
    enabled: bool,
    host: &str,
    port: u16,
) -> Result<Option<SocketAddr>, ChassisError> {
    if !enabled {
        return Ok(None);
    }
    format!("{host}:{port}")
        .parse()
        .map(Some)
        .map_err(|err| ChassisError::InvalidInput {
            reason: format!("invalid listener address {host}:{port}: {err}"),
        })
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn require_var(name: &str) -> Result<String, ChassisError> {
    env::var(name).map_err(|_| ChassisError::InvalidInput {
        reason: format!("{name} is required"),
    })
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ChassisError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|err| ChassisError::InvalidInput {
            reason: format!("{name}: {err}"),
        }),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration, ChassisError> {
    Ok(Duration::from_secs(parse_var(name, default)?))
}

fn list_var(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default.iter().map(|item| item.to_string()).collect(),
    }
}
