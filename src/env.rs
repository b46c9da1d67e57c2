//! Environment variable validation and configuration module for storeproxy
//!
//! This module provides centralized validation and configuration management
//! for all environment variables read by the proxy.
//!
//! # Supported Environment Variables
//!
//! ## Server Configuration
//! - `STOREPROXY_HOST`: Server bind address (default: "0.0.0.0")
//! - `STOREPROXY_PORT`: Server port (default: "3000")
//!
//! ## Logging Configuration
//! - `RUST_LOG`: Standard Rust logging configuration
//! - `STOREPROXY_LOG_LEVEL`: Application-specific log level override
//!
//! ## Registry Configuration
//! - `STOREPROXY_ENDPOINTS_FILE`: JSON endpoint registry (default: "endpoints.json")
//! - `STOREPROXY_SECRET_KEYS`: Key ring for client secrets, `id:base64key[,id:base64key]`
//!
//! ## Identity Configuration
//! - `STOREPROXY_AUTHORITY_URL`: Identity provider authority (default: "https://login.microsoftonline.com")
//! - `STOREPROXY_IDENTITY_HEADER`: Header carrying the authenticated principal (default: "x-authenticated-user")
//!
//! ## Timing Configuration
//! - `STOREPROXY_TOKEN_SAFETY_MARGIN_SECS`: Refresh tokens this close to expiry (default: "300", at most 43200)
//! - `STOREPROXY_TOKEN_TIMEOUT_SECS`: Upper bound on one token acquisition (default: "30", at most 3600)
//! - `STOREPROXY_UPSTREAM_TIMEOUT_SECS`: Upstream request timeout (default: "100", at most 3600)
//!
//! # Usage
//!
//! ```rust
//! use storeproxy::env::{print_validation_results, validate_environment};
//!
//! let result = validate_environment();
//! print_validation_results(&result);
//! if let Ok(config) = result {
//!     println!("Server will bind to {}", config.bind_address);
//! }
//! ```

use axum::http::HeaderName;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::authz::DEFAULT_IDENTITY_HEADER;
use crate::security::SecretKeyRing;

const DEFAULT_LOG_LEVEL: &str = "storeproxy=info,tower_http=info";
const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

/// Largest accepted safety margin; tokens live at most a day
const MAX_SAFETY_MARGIN_SECS: u64 = 12 * 60 * 60;

/// Largest accepted token or upstream timeout
const MAX_TIMEOUT_SECS: u64 = 60 * 60;

/// Environment validation errors
#[derive(Debug, Clone)]
pub struct EnvValidationError {
    pub variable: String,
    pub message: String,
    pub severity: ErrorSeverity,
}

/// Severity level for environment validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    /// Critical errors that prevent application startup
    Critical,
    /// Warnings about missing optional variables or suboptimal configurations
    Warning,
    /// Informational messages about default values being used
    Info,
}

/// Validated application configuration derived from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Server
    pub host: String,
    pub port: u16,
    pub bind_address: SocketAddr,

    // Logging
    pub log_level: String,

    // Registry
    pub endpoints_file: PathBuf,
    pub secret_keys: Arc<SecretKeyRing>,

    // Identity
    pub authority_url: String,
    pub identity_header: HeaderName,

    // Timing
    pub token_safety_margin: Duration,
    pub token_timeout: Duration,
    pub upstream_timeout: Duration,
}

/// Validate all environment variables and return configuration or errors
pub fn validate_environment() -> Result<AppConfig, Vec<EnvValidationError>> {
    validate_with(|name| env::var(name).ok())
}

/// Validate configuration read through `lookup`
pub fn validate_with<F>(lookup: F) -> Result<AppConfig, Vec<EnvValidationError>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Server configuration
    let host = lookup("STOREPROXY_HOST").unwrap_or_else(|| {
        warnings.push(info_default("STOREPROXY_HOST", "Using default host '0.0.0.0'"));
        "0.0.0.0".to_string()
    });

    if IpAddr::from_str(&host).is_err() {
        errors.push(critical("STOREPROXY_HOST", format!("Invalid IP address: {}", host)));
    }

    let port = match lookup("STOREPROXY_PORT") {
        Some(port_str) => match port_str.parse::<u16>() {
            Ok(port) => {
                if port < 1024 && port != 0 {
                    warnings.push(EnvValidationError {
                        variable: "STOREPROXY_PORT".to_string(),
                        message: format!(
                            "Using privileged port {}, may require root privileges",
                            port
                        ),
                        severity: ErrorSeverity::Warning,
                    });
                }
                port
            }
            Err(_) => {
                errors.push(critical(
                    "STOREPROXY_PORT",
                    format!("Invalid port number: {}", port_str),
                ));
                3000
            }
        },
        None => {
            warnings.push(info_default("STOREPROXY_PORT", "Using default port 3000"));
            3000
        }
    };

    let bind_address = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

    // Logging configuration
    let log_level = lookup("STOREPROXY_LOG_LEVEL")
        .or_else(|| lookup("RUST_LOG"))
        .unwrap_or_else(|| {
            warnings.push(info_default(
                "RUST_LOG/STOREPROXY_LOG_LEVEL",
                &format!("Using default log level '{}'", DEFAULT_LOG_LEVEL),
            ));
            DEFAULT_LOG_LEVEL.to_string()
        });

    // Registry configuration
    let endpoints_file = PathBuf::from(lookup("STOREPROXY_ENDPOINTS_FILE").unwrap_or_else(|| {
        warnings.push(info_default(
            "STOREPROXY_ENDPOINTS_FILE",
            "Using default registry file 'endpoints.json'",
        ));
        "endpoints.json".to_string()
    }));

    let secret_keys = match lookup("STOREPROXY_SECRET_KEYS") {
        Some(entries) => match SecretKeyRing::parse(&entries) {
            Ok(ring) => {
                if ring.is_empty() {
                    warnings.push(no_keys_warning());
                }
                ring
            }
            Err(e) => {
                errors.push(critical("STOREPROXY_SECRET_KEYS", e.to_string()));
                SecretKeyRing::new()
            }
        },
        None => {
            warnings.push(no_keys_warning());
            SecretKeyRing::new()
        }
    };

    // Identity configuration
    let authority_url = lookup("STOREPROXY_AUTHORITY_URL").unwrap_or_else(|| {
        warnings.push(info_default(
            "STOREPROXY_AUTHORITY_URL",
            &format!("Using default authority '{}'", DEFAULT_AUTHORITY_URL),
        ));
        DEFAULT_AUTHORITY_URL.to_string()
    });

    if !authority_url.starts_with("https://") && !authority_url.starts_with("http://") {
        errors.push(critical(
            "STOREPROXY_AUTHORITY_URL",
            format!("Authority must be an http(s) URL: {}", authority_url),
        ));
    } else if authority_url.starts_with("http://") {
        warnings.push(EnvValidationError {
            variable: "STOREPROXY_AUTHORITY_URL".to_string(),
            message: "Authority uses plain http, client secrets will travel unencrypted"
                .to_string(),
            severity: ErrorSeverity::Warning,
        });
    }

    let identity_header = match lookup("STOREPROXY_IDENTITY_HEADER") {
        Some(name) => match HeaderName::from_str(name.trim()) {
            Ok(header) => header,
            Err(_) => {
                errors.push(critical(
                    "STOREPROXY_IDENTITY_HEADER",
                    format!("Invalid header name: {}", name),
                ));
                HeaderName::from_static(DEFAULT_IDENTITY_HEADER)
            }
        },
        None => {
            warnings.push(info_default(
                "STOREPROXY_IDENTITY_HEADER",
                &format!("Using default identity header '{}'", DEFAULT_IDENTITY_HEADER),
            ));
            HeaderName::from_static(DEFAULT_IDENTITY_HEADER)
        }
    };

    // Timing configuration
    let token_safety_margin = Duration::from_secs(parse_var_with_default(
        &lookup,
        "STOREPROXY_TOKEN_SAFETY_MARGIN_SECS",
        300u64,
        &mut warnings,
    ));
    let token_timeout = Duration::from_secs(parse_var_with_default(
        &lookup,
        "STOREPROXY_TOKEN_TIMEOUT_SECS",
        30u64,
        &mut warnings,
    ));
    let upstream_timeout = Duration::from_secs(parse_var_with_default(
        &lookup,
        "STOREPROXY_UPSTREAM_TIMEOUT_SECS",
        100u64,
        &mut warnings,
    ));

    if token_safety_margin.as_secs() > MAX_SAFETY_MARGIN_SECS {
        errors.push(critical(
            "STOREPROXY_TOKEN_SAFETY_MARGIN_SECS",
            format!(
                "Token safety margin must be at most {} seconds",
                MAX_SAFETY_MARGIN_SECS
            ),
        ));
    }
    if token_timeout.as_secs() > MAX_TIMEOUT_SECS {
        errors.push(critical(
            "STOREPROXY_TOKEN_TIMEOUT_SECS",
            format!("Token acquisition timeout must be at most {} seconds", MAX_TIMEOUT_SECS),
        ));
    }
    if upstream_timeout.as_secs() > MAX_TIMEOUT_SECS {
        errors.push(critical(
            "STOREPROXY_UPSTREAM_TIMEOUT_SECS",
            format!("Upstream timeout must be at most {} seconds", MAX_TIMEOUT_SECS),
        ));
    }
    if token_timeout.is_zero() {
        errors.push(critical(
            "STOREPROXY_TOKEN_TIMEOUT_SECS",
            "Token acquisition timeout must be greater than zero".to_string(),
        ));
    }
    if upstream_timeout.is_zero() {
        errors.push(critical(
            "STOREPROXY_UPSTREAM_TIMEOUT_SECS",
            "Upstream timeout must be greater than zero".to_string(),
        ));
    }

    // Add all warnings to errors for reporting
    errors.extend(warnings);

    if errors.iter().any(|e| e.severity == ErrorSeverity::Critical) {
        return Err(errors);
    }

    for error in &errors {
        match error.severity {
            ErrorSeverity::Warning => warn!("{}: {}", error.variable, error.message),
            ErrorSeverity::Info => info!("{}: {}", error.variable, error.message),
            ErrorSeverity::Critical => {}
        }
    }

    Ok(AppConfig {
        host,
        port,
        bind_address,
        log_level,
        endpoints_file,
        secret_keys: Arc::new(secret_keys),
        authority_url,
        identity_header,
        token_safety_margin,
        token_timeout,
        upstream_timeout,
    })
}

/// Print environment validation results in a user-friendly format
pub fn print_validation_results(result: &Result<AppConfig, Vec<EnvValidationError>>) {
    match result {
        Ok(config) => {
            println!("Environment validation successful");
            println!("Configuration:");
            println!("  Server: {}", config.bind_address);
            println!("  Log Level: {}", config.log_level);
            println!("  Endpoints File: {}", config.endpoints_file.display());
            println!("  Secret Keys: {} loaded", config.secret_keys.len());
            println!("  Authority: {}", config.authority_url);
            println!("  Identity Header: {}", config.identity_header);
            println!(
                "  Token Safety Margin: {}s",
                config.token_safety_margin.as_secs()
            );
            println!("  Token Timeout: {}s", config.token_timeout.as_secs());
            println!("  Upstream Timeout: {}s", config.upstream_timeout.as_secs());
        }
        Err(errors) => {
            let critical_count = errors
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Critical)
                .count();
            let warning_count = errors
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Warning)
                .count();
            let info_count = errors
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Info)
                .count();

            eprintln!(
                "Environment validation failed with {} critical error(s), {} warning(s), {} info message(s):",
                critical_count, warning_count, info_count
            );

            for error in errors {
                let prefix = match error.severity {
                    ErrorSeverity::Critical => "❌ CRITICAL",
                    ErrorSeverity::Warning => "⚠️  WARNING",
                    ErrorSeverity::Info => "ℹ️  INFO",
                };
                eprintln!("  {} - {}: {}", prefix, error.variable, error.message);
            }
        }
    }
}

/// Generate example environment configuration file
pub fn generate_env_example() -> String {
    format!(
        r#"# storeproxy Environment Configuration
# Copy this file to .env and customize the values for your deployment

# =============================================================================
# Server Configuration
# =============================================================================

# Server bind address
# Default: 0.0.0.0 (bind to all interfaces)
STOREPROXY_HOST=0.0.0.0

# Server port
# Default: 3000
# Note: Ports below 1024 may require root privileges
STOREPROXY_PORT=3000

# =============================================================================
# Logging Configuration
# =============================================================================

# Log level configuration
# Default: {log_level}
# Audit records are written to the storeproxy::audit target
RUST_LOG={log_level}

# =============================================================================
# Registry Configuration
# =============================================================================

# JSON file listing environments, tenant endpoints and group memberships
# Default: endpoints.json
STOREPROXY_ENDPOINTS_FILE=endpoints.json

# Key ring used to decrypt client secrets, as id:base64key pairs
# Generate a key with: storeproxy generate-key
# Encrypt a secret with: storeproxy encrypt-secret --key-id primary --secret <value>
# STOREPROXY_SECRET_KEYS=primary:<base64 32-byte key>

# =============================================================================
# Identity Configuration
# =============================================================================

# OAuth authority; tokens are requested from <authority>/<tenant id>/oauth2/token
# Default: {authority}
STOREPROXY_AUTHORITY_URL={authority}

# Header in which the fronting authentication layer passes the caller's principal
# Default: {identity_header}
STOREPROXY_IDENTITY_HEADER={identity_header}

# =============================================================================
# Timing Configuration
# =============================================================================

# Tokens within this many seconds of expiry are refreshed
# Default: 300
STOREPROXY_TOKEN_SAFETY_MARGIN_SECS=300

# Upper bound on a single token acquisition, in seconds
# Default: 30
STOREPROXY_TOKEN_TIMEOUT_SECS=30

# Upstream request timeout, in seconds
# Default: 100
STOREPROXY_UPSTREAM_TIMEOUT_SECS=100
"#,
        log_level = DEFAULT_LOG_LEVEL,
        authority = DEFAULT_AUTHORITY_URL,
        identity_header = DEFAULT_IDENTITY_HEADER,
    )
}

fn critical(variable: &str, message: String) -> EnvValidationError {
    EnvValidationError {
        variable: variable.to_string(),
        message,
        severity: ErrorSeverity::Critical,
    }
}

fn info_default(variable: &str, message: &str) -> EnvValidationError {
    EnvValidationError {
        variable: variable.to_string(),
        message: message.to_string(),
        severity: ErrorSeverity::Info,
    }
}

fn no_keys_warning() -> EnvValidationError {
    EnvValidationError {
        variable: "STOREPROXY_SECRET_KEYS".to_string(),
        message: "No secret keys configured, client secrets cannot be decrypted".to_string(),
        severity: ErrorSeverity::Warning,
    }
}

/// Helper function to parse a variable with default value
fn parse_var_with_default<F, T>(
    lookup: &F,
    var_name: &str,
    default: T,
    warnings: &mut Vec<EnvValidationError>,
) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Clone + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match lookup(var_name) {
        Some(value_str) => match value_str.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warnings.push(EnvValidationError {
                    variable: var_name.to_string(),
                    message: format!(
                        "Invalid value '{}': {}. Using default: {}",
                        value_str, e, default
                    ),
                    severity: ErrorSeverity::Warning,
                });
                default
            }
        },
        None => {
            warnings.push(EnvValidationError {
                variable: var_name.to_string(),
                message: format!("Using default value: {}", default),
                severity: ErrorSeverity::Info,
            });
            default
        }
    }
}
