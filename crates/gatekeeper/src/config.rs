//! Gatekeeper configuration.
//!
//! Configuration is loaded from environment variables and validated once at
//! startup. Every violation is collected so an operator sees the full list in
//! one run instead of fixing them one at a time. Secrets are held as
//! [`SecretString`] and redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default store connection address.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default geolocation lookup base URL.
pub const DEFAULT_GEOIP_URL: &str = "http://ip-api.com";

/// Default country allow-list.
pub const DEFAULT_ALLOWED_COUNTRIES: &str = "US,CA,GB";

/// Default CORS origin allow-list.
pub const DEFAULT_CORS_ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Default session lifetime (24 hours).
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 86_400;

/// Default sliding rate-limit window (5 minutes).
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 300;

/// Default number of attempts allowed inside one window.
pub const DEFAULT_MAX_ATTEMPTS_PER_WINDOW: u64 = 5;

/// Default signing-key cache TTL (5 minutes).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Upper bound for TTLs and windows (30 days).
pub const MAX_DURATION_SECONDS: u64 = 2_592_000;

/// Upper bound for attempts per window.
pub const MAX_ATTEMPTS_LIMIT: u64 = 100_000;

/// Minimum length of the local signing secret.
pub const MIN_SECRET_KEY_LENGTH: usize = 32;

/// Gatekeeper configuration.
pub struct Config {
    /// Identity provider host name (e.g. `tenant.example.com`).
    pub idp_domain: String,

    /// Expected `aud` claim.
    pub idp_audience: String,

    /// Expected `iss` claim (default `https://{domain}/`).
    pub idp_issuer: String,

    /// Published signing-key endpoint.
    pub idp_jwks_url: String,

    /// User-directory base URL, without trailing slash.
    pub directory_url: String,

    /// User-directory API key.
    pub directory_api_key: SecretString,

    /// Shared store connection address. May embed a password.
    pub redis_url: SecretString,

    /// Local signing secret for anti-forgery tokens.
    pub secret_key: SecretString,

    /// Require a second-factor claim on every admitted token.
    pub enable_2fa: bool,

    /// Relaxed local mode: no `Secure` cookies, geographic filter off.
    pub debug: bool,

    /// ISO 3166-1 alpha-2 codes allowed through the geographic filter.
    pub allowed_countries: Vec<String>,

    pub session_ttl_seconds: u64,

    pub rate_limit_window_seconds: u64,

    pub max_attempts_per_window: u64,

    /// Geolocation lookup base URL.
    pub geoip_url: String,

    pub jwks_cache_ttl_seconds: u64,

    /// HTTP bind address.
    pub bind_address: String,

    /// Origins allowed to make credentialed cross-site requests.
    pub cors_allowed_origins: Vec<String>,
}

/// Custom Debug implementation that redacts secrets and the store address.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("idp_domain", &self.idp_domain)
            .field("idp_audience", &self.idp_audience)
            .field("idp_issuer", &self.idp_issuer)
            .field("idp_jwks_url", &self.idp_jwks_url)
            .field("directory_url", &self.directory_url)
            .field("directory_api_key", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("enable_2fa", &self.enable_2fa)
            .field("debug", &self.debug)
            .field("allowed_countries", &self.allowed_countries)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("rate_limit_window_seconds", &self.rate_limit_window_seconds)
            .field("max_attempts_per_window", &self.max_attempts_per_window)
            .field("geoip_url", &self.geoip_url)
            .field("jwks_cache_ttl_seconds", &self.jwks_cache_ttl_seconds)
            .field("bind_address", &self.bind_address)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .finish()
    }
}

/// A single configuration violation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Every violation found while validating the environment.
#[derive(Debug, Error)]
#[error("Invalid configuration: {}", join_violations(.0))]
pub struct ConfigErrors(pub Vec<ConfigError>);

fn join_violations(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Accumulates violations while fields are parsed.
#[derive(Default)]
struct Violations(Vec<ConfigError>);

impl Violations {
    fn invalid(&mut self, var: &'static str, reason: impl Into<String>) {
        self.0.push(ConfigError::InvalidValue {
            var,
            reason: reason.into(),
        });
    }

    fn required(&mut self, vars: &HashMap<String, String>, var: &'static str) -> String {
        match vars.get(var).map(|v| v.trim()) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => {
                self.0.push(ConfigError::MissingEnvVar(var));
                String::new()
            }
        }
    }

    fn positive(
        &mut self,
        vars: &HashMap<String, String>,
        var: &'static str,
        default: u64,
        max: u64,
    ) -> u64 {
        let Some(raw) = vars.get(var) else {
            return default;
        };
        match raw.trim().parse::<u64>() {
            Ok(0) => {
                self.invalid(var, "must be greater than 0");
                default
            }
            Ok(value) if value > max => {
                self.invalid(var, format!("must be at most {max}, got {value}"));
                default
            }
            Ok(value) => value,
            Err(e) => {
                self.invalid(var, format!("must be a positive integer, got '{raw}': {e}"));
                default
            }
        }
    }

    fn flag(&mut self, vars: &HashMap<String, String>, var: &'static str) -> bool {
        let Some(raw) = vars.get(var) else {
            return false;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" | "" => false,
            _ => {
                self.invalid(var, format!("must be a boolean, got '{raw}'"));
                false
            }
        }
    }

    fn url(&mut self, var: &'static str, value: &str) {
        if !value.is_empty() && !is_http_url(value) {
            self.invalid(var, "must be an http:// or https:// URL");
        }
    }
}

fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.contains(char::is_whitespace))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strips a scheme prefix and trailing slashes so either `tenant.example.com`
/// or `https://tenant.example.com/` can be supplied.
fn normalize_domain(raw: &str) -> String {
    let without_scheme = raw.strip_prefix("https://").unwrap_or(raw);
    without_scheme.trim_end_matches('/').to_string()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigErrors> {
        Self::from_vars(&env::vars().collect())
    }

    /// Validate configuration from a map of variables.
    ///
    /// Pure: the same map always yields the same result. Returns every
    /// violation found, not just the first.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigErrors> {
        let mut v = Violations::default();

        let idp_domain = normalize_domain(&v.required(vars, "IDP_DOMAIN"));
        if idp_domain.contains(['/', ' ', '\t']) {
            v.invalid("IDP_DOMAIN", "must be a bare host name");
        }

        let idp_audience = v.required(vars, "IDP_AUDIENCE");

        let idp_issuer = vars
            .get("IDP_ISSUER")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("https://{idp_domain}/"));

        let idp_jwks_url = vars
            .get("IDP_JWKS_URL")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| format!("https://{idp_domain}/.well-known/jwks.json"));
        v.url("IDP_JWKS_URL", &idp_jwks_url);

        let directory_url = v
            .required(vars, "DIRECTORY_URL")
            .trim_end_matches('/')
            .to_string();
        v.url("DIRECTORY_URL", &directory_url);

        let directory_api_key = v.required(vars, "DIRECTORY_API_KEY");

        let redis_url = vars
            .get("REDIS_URL")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        if !redis_url.starts_with("redis://") && !redis_url.starts_with("rediss://") {
            // The value may carry a password; never echo it.
            v.invalid("REDIS_URL", "must start with redis:// or rediss://");
        }

        let secret_key = v.required(vars, "SECRET_KEY");
        if !secret_key.is_empty() && secret_key.chars().count() < MIN_SECRET_KEY_LENGTH {
            v.invalid(
                "SECRET_KEY",
                format!("must be at least {MIN_SECRET_KEY_LENGTH} characters long"),
            );
        }

        let enable_2fa = v.flag(vars, "ENABLE_2FA");
        let debug = v.flag(vars, "DEBUG");

        let allowed_countries = split_list(
            vars.get("ALLOWED_COUNTRIES")
                .map(String::as_str)
                .unwrap_or(DEFAULT_ALLOWED_COUNTRIES),
        );
        if allowed_countries.is_empty() {
            v.invalid("ALLOWED_COUNTRIES", "must list at least one country code");
        }
        for code in &allowed_countries {
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
                v.invalid(
                    "ALLOWED_COUNTRIES",
                    format!("'{code}' is not a two-letter upper-case country code"),
                );
            }
        }

        let session_ttl_seconds = v.positive(
            vars,
            "SESSION_TTL_SECONDS",
            DEFAULT_SESSION_TTL_SECONDS,
            MAX_DURATION_SECONDS,
        );
        let rate_limit_window_seconds = v.positive(
            vars,
            "RATE_LIMIT_WINDOW_SECONDS",
            DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            MAX_DURATION_SECONDS,
        );
        let max_attempts_per_window = v.positive(
            vars,
            "MAX_ATTEMPTS_PER_WINDOW",
            DEFAULT_MAX_ATTEMPTS_PER_WINDOW,
            MAX_ATTEMPTS_LIMIT,
        );
        let jwks_cache_ttl_seconds = v.positive(
            vars,
            "JWKS_CACHE_TTL_SECONDS",
            DEFAULT_JWKS_CACHE_TTL_SECONDS,
            MAX_DURATION_SECONDS,
        );

        let geoip_url = vars
            .get("GEOIP_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_GEOIP_URL.to_string());
        v.url("GEOIP_URL", &geoip_url);

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        if bind_address.parse::<std::net::SocketAddr>().is_err() {
            v.invalid(
                "BIND_ADDRESS",
                format!("'{bind_address}' is not a socket address"),
            );
        }

        let cors_allowed_origins = split_list(
            vars.get("CORS_ALLOWED_ORIGINS")
                .map(String::as_str)
                .unwrap_or(DEFAULT_CORS_ALLOWED_ORIGINS),
        );

        if !v.0.is_empty() {
            return Err(ConfigErrors(v.0));
        }

        Ok(Config {
            idp_domain,
            idp_audience,
            idp_issuer,
            idp_jwks_url,
            directory_url,
            directory_api_key: SecretString::from(directory_api_key),
            redis_url: SecretString::from(redis_url),
            secret_key: SecretString::from(secret_key),
            enable_2fa,
            debug,
            allowed_countries,
            session_ttl_seconds,
            rate_limit_window_seconds,
            max_attempts_per_window,
            geoip_url,
            jwks_cache_ttl_seconds,
            bind_address,
            cors_allowed_origins,
        })
    }
}
