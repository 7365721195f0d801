//! Country-based access check.
//!
//! Fail-open: when the geolocation lookup fails for any reason the caller is
//! allowed through. Geographic filtering degrades to "no filtering", never to
//! "deny all".

use crate::observability::metrics;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// Timeout for a single geolocation lookup.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct GeoLookupResponse {
    #[serde(default, rename = "countryCode")]
    country_code: Option<String>,
}

/// Checks callers' countries against an allow-list.
pub struct GeoFilter {
    http_client: reqwest::Client,
    base_url: String,
    allowed_countries: Vec<String>,
    enabled: bool,
}

impl GeoFilter {
    /// Create a filter that looks up `GET {base_url}/json/{ip}`.
    pub fn new(base_url: String, allowed_countries: Vec<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gatekeeper.geo_filter", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            allowed_countries,
            enabled: true,
        }
    }

    /// A filter that allows everyone without any lookup (debug mode).
    pub fn disabled() -> Self {
        let mut filter = Self::new(String::new(), Vec::new());
        filter.enabled = false;
        filter
    }

    /// Whether `ip` may proceed.
    #[instrument(skip_all)]
    pub async fn allowed(&self, ip: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let country = match self.lookup(ip).await {
            Ok(Some(country)) => country,
            Ok(None) => {
                tracing::debug!(target: "gatekeeper.geo_filter", "Lookup returned no country, allowing");
                metrics::record_geo_lookup("no_country");
                return true;
            }
            Err(reason) => {
                tracing::warn!(target: "gatekeeper.geo_filter", reason = %reason, "Geolocation lookup failed, allowing");
                metrics::record_geo_lookup("lookup_failed");
                return true;
            }
        };

        let allowed = self.allowed_countries.iter().any(|c| *c == country);
        if allowed {
            metrics::record_geo_lookup("allowed");
        } else {
            metrics::record_geo_lookup("blocked");
            tracing::info!(target: "gatekeeper.geo_filter", country = %country, "Request from disallowed country");
        }
        allowed
    }

    async fn lookup(&self, ip: &str) -> Result<Option<String>, String> {
        let url = format!("{}/json/{}", self.base_url, ip);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("lookup returned {}", response.status()));
        }

        let body: GeoLookupResponse = response
            .json()
            .await
            .map_err(|e| format!("unparsable body: {e}"))?;

        Ok(body.country_code.filter(|c| !c.is_empty()))
    }
}
