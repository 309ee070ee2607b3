pub mod csv;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use self::csv::{CsvError, FluxRecord};

#[derive(Debug, thiserror::Error)]
pub enum InfluxError {
    #[error("invalid time-series store URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("time-series store request failed")]
    Transport(#[from] reqwest::Error),

    #[error("time-series store rejected the query ({status}): {message}")]
    Query { status: u16, message: String },

    #[error("malformed time-series response")]
    Response(#[from] CsvError),
}

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub version: Option<String>,
}

/// Error body returned by the v2 API on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Clone)]
pub struct InfluxClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    query_url: Url,
    health_url: Url,
    token: String,
    bucket: String,
    measurement: String,
}

impl InfluxClient {
    pub fn new(settings: &InfluxSettings) -> Result<Self, InfluxError> {
        let base = settings.url.trim_end_matches('/');
        let invalid = |reason: String| InfluxError::InvalidUrl {
            url: settings.url.clone(),
            reason,
        };

        let mut query_url =
            Url::parse(&format!("{base}/api/v2/query")).map_err(|e| invalid(e.to_string()))?;
        query_url.query_pairs_mut().append_pair("org", &settings.org);
        let health_url = Url::parse(&format!("{base}/health")).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http: Client::new(),
                query_url,
                health_url,
                token: settings.token.clone(),
                bucket: settings.bucket.clone(),
                measurement: settings.measurement.clone(),
            }),
        })
    }

    pub fn measurement(&self) -> &str {
        &self.inner.measurement
    }

    /// Flux query for every field of the configured measurement in
    /// `[start, end]`.
    pub fn range_query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        flux_range_query(&self.inner.bucket, &self.inner.measurement, start, end)
    }

    /// Run a Flux query and return its rows. No retries.
    pub async fn query(&self, flux: &str) -> Result<Vec<FluxRecord>, InfluxError> {
        debug!(url = %self.inner.query_url, "Running Flux query");

        let body = json!({
            "query": flux,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
                "dateTimeFormat": "RFC3339Nano",
            },
        });

        let resp = self
            .inner
            .http
            .post(self.inner.query_url.clone())
            .header(header::AUTHORIZATION, format!("Token {}", self.inner.token))
            .header(header::ACCEPT, "application/csv")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(InfluxError::Query {
                status: status.as_u16(),
                message,
            });
        }

        let rows = match csv::parse(&text) {
            Ok(rows) => rows,
            Err(CsvError::InBand(message)) => {
                return Err(InfluxError::Query {
                    status: status.as_u16(),
                    message,
                })
            }
            Err(e) => return Err(e.into()),
        };
        debug!(rows = rows.len(), "Flux query returned");
        Ok(rows)
    }

    /// `GET /health`. The store answers 503 with the same body when unhealthy.
    pub async fn health(&self) -> Result<HealthCheck, InfluxError> {
        let check = self
            .inner
            .http
            .get(self.inner.health_url.clone())
            .send()
            .await?
            .json::<HealthCheck>()
            .await?;
        Ok(check)
    }
}

/// Flux's `stop` is exclusive, so it is pushed one nanosecond past `end` to
/// include samples at exactly `end` (and to keep `start == end` legal).
pub fn flux_range_query(
    bucket: &str,
    measurement: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    let stop = end + chrono::Duration::nanoseconds(1);
    format!(
        "from(bucket: \"{}\")\n  |> range(start: {}, stop: {})\n  |> filter(fn: (r) => r._measurement == \"{}\")",
        escape(bucket),
        start.to_rfc3339_opts(SecondsFormat::Nanos, true),
        stop.to_rfc3339_opts(SecondsFormat::Nanos, true),
        escape(measurement),
    )
}

/// Escape a value for a Flux string literal.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
