//! Trusted time sources.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::ClockError;

#[async_trait]
pub trait TimeSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<DateTime<Utc>, ClockError>;
}

/// Reads the `Date` header of a HEAD request. One-second resolution.
pub struct HttpDateSource {
    client: reqwest::Client,
    url: String,
}

impl HttpDateSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClockError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClockError::Config(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TimeSource for HttpDateSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<DateTime<Utc>, ClockError> {
        let response = self.client.head(&self.url).send().await?;
        let header = response
            .headers()
            .get(reqwest::header::DATE)
            .ok_or(ClockError::MissingDateHeader)?
            .to_str()
            .map_err(|err| ClockError::InvalidTimestamp(err.to_string()))?;
        parse_http_date(header)
    }
}

/// Reads an epoch timestamp from a JSON document, e.g. `{"unixtime": 1700000000}`.
pub struct JsonEpochSource {
    client: reqwest::Client,
    url: String,
    field: String,
}

impl JsonEpochSource {
    pub fn new(
        url: impl Into<String>,
        field: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClockError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClockError::Config(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            field: field.into(),
        })
    }
}

#[async_trait]
impl TimeSource for JsonEpochSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<DateTime<Utc>, ClockError> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        extract_epoch(&body, &self.field)
    }
}

pub fn parse_http_date(raw: &str) -> Result<DateTime<Utc>, ClockError> {
    DateTime::parse_from_rfc2822(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| ClockError::InvalidTimestamp(format!("{raw}: {err}")))
}

/// Values below 1e11 are taken as seconds, larger ones as milliseconds.
pub fn extract_epoch(body: &Value, field: &str) -> Result<DateTime<Utc>, ClockError> {
    let raw = body
        .pointer(field)
        .or_else(|| body.get(field))
        .and_then(|value| match value {
            Value::Number(num) => num.as_f64(),
            Value::String(text) => text.parse::<f64>().ok(),
            _ => None,
        })
        .ok_or_else(|| ClockError::MissingField(field.to_string()))?;

    let millis = if raw.abs() < 1e11 { raw * 1000.0 } else { raw };
    Utc.timestamp_millis_opt(millis.round() as i64)
        .single()
        .ok_or_else(|| ClockError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_imf_fixdate() {
        let ts = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(ts.timestamp(), 784_111_777);
    }

    #[test]
    fn rejects_garbage_date() {
        assert!(matches!(
            parse_http_date("yesterday"),
            Err(ClockError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn epoch_seconds_and_millis_are_distinguished() {
        let secs = extract_epoch(&json!({"unixtime": 1_700_000_000}), "unixtime").unwrap();
        let millis = extract_epoch(&json!({"now": 1_700_000_000_250i64}), "now").unwrap();
        assert_eq!(secs.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(millis.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn epoch_field_accepts_json_pointer() {
        let body = json!({"data": {"ts": "1700000000.5"}});
        let ts = extract_epoch(&body, "/data/ts").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_500);
    }

    #[test]
    fn missing_epoch_field_is_reported() {
        assert_eq!(
            extract_epoch(&json!({}), "unixtime"),
            Err(ClockError::MissingField("unixtime".into()))
        );
    }
}
