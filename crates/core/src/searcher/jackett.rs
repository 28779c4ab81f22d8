//! Jackett (Torznab JSON API) source backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::JackettConfig;
use crate::library::MediaKind;

use super::{RawRelease, SearchError, SearchQuery, SourceKind, SourceSearch};

/// Retry hint used when a 429 response carries no usable Retry-After.
const DEFAULT_RETRY_AFTER_MS: u64 = 60_000;

/// A release source backed by one Jackett indexer (or "all").
pub struct JackettSource {
    name: String,
    kind: SourceKind,
    client: Client,
    config: JackettConfig,
}

impl JackettSource {
    pub fn new(
        name: impl Into<String>,
        kind: SourceKind,
        config: JackettConfig,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            kind,
            client,
            config,
        })
    }

    /// Build the Jackett API URL for a search.
    fn build_search_url(&self, query: &SearchQuery) -> String {
        let mut url = format!(
            "{}/api/v2.0/indexers/{}/results?apikey={}&Query={}",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(&self.config.indexer),
            urlencoding::encode(&self.config.api_key),
            urlencoding::encode(&query.text)
        );

        for cat_id in category_ids(query.kind) {
            url.push_str(&format!("&Category[]={}", cat_id));
        }

        url
    }
}

#[async_trait]
impl SourceSearch for JackettSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawRelease>, SearchError> {
        let url = self.build_search_url(query);
        debug!(source = %self.name, indexer = %self.config.indexer, "Searching Jackett");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout
            } else if e.is_connect() {
                SearchError::ConnectionFailed(e.to_string())
            } else {
                SearchError::ApiError(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_ms)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS);
            return Err(SearchError::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let jackett_response: JackettResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ApiError(format!("Failed to parse response: {}", e)))?;

        debug!(
            source = %self.name,
            results = jackett_response.Results.len(),
            "Jackett search complete"
        );

        Ok(jackett_response
            .Results
            .into_iter()
            .map(|r| into_raw_release(r, &self.name))
            .collect())
    }
}

fn into_raw_release(r: JackettResult, source: &str) -> RawRelease {
    RawRelease {
        title: r.Title,
        source: source.to_string(),
        size_bytes: r.Size.unwrap_or(0).max(0) as u64,
        magnet_uri: r.MagnetUri,
        download_url: r.Link,
        info_hash: r.InfoHash.map(|h| h.to_lowercase()),
        seeders: r.Seeders.unwrap_or(0).max(0) as u32,
        publish_date: r.PublishDate.and_then(|d| parse_jackett_date(&d)),
    }
}

/// Jackett category IDs for a media kind.
fn category_ids(kind: MediaKind) -> &'static [u32] {
    match kind {
        MediaKind::Movie => &[2000],
        MediaKind::Episode => &[5000],
    }
}

/// Retry-After in delta-seconds form.
fn parse_retry_after_ms(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|secs| secs * 1000)
}

/// Parse Jackett's date format.
fn parse_jackett_date(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(date_str)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            // Some indexers omit the offset
            chrono::NaiveDateTime::parse_from_str(date_str, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

// Jackett API response types
#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct JackettResponse {
    Results: Vec<JackettResult>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct JackettResult {
    Title: String,
    MagnetUri: Option<String>,
    Link: Option<String>,
    InfoHash: Option<String>,
    Size: Option<i64>,
    Seeders: Option<i32>,
    PublishDate: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn source(indexer: &str) -> JackettSource {
        JackettSource::new(
            "jackett",
            SourceKind::Aggregator,
            JackettConfig {
                url: "http://localhost:9117/".to_string(),
                api_key: "k3y".to_string(),
                indexer: indexer.to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_build_search_url() {
        let src = source("all");
        let url = src.build_search_url(&SearchQuery::text("Arrival 2016", MediaKind::Movie));
        assert_eq!(
            url,
            "http://localhost:9117/api/v2.0/indexers/all/results?apikey=k3y&Query=Arrival%202016&Category[]=2000"
        );

        let url = src.build_search_url(&SearchQuery::text("Severance S02E07", MediaKind::Episode));
        assert!(url.ends_with("&Category[]=5000"));
    }

    #[test]
    fn test_parse_response_into_raw_releases() {
        let body = r#"{"Results":[{
            "Title":"Arrival.2016.1080p.BluRay.x264-GRP",
            "MagnetUri":"magnet:?xt=urn:btih:ABC",
            "Link":null,
            "InfoHash":"ABC",
            "Size":8000000000,
            "Seeders":-1,
            "PublishDate":"2024-06-15T10:30:00"
        }]}"#;
        let parsed: JackettResponse = serde_json::from_str(body).unwrap();
        let releases: Vec<_> = parsed
            .Results
            .into_iter()
            .map(|r| into_raw_release(r, "jackett"))
            .collect();

        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.source, "jackett");
        assert_eq!(r.info_hash.as_deref(), Some("abc"));
        assert_eq!(r.size_bytes, 8_000_000_000);
        assert_eq!(r.seeders, 0);
        assert!(r.publish_date.is_some());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after_ms("30"), Some(30_000));
        assert_eq!(parse_retry_after_ms("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_parse_jackett_date() {
        let date = parse_jackett_date("2024-06-15T10:30:00Z").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 6, 15));
        assert!(parse_jackett_date("2024-06-15T10:30:00+02:00").is_some());
        assert!(parse_jackett_date("2024-06-15T10:30:00").is_some());
        assert!(parse_jackett_date("invalid").is_none());
    }
}
