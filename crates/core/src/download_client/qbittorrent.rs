//! qBittorrent Web API client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::QBittorrentConfig;
use crate::searcher::CandidateRelease;

use super::{DownloadClient, DownloadClientError, QueueItem, QueueStatus};

/// Lookups for a freshly added torrent whose hash was not known up front.
const TAG_LOOKUP_ATTEMPTS: u32 = 5;
const TAG_LOOKUP_DELAY: Duration = Duration::from_millis(500);

/// qBittorrent client implementation.
pub struct QBittorrentClient {
    name: String,
    client: Client,
    config: QBittorrentConfig,
    /// Whether the cookie jar holds a live session (cleared on 403).
    authenticated: Arc<RwLock<bool>>,
}

impl QBittorrentClient {
    pub fn new(name: impl Into<String>, config: QBittorrentConfig) -> Result<Self, DownloadClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| DownloadClientError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            client,
            config,
            authenticated: Arc::new(RwLock::new(false)),
        })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url(), endpoint)
    }

    /// Login; the session cookie lands in the client's cookie jar.
    async fn login(&self) -> Result<(), DownloadClientError> {
        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/api/v2/auth/login"))
            .form(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!(client = %self.name, "qBittorrent login successful");
            *self.authenticated.write().await = true;
            Ok(())
        } else if body.contains("Fails.") || status == StatusCode::FORBIDDEN {
            Err(DownloadClientError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(DownloadClientError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), DownloadClientError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        self.login().await
    }

    /// Send a request, logging in again once if the session expired.
    ///
    /// `build` is called per attempt since multipart bodies cannot be reused.
    async fn send<F>(&self, build: F) -> Result<String, DownloadClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let mut response = build().send().await.map_err(map_reqwest_error)?;
        if response.status() == StatusCode::FORBIDDEN {
            warn!(client = %self.name, "qBittorrent session expired, re-authenticating");
            *self.authenticated.write().await = false;
            self.login().await?;
            response = build().send().await.map_err(map_reqwest_error)?;
        }

        read_body(response).await
    }

    async fn torrents_info(&self, query: &str) -> Result<Vec<QBTorrentInfo>, DownloadClientError> {
        let url = self.url(&format!("/api/v2/torrents/info{}", query));
        let body = self.send(|| self.client.get(&url)).await?;
        serde_json::from_str(&body)
            .map_err(|e| DownloadClientError::ApiError(format!("Failed to parse response: {}", e)))
    }

    async fn post_hashes(&self, endpoint: &str, extra: &[(&str, &str)], job_id: &str) -> Result<(), DownloadClientError> {
        let url = self.url(endpoint);
        let hash = job_id.to_lowercase();
        let mut params = vec![("hashes", hash.as_str())];
        params.extend_from_slice(extra);
        self.send(|| self.client.post(&url).form(&params)).await?;
        Ok(())
    }

    /// Resolve the hash of a torrent added by URL through its unique tag.
    async fn hash_for_tag(&self, tag: &str) -> Result<String, DownloadClientError> {
        let query = format!("?tag={}", urlencoding::encode(tag));
        for attempt in 0..TAG_LOOKUP_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(TAG_LOOKUP_DELAY).await;
            }
            if let Some(t) = self.torrents_info(&query).await?.into_iter().next() {
                return Ok(t.hash.to_lowercase());
            }
        }
        Err(DownloadClientError::ApiError(format!(
            "added torrent with tag {} never appeared in the queue",
            tag
        )))
    }
}

#[async_trait]
impl DownloadClient for QBittorrentClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, release: &CandidateRelease) -> Result<String, DownloadClientError> {
        let link = release
            .download_link()
            .ok_or_else(|| DownloadClientError::InvalidRequest(format!("release '{}' has no download link", release.title)))?
            .to_string();

        let known_hash = release
            .info_hash
            .clone()
            .or_else(|| release.magnet_uri.as_deref().and_then(extract_hash_from_magnet));
        let tag = format!("harvester-{}", uuid::Uuid::new_v4().simple());

        let url = self.url("/api/v2/torrents/add");
        self.send(|| {
            let mut form = multipart::Form::new()
                .text("urls", link.clone())
                .text("tags", tag.clone());
            if let Some(path) = &self.config.download_path {
                form = form.text("savepath", path.display().to_string());
            }
            if let Some(cat) = &self.config.category {
                form = form.text("category", cat.clone());
            }
            self.client.post(&url).multipart(form)
        })
        .await?;

        let job_id = match known_hash {
            Some(hash) => hash.to_lowercase(),
            None => self.hash_for_tag(&tag).await?,
        };

        debug!(client = %self.name, job_id = %job_id, title = %release.title, "Release submitted");
        Ok(job_id)
    }

    async fn queue(&self) -> Result<Vec<QueueItem>, DownloadClientError> {
        let query = match &self.config.category {
            Some(cat) => format!("?category={}", urlencoding::encode(cat)),
            None => String::new(),
        };
        Ok(self
            .torrents_info(&query)
            .await?
            .into_iter()
            .map(|t| t.into_queue_item(&self.name))
            .collect())
    }

    async fn pause(&self, job_id: &str) -> Result<(), DownloadClientError> {
        self.post_hashes("/api/v2/torrents/pause", &[], job_id).await
    }

    async fn resume(&self, job_id: &str) -> Result<(), DownloadClientError> {
        self.post_hashes("/api/v2/torrents/resume", &[], job_id).await
    }

    async fn remove(&self, job_id: &str, delete_files: bool) -> Result<(), DownloadClientError> {
        let delete = if delete_files { "true" } else { "false" };
        self.post_hashes("/api/v2/torrents/delete", &[("deleteFiles", delete)], job_id)
            .await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> DownloadClientError {
    if e.is_timeout() {
        DownloadClientError::Timeout
    } else if e.is_connect() {
        DownloadClientError::ConnectionFailed(e.to_string())
    } else {
        DownloadClientError::ApiError(e.to_string())
    }
}

async fn read_body(response: Response) -> Result<String, DownloadClientError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(DownloadClientError::JobNotFound(response.url().to_string()));
    }
    if !status.is_success() {
        return Err(DownloadClientError::ApiError(format!("HTTP {}", status)));
    }
    response
        .text()
        .await
        .map_err(|e| DownloadClientError::ApiError(e.to_string()))
}

/// qBittorrent torrent info response.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    name: String,
    state: String,
    progress: f64,
    size: i64,
    downloaded: i64,
    dlspeed: i64,
    eta: i64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    content_path: String,
}

impl QBTorrentInfo {
    fn into_queue_item(self, client: &str) -> QueueItem {
        let status = parse_qb_state(&self.state);
        QueueItem {
            client: client.to_string(),
            job_id: self.hash.to_lowercase(),
            name: self.name,
            status,
            progress: self.progress,
            size_bytes: self.size.max(0) as u64,
            downloaded_bytes: self.downloaded.max(0) as u64,
            download_speed: self.dlspeed.max(0) as u64,
            // 8640000 is qBittorrent's "infinity"
            eta_secs: if self.eta > 0 && self.eta < 8_640_000 {
                Some(self.eta as u64)
            } else {
                None
            },
            save_path: non_empty_path(self.save_path),
            content_path: non_empty_path(self.content_path),
            error: (status == QueueStatus::Error).then(|| self.state),
        }
    }
}

fn non_empty_path(p: String) -> Option<PathBuf> {
    if p.is_empty() {
        None
    } else {
        Some(PathBuf::from(p))
    }
}

/// Map a qBittorrent state string to a queue status.
///
/// Any upload-side state means the payload is complete.
fn parse_qb_state(state: &str) -> QueueStatus {
    match state {
        "queuedDL" => QueueStatus::Queued,
        "pausedDL" | "stoppedDL" => QueueStatus::Paused,
        "uploading" | "forcedUP" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP"
        | "checkingUP" => QueueStatus::Completed,
        "error" | "missingFiles" => QueueStatus::Error,
        _ => QueueStatus::Downloading,
    }
}

/// Extract info hash from a magnet URI.
fn extract_hash_from_magnet(magnet: &str) -> Option<String> {
    let (_, params) = magnet.split_once('?')?;
    params
        .split('&')
        .find_map(|p| p.strip_prefix("xt=urn:btih:"))
        .map(|h| h.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qb_state() {
        assert_eq!(parse_qb_state("downloading"), QueueStatus::Downloading);
        assert_eq!(parse_qb_state("metaDL"), QueueStatus::Downloading);
        assert_eq!(parse_qb_state("stalledDL"), QueueStatus::Downloading);
        assert_eq!(parse_qb_state("queuedDL"), QueueStatus::Queued);
        assert_eq!(parse_qb_state("pausedDL"), QueueStatus::Paused);
        assert_eq!(parse_qb_state("stoppedDL"), QueueStatus::Paused);
        assert_eq!(parse_qb_state("uploading"), QueueStatus::Completed);
        assert_eq!(parse_qb_state("stoppedUP"), QueueStatus::Completed);
        assert_eq!(parse_qb_state("missingFiles"), QueueStatus::Error);
    }

    #[test]
    fn test_extract_hash_from_magnet() {
        assert_eq!(
            extract_hash_from_magnet("magnet:?xt=urn:btih:ABC123DEF456&dn=Test"),
            Some("abc123def456".to_string())
        );
        assert_eq!(
            extract_hash_from_magnet("magnet:?dn=Test&xt=urn:btih:abc"),
            Some("abc".to_string())
        );
        assert_eq!(extract_hash_from_magnet("not a magnet"), None);
        assert_eq!(extract_hash_from_magnet("magnet:?dn=Test"), None);
    }

    #[test]
    fn test_torrent_info_into_queue_item() {
        let body = r#"[{
            "hash": "ABC123",
            "name": "Arrival.2016.1080p.BluRay.x264-GRP",
            "state": "stalledUP",
            "progress": 1.0,
            "size": 8000000000,
            "downloaded": 8000000000,
            "dlspeed": 0,
            "eta": 8640000,
            "save_path": "/downloads",
            "content_path": "/downloads/Arrival.2016.1080p.BluRay.x264-GRP"
        }]"#;
        let parsed: Vec<QBTorrentInfo> = serde_json::from_str(body).unwrap();
        let item = parsed.into_iter().next().unwrap().into_queue_item("qbit");

        assert_eq!(item.client, "qbit");
        assert_eq!(item.job_id, "abc123");
        assert_eq!(item.status, QueueStatus::Completed);
        assert!(item.is_completed());
        assert_eq!(item.eta_secs, None);
        assert_eq!(
            item.content_path,
            Some(PathBuf::from("/downloads/Arrival.2016.1080p.BluRay.x264-GRP"))
        );
        assert!(item.error.is_none());
    }

    #[test]
    fn test_error_state_carries_reason() {
        let info = QBTorrentInfo {
            hash: "ff".into(),
            name: "x".into(),
            state: "missingFiles".into(),
            progress: 0.3,
            size: 10,
            downloaded: 3,
            dlspeed: 0,
            eta: 0,
            save_path: String::new(),
            content_path: String::new(),
        };
        let item = info.into_queue_item("qbit");
        assert_eq!(item.status, QueueStatus::Error);
        assert_eq!(item.error.as_deref(), Some("missingFiles"));
        assert!(item.save_path.is_none());
    }
}
