//! REST implementation of the object client.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Method;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

use crate::block::{calculate_block_size, mint_block_id, MAX_SINGLE_PUT_BYTES};
use crate::client::auth::{SharedKeyCredential, SignRequest};
use crate::client::xml;
use crate::client::{
    BlobProps, CopyState, ListSegment, Metadata, ObjectClient, RetryPolicy,
};
use crate::config::{AccessTier, StorageConfig};
use crate::error::{StorageError, StorageResult};

const API_VERSION: &str = "2021-10-04";

/// Characters left verbatim in path segments.
const PATH_SEGMENT: percent_encoding::AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Signed, retried REST pipeline to the object service.
///
/// Each call builds a fresh request, signs it with the shared key, and runs
/// it through the retry policy; errors come back already mapped to the
/// engine's taxonomy.
pub struct RestClient {
    http: reqwest::Client,
    credential: SharedKeyCredential,
    endpoint: Url,
    container: String,
    retry: RetryPolicy,
    max_concurrency: usize,
    default_tier: Option<AccessTier>,
}

/// One outgoing request before signing.
struct RequestSpec {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    ms_headers: BTreeMap<String, String>,
    content_type: Option<String>,
    content_md5: Option<String>,
    range: Option<String>,
    body: Bytes,
}

impl RequestSpec {
    fn new(method: Method, path: String) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            ms_headers: BTreeMap::new(),
            content_type: None,
            content_md5: None,
            range: None,
            body: Bytes::new(),
        }
    }

    fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    fn ms_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ms_headers.insert(key.to_string(), value.into());
        self
    }

    fn metadata(mut self, metadata: &Metadata) -> Self {
        for (key, value) in metadata {
            self.ms_headers
                .insert(format!("x-ms-meta-{key}"), value.clone());
        }
        self
    }

    fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

impl RestClient {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| StorageError::io(format!("invalid endpoint url: {e}")))?;
        let credential = SharedKeyCredential::new(&config.account, &config.account_key)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(StorageError::from)?;

        Ok(Self {
            http,
            credential,
            endpoint,
            container: config.container.clone(),
            retry: RetryPolicy::from_config(config),
            max_concurrency: config.max_concurrency.max(1),
            default_tier: config.default_tier,
        })
    }

    /// Encoded resource path `/container/name`.
    fn blob_path(&self, name: &str) -> String {
        let mut path = format!("/{}", self.container);
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(&utf8_percent_encode(segment, &PATH_SEGMENT).to_string());
        }
        path
    }

    /// Absolute URL of a blob, used as a copy source.
    fn blob_url(&self, name: &str) -> String {
        format!(
            "{}{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.blob_path(name)
        )
    }

    async fn send(&self, spec: &RequestSpec) -> StorageResult<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let mut ms_headers = spec.ms_headers.clone();
            ms_headers.insert(
                "x-ms-date".to_string(),
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            );
            ms_headers.insert("x-ms-version".to_string(), API_VERSION.to_string());

            let authorization = self.credential.authorization(&SignRequest {
                method: spec.method.as_str(),
                path: &spec.path,
                query: &spec.query,
                content_length: spec.body.len() as u64,
                content_type: spec.content_type.as_deref().unwrap_or(""),
                content_md5: spec.content_md5.as_deref().unwrap_or(""),
                range: spec.range.as_deref().unwrap_or(""),
                ms_headers: &ms_headers,
            });

            let mut url = self.endpoint.clone();
            url.set_path(&spec.path);
            if !spec.query.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in &spec.query {
                    pairs.append_pair(key, value);
                }
            }

            let mut request = self
                .http
                .request(spec.method.clone(), url)
                .header("Authorization", authorization);
            for (key, value) in &ms_headers {
                request = request.header(key.as_str(), value.as_str());
            }
            if let Some(content_type) = &spec.content_type {
                request = request.header("Content-Type", content_type.as_str());
            }
            if let Some(md5) = &spec.content_md5 {
                request = request.header("Content-MD5", md5.as_str());
            }
            if let Some(range) = &spec.range {
                request = request.header("Range", range.as_str());
            }
            if !spec.body.is_empty() {
                request = request.body(spec.body.clone());
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RetryPolicy::is_retryable(status) && attempt + 1 < self.retry.max_tries {
                        warn!(path = %spec.path, status, attempt, "retrying remote call");
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let code = response
                        .headers()
                        .get("x-ms-error-code")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    return Err(StorageError::from_response(status, code.as_deref()));
                }
                Err(err) => {
                    if attempt + 1 < self.retry.max_tries {
                        warn!(path = %spec.path, error = %err, attempt, "retrying remote call");
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    fn props_from_headers(headers: &reqwest::header::HeaderMap) -> BlobProps {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let date = |name: &str| {
            header(name)
                .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let last_modified = date("Last-Modified").unwrap_or_else(Utc::now);
        let mut metadata = Metadata::new();
        for (name, value) in headers {
            if let Some(key) = name.as_str().strip_prefix("x-ms-meta-") {
                if let Ok(value) = value.to_str() {
                    metadata.insert(key.to_string(), value.to_string());
                }
            }
        }

        BlobProps {
            size: header("Content-Length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            content_type: header("Content-Type"),
            content_md5: header("Content-MD5").and_then(|v| BASE64.decode(v).ok()),
            last_modified,
            created_on: date("x-ms-creation-time").unwrap_or(last_modified),
            metadata,
            copy_status: header("x-ms-copy-status").and_then(|v| match v.as_str() {
                "pending" => Some(CopyState::Pending),
                "success" => Some(CopyState::Success),
                "aborted" => Some(CopyState::Aborted),
                "failed" => Some(CopyState::Failed),
                _ => None,
            }),
        }
    }

    /// Splits an oversized whole-blob upload into staged blocks plus one
    /// commit. The next reader of the block list sees a block file.
    async fn put_split(
        &self,
        name: &str,
        metadata: &Metadata,
        data: Bytes,
        content_type: &str,
        content_md5: Option<Vec<u8>>,
    ) -> StorageResult<()> {
        let block_size = calculate_block_size(data.len() as u64)? as usize;
        let mut block_ids = Vec::new();
        let mut chunks = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + block_size).min(data.len());
            let id = mint_block_id(16);
            chunks.push((id.clone(), data.slice(offset..end)));
            block_ids.push(id);
            offset = end;
        }

        let mut staging = FuturesUnordered::new();
        let mut pending = chunks.into_iter();
        loop {
            while staging.len() < self.max_concurrency {
                match pending.next() {
                    Some((id, chunk)) => {
                        staging.push(async move { self.stage_block(name, &id, chunk).await })
                    }
                    None => break,
                }
            }
            match staging.next().await {
                Some(result) => result?,
                None => break,
            }
        }

        self.commit_block_list(
            name,
            &block_ids,
            content_type,
            content_md5,
            self.default_tier,
        )
        .await?;

        if !metadata.is_empty() {
            self.set_metadata(name, metadata).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectClient for RestClient {
    async fn get_range(&self, name: &str, offset: u64, length: u64) -> StorageResult<Bytes> {
        let mut spec = RequestSpec::new(Method::GET, self.blob_path(name));
        spec.range = Some(if length == 0 {
            format!("bytes={offset}-")
        } else {
            format!("bytes={}-{}", offset, offset + length - 1)
        });
        let response = self.send(&spec).await?;
        Ok(response.bytes().await?)
    }

    async fn put_whole(
        &self,
        name: &str,
        metadata: &Metadata,
        data: Bytes,
        content_type: &str,
        content_md5: Option<Vec<u8>>,
    ) -> StorageResult<()> {
        if data.len() as u64 > MAX_SINGLE_PUT_BYTES {
            return self
                .put_split(name, metadata, data, content_type, content_md5)
                .await;
        }

        let mut spec = RequestSpec::new(Method::PUT, self.blob_path(name))
            .ms_header("x-ms-blob-type", "BlockBlob")
            .metadata(metadata)
            .body(data);
        if let Some(tier) = self.default_tier {
            spec = spec.ms_header("x-ms-access-tier", tier.as_str());
        }
        if let Some(md5) = content_md5 {
            spec = spec.ms_header("x-ms-blob-content-md5", BASE64.encode(md5));
        }
        spec.content_type = Some(content_type.to_string());
        self.send(&spec).await?;
        Ok(())
    }

    async fn stage_block(&self, name: &str, block_id: &str, data: Bytes) -> StorageResult<()> {
        let spec = RequestSpec::new(Method::PUT, self.blob_path(name))
            .query("comp", "block")
            .query("blockid", block_id)
            .body(data);
        self.send(&spec).await?;
        Ok(())
    }

    async fn commit_block_list(
        &self,
        name: &str,
        block_ids: &[String],
        content_type: &str,
        content_md5: Option<Vec<u8>>,
        tier: Option<AccessTier>,
    ) -> StorageResult<()> {
        let body = xml::serialize_block_list(block_ids);
        let mut spec = RequestSpec::new(Method::PUT, self.blob_path(name))
            .query("comp", "blocklist")
            .ms_header("x-ms-blob-content-type", content_type)
            .body(Bytes::from(body));
        if let Some(md5) = content_md5 {
            spec = spec.ms_header("x-ms-blob-content-md5", BASE64.encode(md5));
        }
        if let Some(tier) = tier {
            spec = spec.ms_header("x-ms-access-tier", tier.as_str());
        }
        spec.content_type = Some("application/xml".to_string());
        self.send(&spec).await?;
        Ok(())
    }

    async fn get_committed_block_list(&self, name: &str) -> StorageResult<Vec<(String, u64)>> {
        let spec = RequestSpec::new(Method::GET, self.blob_path(name))
            .query("comp", "blocklist")
            .query("blocklisttype", "committed");
        let response = self.send(&spec).await?;
        let body = response.text().await?;
        xml::parse_committed_block_list(&body)
    }

    async fn get_properties(&self, name: &str) -> StorageResult<BlobProps> {
        let spec = RequestSpec::new(Method::HEAD, self.blob_path(name));
        let response = self.send(&spec).await?;
        Ok(Self::props_from_headers(response.headers()))
    }

    async fn set_metadata(&self, name: &str, metadata: &Metadata) -> StorageResult<()> {
        let spec = RequestSpec::new(Method::PUT, self.blob_path(name))
            .query("comp", "metadata")
            .metadata(metadata);
        self.send(&spec).await?;
        Ok(())
    }

    async fn start_copy(
        &self,
        target: &str,
        source: &str,
        metadata: &Metadata,
    ) -> StorageResult<String> {
        let spec = RequestSpec::new(Method::PUT, self.blob_path(target))
            .ms_header("x-ms-copy-source", self.blob_url(source))
            .metadata(metadata);
        let response = self.send(&spec).await?;
        let copy_id = response
            .headers()
            .get("x-ms-copy-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!(target, source, copy_id = %copy_id, "server-side copy started");
        Ok(copy_id)
    }

    async fn poll_copy(&self, name: &str) -> StorageResult<CopyState> {
        let props = self.get_properties(name).await?;
        Ok(props.copy_status.unwrap_or(CopyState::Success))
    }

    async fn delete(&self, name: &str, include_snapshots: bool) -> StorageResult<()> {
        let mut spec = RequestSpec::new(Method::DELETE, self.blob_path(name));
        if include_snapshots {
            spec = spec.ms_header("x-ms-delete-snapshots", "include");
        }
        self.send(&spec).await?;
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_results: u32,
    ) -> StorageResult<ListSegment> {
        let mut spec = RequestSpec::new(Method::GET, format!("/{}", self.container))
            .query("restype", "container")
            .query("comp", "list")
            .query("include", "metadata")
            .query("prefix", prefix)
            .query("maxresults", max_results.to_string());
        if let Some(delimiter) = delimiter {
            spec = spec.query("delimiter", delimiter);
        }
        if let Some(marker) = marker {
            spec = spec.query("marker", marker);
        }
        let response = self.send(&spec).await?;
        let body = response.text().await?;
        xml::parse_list_segment(&body)
    }

    async fn list_containers(&self) -> StorageResult<Vec<String>> {
        let spec = RequestSpec::new(Method::GET, "/".to_string()).query("comp", "list");
        let response = self.send(&spec).await?;
        let body = response.text().await?;
        xml::parse_container_names(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::new(&StorageConfig {
            endpoint: "https://account.blob.example.net".to_string(),
            account: "account".to_string(),
            account_key: BASE64.encode(b"0123456789abcdef"),
            container: "data".to_string(),
            ..StorageConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn blob_path_encodes_segments() {
        let client = client();
        assert_eq!(client.blob_path("dir/file.txt"), "/data/dir/file.txt");
        assert_eq!(
            client.blob_path("dir/a b#c.txt"),
            "/data/dir/a%20b%23c.txt"
        );
    }

    #[test]
    fn blob_url_is_absolute() {
        let client = client();
        assert_eq!(
            client.blob_url("x/y"),
            "https://account.blob.example.net/data/x/y"
        );
    }
}
