//! Provider-specific download and upload calls
//!
//! All calls share one `reqwest::Client` and carry a per-request timeout
//! that covers connect, headers and body. A timeout surfaces as the step's
//! error with `timeout = true`.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use provider::ProviderKind;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::RelayError;
use crate::pipeline::RecordLocator;

/// Creator workflows skipped when a file field is written by the relay.
const SKIP_WORKFLOW: &str = r#"["schedules","form_workflow"]"#;

/// Upstream error bodies are cut to this many chars in error details.
const MAX_ERROR_BODY: usize = 512;

/// Base URLs of the provider resource APIs.
#[derive(Debug, Clone)]
pub struct RemoteEndpoints {
    pub creator_download_url: String,
    pub creator_upload_url: String,
    pub drop_store_upload_url: String,
}

/// HTTP calls against the source and destination systems.
#[derive(Debug, Clone)]
pub struct RemoteClients {
    client: reqwest::Client,
    timeout: Duration,
    endpoints: RemoteEndpoints,
}

impl RemoteClients {
    pub fn new(client: reqwest::Client, timeout: Duration, endpoints: RemoteEndpoints) -> Self {
        Self {
            client,
            timeout,
            endpoints,
        }
    }

    /// Full download URL of a record's file field.
    pub fn creator_download_url(&self, locator: &RecordLocator) -> String {
        format!(
            "{}/{}/download",
            self.endpoints.creator_download_url.trim_end_matches('/'),
            locator.path()
        )
    }

    /// Full upload URL of a record's file field.
    pub fn creator_upload_url(&self, locator: &RecordLocator) -> String {
        format!(
            "{}/{}/upload",
            self.endpoints.creator_upload_url.trim_end_matches('/'),
            locator.path()
        )
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// `auth` is the provider and access token for authenticated sources;
    /// plain URLs are fetched without credentials.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn download_to(
        &self,
        url: &str,
        auth: Option<(ProviderKind, &str)>,
        dest: &Path,
    ) -> Result<u64, RelayError> {
        let mut request = self.client.get(url).timeout(self.timeout);
        if let Some((provider, token)) = auth {
            request = request.header(AUTHORIZATION, provider.authorization_value(token));
        }

        let response = request.send().await.map_err(RelayError::download)?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(RelayError::Download {
                detail: format!("source returned {status}: {body}"),
                timeout: false,
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| RelayError::staging("creating staging file", e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(RelayError::download)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| RelayError::staging("writing staging file", e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| RelayError::staging("flushing staging file", e))?;

        debug!(bytes = written, "download complete");
        Ok(written)
    }

    /// Upload a payload to DropStore at `path`.
    ///
    /// Uses add mode with autorename, so an existing file at the same path is
    /// kept and the new one gets a suffixed name.
    #[instrument(skip(self, token, payload), fields(size = payload.len()))]
    pub async fn upload_to_drop_store(
        &self,
        token: &str,
        path: &str,
        payload: Bytes,
    ) -> Result<serde_json::Value, RelayError> {
        let provider = ProviderKind::DropStore;
        let response = self
            .client
            .post(&self.endpoints.drop_store_upload_url)
            .timeout(self.timeout)
            .header(AUTHORIZATION, provider.authorization_value(token))
            .header("Dropbox-API-Arg", drop_store_api_arg(path))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|e| RelayError::upload(provider, e))?;

        upload_result(provider, response).await
    }

    /// Upload a payload into a Creator record's file field as `file_name`.
    #[instrument(skip(self, token, payload), fields(record_id = %locator.record_id, size = payload.len()))]
    pub async fn upload_to_creator(
        &self,
        token: &str,
        locator: &RecordLocator,
        file_name: &str,
        payload: Bytes,
    ) -> Result<serde_json::Value, RelayError> {
        let provider = ProviderKind::Creator;
        let len = payload.len() as u64;
        let part = reqwest::multipart::Part::stream_with_length(payload, len)
            .file_name(file_name.to_owned())
            .mime_str("application/pdf")
            .map_err(|e| RelayError::upload(provider, e))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.creator_upload_url(locator))
            .timeout(self.timeout)
            .query(&[("skip_workflow", SKIP_WORKFLOW)])
            .header(AUTHORIZATION, provider.authorization_value(token))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::upload(provider, e))?;

        upload_result(provider, response).await
    }
}

/// Map the destination's response to its JSON body or an upload failure.
async fn upload_result(
    provider: ProviderKind,
    response: reqwest::Response,
) -> Result<serde_json::Value, RelayError> {
    let status = response.status();
    if !status.is_success() {
        let body = error_body(response).await;
        return Err(RelayError::Upload {
            provider,
            detail: format!("{provider} returned {status}: {body}"),
            timeout: false,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| RelayError::upload(provider, e))?;
    Ok(serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

async fn error_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    body.chars().take(MAX_ERROR_BODY).collect()
}

/// `Dropbox-API-Arg` header value for an upload to `path`.
///
/// Header values must be ASCII, so non-ASCII characters in the path are
/// written as JSON `\u` escapes.
pub fn drop_store_api_arg(path: &str) -> String {
    let arg = serde_json::json!({
        "path": path,
        "mode": "add",
        "autorename": true,
        "mute": false,
    });
    escape_non_ascii(&arg.to_string())
}

fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in c.encode_utf16(&mut units) {
            let _ = write!(out, "\\u{unit:04x}");
        }
    }
    out
}
