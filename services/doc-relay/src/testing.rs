//! In-process stand-ins for the token endpoints, export source, Creator and
//! DropStore, shared by the pipeline and router tests.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use provider::ProviderKind;
use relay_auth::{OAuthRefresher, ProviderCredentials};
use token_cache::TokenCache;
use tokio::net::TcpListener;

use crate::pipeline::FileRelayPipeline;
use crate::remote::{RemoteClients, RemoteEndpoints};
use crate::staging::StagingStore;

/// One upload as the destination saw it.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub authorization: String,
    pub content_type: String,
    pub api_arg: String,
    pub query: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct MockState {
    pub creator_token_calls: AtomicUsize,
    pub drop_store_token_calls: AtomicUsize,
    pub source_fetches: AtomicUsize,
    pub creator_downloads: AtomicUsize,
    pub creator_uploads: Mutex<Vec<RecordedUpload>>,
    pub drop_store_uploads: Mutex<Vec<RecordedUpload>>,
    /// Staging directory whose files `/drop/upload-occupy` swaps for
    /// non-empty directories, so deleting them fails.
    pub occupy_staging: Mutex<Option<PathBuf>>,
}

/// Which mock routes a pipeline is wired to.
pub struct Upstream {
    pub timeout: Duration,
    pub creator_token_path: &'static str,
    pub drop_store_token_path: &'static str,
    pub drop_store_upload_path: &'static str,
    pub creator_upload_base: &'static str,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            creator_token_path: "/creator/token",
            drop_store_token_path: "/drop/token",
            drop_store_upload_path: "/drop/upload",
            creator_upload_base: "/creator/data",
        }
    }
}

pub struct MockUpstream {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

/// A 500-byte document with a valid PDF header.
pub fn pdf_bytes() -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.resize(500, b'x');
    bytes
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let record_path = "/creator/data/{owner}/{app}/report/{report}/{record}/{field}";
        let router = axum::Router::new()
            .route("/creator/token", post(creator_token))
            .route("/drop/token", post(drop_store_token))
            .route("/token/reject", post(reject_token))
            .route("/source/pdf", get(source_pdf))
            .route("/source/empty", get(|| async { "" }))
            .route(
                "/source/html",
                get(|| async { "<html><body>Not a document</body></html>" }),
            )
            .route(
                "/source/missing",
                get(|| async { (StatusCode::NOT_FOUND, "not found") }),
            )
            .route("/source/slow", get(source_slow))
            .route("/source/truncated", get(source_truncated))
            .route("/source/stalled", get(source_stalled))
            .route(&format!("{record_path}/download"), get(creator_download))
            .route(&format!("{record_path}/upload"), post(creator_upload))
            .route(
                "/creator/locked/{owner}/{app}/report/{report}/{record}/{field}/upload",
                post(|| async {
                    (
                        StatusCode::FORBIDDEN,
                        Json(serde_json::json!({"code": 2945, "message": "No permission to upload"})),
                    )
                }),
            )
            .route("/drop/upload", post(drop_store_upload))
            .route("/drop/upload-occupy", post(drop_store_upload_occupying))
            .route(
                "/drop/upload-fail",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable") }),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn pipeline(&self, staging: &Path) -> FileRelayPipeline {
        self.pipeline_with(staging, Upstream::default())
    }

    pub fn pipeline_with(&self, staging: &Path, upstream: Upstream) -> FileRelayPipeline {
        let client = reqwest::Client::new();
        let refresher = OAuthRefresher::new(client.clone(), upstream.timeout)
            .with_provider(
                ProviderKind::Creator,
                credentials(self.url(upstream.creator_token_path)),
            )
            .with_provider(
                ProviderKind::DropStore,
                credentials(self.url(upstream.drop_store_token_path)),
            );
        let tokens = Arc::new(TokenCache::new(Arc::new(refresher)));
        let remote = RemoteClients::new(
            client,
            upstream.timeout,
            RemoteEndpoints {
                creator_download_url: self.url("/creator/data"),
                creator_upload_url: self.url(upstream.creator_upload_base),
                drop_store_upload_url: self.url(upstream.drop_store_upload_path),
            },
        );
        FileRelayPipeline::new(tokens, StagingStore::new(staging), remote)
    }
}

fn credentials(token_url: String) -> ProviderCredentials {
    ProviderCredentials {
        token_url,
        client_id: "client".into(),
        client_secret: String::from("secret").into(),
        refresh_token: String::from("refresh").into(),
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

fn record(headers: &HeaderMap, query: Option<String>, body: Bytes) -> RecordedUpload {
    RecordedUpload {
        authorization: header(headers, "authorization"),
        content_type: header(headers, "content-type"),
        api_arg: header(headers, "dropbox-api-arg"),
        query: query.unwrap_or_default(),
        body: body.to_vec(),
    }
}

async fn creator_token(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.creator_token_calls.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({"access_token": "creator-at", "expires_in": 3600}))
}

async fn drop_store_token(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.drop_store_token_calls.fetch_add(1, Ordering::SeqCst);
    // Slow enough for concurrent callers to queue behind the refresh
    tokio::time::sleep(Duration::from_millis(50)).await;
    Json(serde_json::json!({"access_token": "drop-at", "expires_in": 14400}))
}

async fn reject_token() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "invalid_client"})),
    )
}

async fn source_pdf(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.source_fetches.fetch_add(1, Ordering::SeqCst);
    pdf_bytes()
}

async fn source_slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(3)).await;
    pdf_bytes()
}

/// Sends a PDF prefix, then the connection fails mid-body.
async fn source_truncated() -> Body {
    let chunks = futures_util::stream::unfold(0u8, |step| async move {
        match step {
            0 => Some((Ok(Bytes::from_static(b"%PDF-1.4\npartial")), 1)),
            1 => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Some((Err(std::io::Error::other("source connection reset")), 2))
            }
            _ => None,
        }
    });
    Body::from_stream(chunks)
}

/// Sends a PDF prefix, then stalls far past any test timeout.
async fn source_stalled() -> Body {
    let chunks = futures_util::stream::unfold(0u8, |step| async move {
        match step {
            0 => Some((Ok::<_, std::io::Error>(Bytes::from_static(b"%PDF-1.4\npartial")), 1)),
            1 => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Some((Ok(Bytes::from(pdf_bytes())), 2))
            }
            _ => None,
        }
    });
    Body::from_stream(chunks)
}

async fn creator_download(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    state.creator_downloads.fetch_add(1, Ordering::SeqCst);
    if header(&headers, "authorization") != "Zoho-oauthtoken creator-at" {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    pdf_bytes().into_response()
}

async fn creator_upload(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> impl IntoResponse {
    state
        .creator_uploads
        .lock()
        .unwrap()
        .push(record(&headers, query, body));
    Json(serde_json::json!({"code": 3000, "data": {"message": "uploaded"}}))
}

async fn drop_store_upload(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let upload = record(&headers, None, body);
    let arg: serde_json::Value = serde_json::from_str(&upload.api_arg).unwrap_or_default();
    let path = arg["path"].as_str().unwrap_or_default().to_owned();
    let name = path.rsplit('/').next().unwrap_or_default().to_owned();
    state.drop_store_uploads.lock().unwrap().push(upload);
    Json(serde_json::json!({"name": name, "path_display": path}))
}

async fn drop_store_upload_occupying(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let dir = state.occupy_staging.lock().unwrap().clone();
    if let Some(dir) = dir {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            std::fs::remove_file(&path).unwrap();
            std::fs::create_dir(&path).unwrap();
            std::fs::write(path.join("held"), b"x").unwrap();
        }
    }
    drop_store_upload(State(state), headers, body).await
}
