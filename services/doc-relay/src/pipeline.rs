//! File relay pipeline
//!
//! One pipeline serves every flow, parameterized by source and destination:
//!
//! 1. validate the request (nothing is allocated for a bad request)
//! 2. allocate a staging file
//! 3. acquire the source token when the source is a Creator record
//! 4. stream the source into the staging file
//! 5. reject empty or non-PDF payloads before any upload
//! 6. acquire the destination token and upload
//! 7. release the staging file, whatever happened above

use std::sync::Arc;

use provider::ProviderKind;
use serde::Serialize;
use token_cache::TokenCache;
use tracing::{info, instrument, warn};

use crate::error::RelayError;
use crate::remote::RemoteClients;
use crate::staging::{StagedContent, StagingFile, StagingStore};

/// Signature every relayed document must start with.
pub const PDF_SIGNATURE: &[u8] = b"%PDF";

/// Root folder for documents relayed to DropStore.
const DROP_STORE_ROOT: &str = "/uploads";

/// Coordinates of a file field on one Creator record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLocator {
    pub owner: String,
    pub app_link_name: String,
    pub report_link_name: String,
    pub record_id: String,
    pub field_link_name: String,
}

impl RecordLocator {
    /// `{owner}/{app}/report/{report}/{record_id}/{field}`
    pub fn path(&self) -> String {
        format!(
            "{}/{}/report/{}/{}/{}",
            self.owner,
            self.app_link_name,
            self.report_link_name,
            self.record_id,
            self.field_link_name
        )
    }

    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("owner", &self.owner),
            ("app_link_name", &self.app_link_name),
            ("report_link_name", &self.report_link_name),
            ("record_id", &self.record_id),
            ("field_link_name", &self.field_link_name),
        ]
    }
}

/// Where the document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelaySource {
    /// Publicly fetchable export URL
    Url(String),
    CreatorRecord(RecordLocator),
}

/// Where the document goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDestination {
    CreatorRecord(RecordLocator),
    DropStore,
}

impl RelayDestination {
    pub fn provider(&self) -> ProviderKind {
        match self {
            RelayDestination::CreatorRecord(_) => ProviderKind::Creator,
            RelayDestination::DropStore => ProviderKind::DropStore,
        }
    }
}

/// Person and document type the relayed file is named after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentName {
    pub surname: String,
    pub given_name: String,
    pub doc_type: String,
}

impl DocumentName {
    /// `{surname},{given_name}`
    pub fn person(&self) -> String {
        format!("{},{}", self.surname, self.given_name)
    }

    /// `{surname},{given_name}-{doc_type}.pdf`
    pub fn file_name(&self) -> String {
        format!("{}-{}.pdf", self.person(), self.doc_type)
    }

    /// `/uploads/{surname},{given_name}/{file_name}`
    pub fn drop_store_path(&self) -> String {
        format!("{DROP_STORE_ROOT}/{}/{}", self.person(), self.file_name())
    }

    fn fields(&self) -> [(&'static str, &str); 3] {
        [
            ("surname", &self.surname),
            ("given_name", &self.given_name),
            ("doc_type", &self.doc_type),
        ]
    }
}

/// One relay: a source, a destination and the naming metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub source: RelaySource,
    pub destination: RelayDestination,
    pub name: DocumentName,
}

impl RelayRequest {
    /// Metric and log label for the source/destination pair.
    pub fn flow(&self) -> &'static str {
        match (&self.source, &self.destination) {
            (RelaySource::Url(_), RelayDestination::CreatorRecord(_)) => "url_to_creator",
            (RelaySource::Url(_), RelayDestination::DropStore) => "url_to_drop_store",
            (RelaySource::CreatorRecord(_), RelayDestination::CreatorRecord(_)) => {
                "creator_to_creator"
            }
            (RelaySource::CreatorRecord(_), RelayDestination::DropStore) => {
                "creator_to_drop_store"
            }
        }
    }

    /// Reject requests with missing, blank or path-breaking fields.
    ///
    /// All missing fields are reported at once.
    pub fn validate(&self) -> Result<(), RelayError> {
        let mut fields: Vec<(&'static str, &str)> = Vec::new();
        match &self.source {
            RelaySource::Url(url) => fields.push(("source_url", url)),
            RelaySource::CreatorRecord(locator) => fields.extend(locator.fields()),
        }
        if let RelayDestination::CreatorRecord(locator) = &self.destination {
            fields.extend(locator.fields());
        }
        fields.extend(self.name.fields());

        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(RelayError::Validation(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }

        if let RelaySource::Url(url) = &self.source
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(RelayError::Validation(format!(
                "source_url must be an http(s) URL, got: {url}"
            )));
        }

        let malformed: Vec<&str> = fields
            .iter()
            .filter(|(name, value)| *name != "source_url" && !is_path_segment(value))
            .map(|(name, _)| *name)
            .collect();
        if !malformed.is_empty() {
            return Err(RelayError::Validation(format!(
                "parameters must not contain path separators or control characters: {}",
                malformed.join(", ")
            )));
        }

        Ok(())
    }
}

fn is_path_segment(value: &str) -> bool {
    !value
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
        && value != "."
        && value != ".."
}

/// Reject staged payloads that must never be uploaded.
pub fn validate_content(content: &StagedContent) -> Result<(), RelayError> {
    if content.size_bytes == 0 {
        return Err(RelayError::InvalidContent(
            "downloaded file is empty".into(),
        ));
    }
    if !content.content_sample.starts_with(PDF_SIGNATURE) {
        return Err(RelayError::InvalidContent(
            "downloaded file is not a PDF".into(),
        ));
    }
    Ok(())
}

/// Outcome of a successful relay.
#[derive(Debug, Clone, Serialize)]
pub struct RelayReceipt {
    /// Destination path (DropStore) or upload URL (Creator)
    pub destination: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// JSON returned by the destination, `null` when it sent none
    pub response: serde_json::Value,
}

/// Orchestrates token acquisition, staging, validation and upload.
pub struct FileRelayPipeline {
    tokens: Arc<TokenCache>,
    staging: StagingStore,
    remote: RemoteClients,
}

impl FileRelayPipeline {
    pub fn new(tokens: Arc<TokenCache>, staging: StagingStore, remote: RemoteClients) -> Self {
        Self {
            tokens,
            staging,
            remote,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Run one relay end to end.
    ///
    /// The staging file is released before this returns, on success and on
    /// every failure.
    #[instrument(skip_all, fields(flow = request.flow()))]
    pub async fn relay(&self, request: &RelayRequest) -> Result<RelayReceipt, RelayError> {
        request.validate()?;

        let staged = self
            .staging
            .allocate()
            .await
            .map_err(|e| RelayError::staging("allocating staging file", e))?;

        let result = self.transfer(request, &staged).await;

        if !staged.release().await {
            warn!("staging file left behind after relay");
        }

        match &result {
            Ok(receipt) => info!(
                destination = %receipt.destination,
                size_bytes = receipt.size_bytes,
                "relay complete"
            ),
            Err(e) => warn!(kind = e.kind(), error = %e, "relay failed"),
        }
        result
    }

    async fn transfer(
        &self,
        request: &RelayRequest,
        staged: &StagingFile,
    ) -> Result<RelayReceipt, RelayError> {
        match &request.source {
            RelaySource::Url(url) => {
                self.remote.download_to(url, None, staged.path()).await?;
            }
            RelaySource::CreatorRecord(locator) => {
                let token = self.tokens.get_valid_token(ProviderKind::Creator).await?;
                let url = self.remote.creator_download_url(locator);
                self.remote
                    .download_to(&url, Some((ProviderKind::Creator, &token)), staged.path())
                    .await?;
            }
        }

        let content = staged
            .inspect()
            .await
            .map_err(|e| RelayError::staging("inspecting staging file", e))?;
        validate_content(&content)?;

        let payload = staged
            .read_all()
            .await
            .map_err(|e| RelayError::staging("reading staging file", e))?;

        let token = self
            .tokens
            .get_valid_token(request.destination.provider())
            .await?;
        let file_name = request.name.file_name();

        let (destination, response) = match &request.destination {
            RelayDestination::DropStore => {
                let path = request.name.drop_store_path();
                let response = self
                    .remote
                    .upload_to_drop_store(&token, &path, payload)
                    .await?;
                (path, response)
            }
            RelayDestination::CreatorRecord(locator) => {
                let response = self
                    .remote
                    .upload_to_creator(&token, locator, &file_name, payload)
                    .await?;
                (self.remote.creator_upload_url(locator), response)
            }
        };

        Ok(RelayReceipt {
            destination,
            file_name,
            size_bytes: content.size_bytes,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockUpstream, Upstream, pdf_bytes};
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn locator() -> RecordLocator {
        RecordLocator {
            owner: "acme".into(),
            app_link_name: "hr".into(),
            report_link_name: "All_Helpers".into(),
            record_id: "4411".into(),
            field_link_name: "Waiver".into(),
        }
    }

    fn name() -> DocumentName {
        DocumentName {
            surname: "Cruz".into(),
            given_name: "Ana".into(),
            doc_type: "waiver".into(),
        }
    }

    fn url_to_drop_store(url: String) -> RelayRequest {
        RelayRequest {
            source: RelaySource::Url(url),
            destination: RelayDestination::DropStore,
            name: name(),
        }
    }

    fn staging_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn naming_is_deterministic() {
        let name = name();
        assert_eq!(name.file_name(), "Cruz,Ana-waiver.pdf");
        assert_eq!(name.drop_store_path(), "/uploads/Cruz,Ana/Cruz,Ana-waiver.pdf");
        assert_eq!(name.drop_store_path(), name.clone().drop_store_path());
    }

    #[test]
    fn drop_store_folder_keeps_hyphenated_names_intact() {
        let name = DocumentName {
            surname: "Smith-Jones".into(),
            given_name: "Mary-Kate".into(),
            doc_type: "id-card".into(),
        };
        assert_eq!(
            name.drop_store_path(),
            "/uploads/Smith-Jones,Mary-Kate/Smith-Jones,Mary-Kate-id-card.pdf"
        );
    }

    #[test]
    fn locator_path_layout() {
        assert_eq!(locator().path(), "acme/hr/report/All_Helpers/4411/Waiver");
    }

    #[test]
    fn flow_labels() {
        let request = url_to_drop_store("https://x".into());
        assert_eq!(request.flow(), "url_to_drop_store");
        let request = RelayRequest {
            source: RelaySource::CreatorRecord(locator()),
            destination: RelayDestination::DropStore,
            name: name(),
        };
        assert_eq!(request.flow(), "creator_to_drop_store");
    }

    #[test]
    fn validation_lists_every_missing_field() {
        let request = RelayRequest {
            source: RelaySource::Url("https://export.example/design.pdf".into()),
            destination: RelayDestination::CreatorRecord(RecordLocator {
                owner: "".into(),
                ..locator()
            }),
            name: DocumentName {
                doc_type: "   ".into(),
                ..name()
            },
        };

        let err = request.validate().unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, RelayError::Validation(_)));
        assert!(msg.contains("owner"), "got: {msg}");
        assert!(msg.contains("doc_type"), "got: {msg}");
        assert!(!msg.contains("surname"), "got: {msg}");
    }

    #[test]
    fn validation_rejects_non_http_source() {
        let err = url_to_drop_store("file:///etc/passwd".into())
            .validate()
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn validation_rejects_path_separators() {
        let request = RelayRequest {
            name: DocumentName {
                surname: "../etc".into(),
                ..name()
            },
            ..url_to_drop_store("https://export.example/a.pdf".into())
        };
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("surname"), "got: {err}");
    }

    #[test]
    fn content_validation() {
        let empty = StagedContent {
            size_bytes: 0,
            content_sample: vec![],
        };
        let html = StagedContent {
            size_bytes: 15,
            content_sample: b"<html>nope</html>".to_vec(),
        };
        let pdf = StagedContent {
            size_bytes: 500,
            content_sample: b"%PDF-1.7".to_vec(),
        };
        assert!(matches!(
            validate_content(&empty),
            Err(RelayError::InvalidContent(_))
        ));
        assert!(matches!(
            validate_content(&html),
            Err(RelayError::InvalidContent(_))
        ));
        assert!(validate_content(&pdf).is_ok());
    }

    #[tokio::test]
    async fn relays_export_url_to_drop_store() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline(staging.path());

        let receipt = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/pdf")))
            .await
            .unwrap();

        assert_eq!(receipt.destination, "/uploads/Cruz,Ana/Cruz,Ana-waiver.pdf");
        assert_eq!(receipt.file_name, "Cruz,Ana-waiver.pdf");
        assert_eq!(receipt.size_bytes, 500);
        assert_eq!(receipt.response["name"], "Cruz,Ana-waiver.pdf");

        let uploads = upstream.state.drop_store_uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        let arg: serde_json::Value = serde_json::from_str(&uploads[0].api_arg).unwrap();
        assert_eq!(arg["path"], "/uploads/Cruz,Ana/Cruz,Ana-waiver.pdf");
        assert_eq!(arg["mode"], "add");
        assert_eq!(arg["autorename"], true);
        assert_eq!(uploads[0].authorization, "Bearer drop-at");
        assert_eq!(uploads[0].body, pdf_bytes());
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn relays_creator_record_to_drop_store_with_cached_tokens() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline(staging.path());
        let request = RelayRequest {
            source: RelaySource::CreatorRecord(locator()),
            destination: RelayDestination::DropStore,
            name: name(),
        };

        pipeline.relay(&request).await.unwrap();
        pipeline.relay(&request).await.unwrap();

        let state = &upstream.state;
        assert_eq!(state.creator_downloads.load(Ordering::SeqCst), 2);
        assert_eq!(state.creator_token_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.drop_store_token_calls.load(Ordering::SeqCst), 1);
        let uploads = state.drop_store_uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 2);
        assert_eq!(
            uploads[0].api_arg, uploads[1].api_arg,
            "same metadata must yield the same destination path"
        );
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn relays_export_url_to_creator_record() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline(staging.path());
        let request = RelayRequest {
            source: RelaySource::Url(upstream.url("/source/pdf")),
            destination: RelayDestination::CreatorRecord(locator()),
            name: name(),
        };

        let receipt = pipeline.relay(&request).await.unwrap();

        assert!(
            receipt
                .destination
                .ends_with("/acme/hr/report/All_Helpers/4411/Waiver/upload"),
            "got: {}",
            receipt.destination
        );
        assert_eq!(receipt.response["code"], 3000);

        let uploads = upstream.state.creator_uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        let upload = &uploads[0];
        assert_eq!(upload.authorization, "Zoho-oauthtoken creator-at");
        assert!(upload.content_type.starts_with("multipart/form-data"));
        assert!(
            upload.query.contains("skip_workflow"),
            "got: {}",
            upload.query
        );
        let body = String::from_utf8_lossy(&upload.body);
        assert!(body.contains("filename=\"Cruz,Ana-waiver.pdf\""), "got: {body}");
        assert!(body.contains("%PDF"));
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn empty_payload_is_never_uploaded() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline(staging.path());

        let err = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/empty")))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::InvalidContent(_)), "got: {err}");
        assert!(upstream.state.drop_store_uploads.lock().unwrap().is_empty());
        assert_eq!(upstream.state.drop_store_token_calls.load(Ordering::SeqCst), 0);
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn non_pdf_payload_is_never_uploaded() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline(staging.path());

        let err = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/html")))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::InvalidContent(_)), "got: {err}");
        assert!(upstream.state.drop_store_uploads.lock().unwrap().is_empty());
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn source_error_status_is_download_error() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline(staging.path());

        let err = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/missing")))
            .await
            .unwrap_err();

        assert!(
            matches!(err, RelayError::Download { timeout: false, .. }),
            "got: {err}"
        );
        assert!(err.to_string().contains("404"), "got: {err}");
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn slow_source_times_out() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline_with(staging.path(), Upstream {
            timeout: std::time::Duration::from_millis(200),
            ..Upstream::default()
        });

        let err = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/slow")))
            .await
            .unwrap_err();

        assert!(
            matches!(err, RelayError::Download { timeout: true, .. }),
            "got: {err}"
        );
        assert!(err.is_timeout());
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn rejected_upload_is_upload_error() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline_with(staging.path(), Upstream {
            drop_store_upload_path: "/drop/upload-fail",
            ..Upstream::default()
        });

        let err = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/pdf")))
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                RelayError::Upload {
                    provider: ProviderKind::DropStore,
                    timeout: false,
                    ..
                }
            ),
            "got: {err}"
        );
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn source_failing_mid_body_leaves_nothing_staged() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline(staging.path());

        let err = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/truncated")))
            .await
            .unwrap_err();

        assert!(
            matches!(err, RelayError::Download { timeout: false, .. }),
            "got: {err}"
        );
        assert!(upstream.state.drop_store_uploads.lock().unwrap().is_empty());
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn source_stalling_mid_body_times_out_and_cleans_up() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline_with(staging.path(), Upstream {
            timeout: std::time::Duration::from_millis(300),
            ..Upstream::default()
        });

        let err = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/stalled")))
            .await
            .unwrap_err();

        assert!(
            matches!(err, RelayError::Download { timeout: true, .. }),
            "got: {err}"
        );
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn rejected_creator_upload_is_upload_error() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline_with(staging.path(), Upstream {
            creator_upload_base: "/creator/locked",
            ..Upstream::default()
        });
        let request = RelayRequest {
            source: RelaySource::Url(upstream.url("/source/pdf")),
            destination: RelayDestination::CreatorRecord(locator()),
            name: name(),
        };

        let err = pipeline.relay(&request).await.unwrap_err();

        assert!(
            matches!(
                err,
                RelayError::Upload {
                    provider: ProviderKind::Creator,
                    timeout: false,
                    ..
                }
            ),
            "got: {err}"
        );
        assert!(err.to_string().contains("403"), "got: {err}");
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn cleanup_failure_after_upload_is_counted_not_raised() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        *upstream.state.occupy_staging.lock().unwrap() = Some(staging.path().to_path_buf());
        let pipeline = upstream.pipeline_with(staging.path(), Upstream {
            drop_store_upload_path: "/drop/upload-occupy",
            ..Upstream::default()
        });

        let receipt = pipeline
            .relay(&url_to_drop_store(upstream.url("/source/pdf")))
            .await
            .unwrap();

        assert_eq!(receipt.destination, "/uploads/Cruz,Ana/Cruz,Ana-waiver.pdf");
        assert_eq!(upstream.state.drop_store_uploads.lock().unwrap().len(), 1);
        let output = handle.render();
        assert!(
            output.contains("staging_cleanup_failures_total 1"),
            "got: {output}"
        );
    }

    #[tokio::test]
    async fn token_failure_stops_before_download() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = upstream.pipeline_with(staging.path(), Upstream {
            creator_token_path: "/token/reject",
            ..Upstream::default()
        });
        let request = RelayRequest {
            source: RelaySource::CreatorRecord(locator()),
            destination: RelayDestination::DropStore,
            name: name(),
        };

        let err = pipeline.relay(&request).await.unwrap_err();

        assert!(
            matches!(
                err,
                RelayError::TokenRefresh {
                    provider: ProviderKind::Creator,
                    ..
                }
            ),
            "got: {err}"
        );
        assert_eq!(upstream.state.creator_downloads.load(Ordering::SeqCst), 0);
        assert_eq!(staging_entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn invalid_request_allocates_nothing() {
        let upstream = MockUpstream::start().await;
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("staging");
        let pipeline = upstream.pipeline(&staging);
        let request = RelayRequest {
            name: DocumentName {
                given_name: String::new(),
                ..name()
            },
            ..url_to_drop_store(upstream.url("/source/pdf"))
        };

        let err = pipeline.relay(&request).await.unwrap_err();

        assert!(matches!(err, RelayError::Validation(_)));
        assert!(!staging.exists(), "validation failure must not touch staging");
        assert_eq!(upstream.state.source_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_relays_share_one_refresh_and_clean_up() {
        let upstream = MockUpstream::start().await;
        let staging = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(upstream.pipeline(staging.path()));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pipeline = pipeline.clone();
            let request = url_to_drop_store(upstream.url("/source/pdf"));
            handles.push(tokio::spawn(async move { pipeline.relay(&request).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(upstream.state.drop_store_token_calls.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.state.drop_store_uploads.lock().unwrap().len(), 6);
        assert_eq!(staging_entries(staging.path()), 0);
    }
}
