//! Relay endpoints
//!
//! Translates the JSON bodies of `/upload-file` and `/upload-to-dropbox` into
//! `RelayRequest`s, runs them through the pipeline and renders the outcome.
//! Missing fields are not rejected by the extractor; they reach validation
//! as blanks so every missing field is reported in one 400.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{Instrument, info_span};

use crate::error::RelayError;
use crate::pipeline::{
    DocumentName, FileRelayPipeline, RecordLocator, RelayDestination, RelayReceipt, RelayRequest,
    RelaySource,
};

/// Shared state for the relay handlers
#[derive(Clone)]
pub struct RelayState {
    pub pipeline: Arc<FileRelayPipeline>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// Body of `POST /upload-file`: export URL into a Creator record field.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadFileBody {
    pub canva_design_export_url: Option<String>,
    pub owner: Option<String>,
    #[serde(rename = "appLinkName")]
    pub app_link_name: Option<String>,
    #[serde(rename = "reportLinkName")]
    pub report_link_name: Option<String>,
    pub record_id: Option<String>,
    pub field_link_name: Option<String>,
    pub helper_surname: Option<String>,
    #[serde(rename = "helper_givenName")]
    pub helper_given_name: Option<String>,
    pub doc_type: Option<String>,
}

impl From<UploadFileBody> for RelayRequest {
    fn from(body: UploadFileBody) -> Self {
        RelayRequest {
            source: RelaySource::Url(body.canva_design_export_url.unwrap_or_default()),
            destination: RelayDestination::CreatorRecord(RecordLocator {
                owner: body.owner.unwrap_or_default(),
                app_link_name: body.app_link_name.unwrap_or_default(),
                report_link_name: body.report_link_name.unwrap_or_default(),
                record_id: body.record_id.unwrap_or_default(),
                field_link_name: body.field_link_name.unwrap_or_default(),
            }),
            name: DocumentName {
                surname: body.helper_surname.unwrap_or_default(),
                given_name: body.helper_given_name.unwrap_or_default(),
                doc_type: body.doc_type.unwrap_or_default(),
            },
        }
    }
}

/// Body of `POST /upload-to-dropbox`: Creator record field into DropStore.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadToDropStoreBody {
    #[serde(rename = "recordId")]
    pub record_id: Option<String>,
    #[serde(rename = "fieldLinkName")]
    pub field_link_name: Option<String>,
    pub owner: Option<String>,
    #[serde(rename = "appLinkName")]
    pub app_link_name: Option<String>,
    #[serde(rename = "reportLinkName")]
    pub report_link_name: Option<String>,
    pub helper_surname: Option<String>,
    #[serde(rename = "helper_givenName")]
    pub helper_given_name: Option<String>,
    pub doc_type: Option<String>,
}

impl From<UploadToDropStoreBody> for RelayRequest {
    fn from(body: UploadToDropStoreBody) -> Self {
        RelayRequest {
            source: RelaySource::CreatorRecord(RecordLocator {
                owner: body.owner.unwrap_or_default(),
                app_link_name: body.app_link_name.unwrap_or_default(),
                report_link_name: body.report_link_name.unwrap_or_default(),
                record_id: body.record_id.unwrap_or_default(),
                field_link_name: body.field_link_name.unwrap_or_default(),
            }),
            destination: RelayDestination::DropStore,
            name: DocumentName {
                surname: body.helper_surname.unwrap_or_default(),
                given_name: body.helper_given_name.unwrap_or_default(),
                doc_type: body.doc_type.unwrap_or_default(),
            },
        }
    }
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// HTTP status for a relay failure. Network steps that timed out map to 504.
pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::InvalidContent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RelayError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RelayError::TokenRefresh { .. }
        | RelayError::Download { .. }
        | RelayError::Upload { .. } => {
            if err.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
pub fn error_response(err: &RelayError, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": err.kind(),
            "message": err.to_string(),
            "request_id": request_id,
        }
    });
    (status_for(err), Json(body)).into_response()
}

/// `POST /upload-file`
pub async fn upload_file(
    state: &RelayState,
    body: Result<Json<UploadFileBody>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    let request = match body {
        Ok(Json(body)) => RelayRequest::from(body),
        Err(rejection) => return reject_body(state, rejection, &request_id),
    };

    match run(state, &request, &request_id).await {
        Ok(receipt) => Json(serde_json::json!({
            "success": true,
            "message": "File uploaded successfully",
            "result": receipt.response,
            "request_id": request_id,
        }))
        .into_response(),
        Err(e) => error_response(&e, &request_id),
    }
}

/// `POST /upload-to-dropbox`
pub async fn upload_to_drop_store(
    state: &RelayState,
    body: Result<Json<UploadToDropStoreBody>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    let request = match body {
        Ok(Json(body)) => RelayRequest::from(body),
        Err(rejection) => return reject_body(state, rejection, &request_id),
    };

    match run(state, &request, &request_id).await {
        Ok(receipt) => Json(serde_json::json!({
            "success": true,
            "message": "File uploaded to Dropbox successfully",
            "dropboxPath": receipt.destination,
            "request_id": request_id,
        }))
        .into_response(),
        Err(e) => error_response(&e, &request_id),
    }
}

fn reject_body(state: &RelayState, rejection: JsonRejection, request_id: &str) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    state.errors_total.fetch_add(1, Ordering::Relaxed);
    let err = RelayError::Validation(format!("invalid JSON body: {}", rejection.body_text()));
    error_response(&err, request_id)
}

async fn run(
    state: &RelayState,
    request: &RelayRequest,
    request_id: &str,
) -> Result<RelayReceipt, RelayError> {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let flow = request.flow();
    let started = Instant::now();

    let result = state
        .pipeline
        .relay(request)
        .instrument(info_span!("relay_request", request_id = %request_id))
        .await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            e.kind()
        }
    };
    crate::metrics::record_relay(flow, outcome, started.elapsed().as_secs_f64());
    result
}
