//! Inbound webhooks.
//!
//! Every endpoint reads the raw body so the signature can be checked
//! before anything is parsed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use journey_automation::{
    from_bank_account, from_business_registration, from_job_application, AutomationEvent,
    EventReceipt,
};
use journey_core::{EventId, JourneyError, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::signature::{verify, SIGNATURE_HEADER};
use crate::AppState;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always true; failures use the error body
    pub success: bool,
    /// Outcome
    #[serde(flatten)]
    pub receipt: EventReceipt,
}

impl From<EventReceipt> for WebhookResponse {
    fn from(receipt: EventReceipt) -> Self {
        Self {
            success: true,
            receipt,
        }
    }
}

impl WebhookResponse {
    fn ignored() -> Self {
        EventReceipt {
            duplicate: false,
            transitions: Vec::new(),
        }
        .into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenericBody {
    user_id: String,
    event_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    user_id: String,
    status: String,
    #[serde(default, alias = "businessData", alias = "accountData")]
    data: Value,
    #[serde(default)]
    event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    user_id: String,
    event_type: String,
    #[serde(default)]
    application_data: Value,
    #[serde(default)]
    event_id: Option<String>,
}

/// `POST /api/webhooks/events`
pub async fn generic_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    check_signature(&state, &headers, &body)?;
    let body: GenericBody = parse_body(&body)?;
    let event = AutomationEvent::parse(&body.event_type, body.payload)?;
    dispatch(&state, &headers, &body.user_id, body.event_id, event).await
}

/// `POST /api/webhooks/business-registration`
pub async fn business_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    check_signature(&state, &headers, &body)?;
    let body: StatusBody = parse_body(&body)?;
    match from_business_registration(&body.status, &body.data)? {
        Some(event) => dispatch(&state, &headers, &body.user_id, body.event_id, event).await,
        None => Ok(Json(WebhookResponse::ignored())),
    }
}

/// `POST /api/webhooks/bank-account`
pub async fn bank_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    check_signature(&state, &headers, &body)?;
    let body: StatusBody = parse_body(&body)?;
    match from_bank_account(&body.status, &body.data)? {
        Some(event) => dispatch(&state, &headers, &body.user_id, body.event_id, event).await,
        None => Ok(Json(WebhookResponse::ignored())),
    }
}

/// `POST /api/webhooks/job-application`
pub async fn job_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    check_signature(&state, &headers, &body)?;
    let body: JobBody = parse_body(&body)?;
    let event = from_job_application(&body.event_type, &body.application_data)?;
    dispatch(&state, &headers, &body.user_id, body.event_id, event).await
}

fn check_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Ok(());
    };
    let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if verify(secret, body, header) {
        Ok(())
    } else {
        warn!(present = header.is_some(), "webhook signature rejected");
        Err(ApiError::InvalidSignature)
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        JourneyError::UnrecognizedEvent(format!("malformed webhook payload: {}", e)).into()
    })
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    user_id: &str,
    body_event_id: Option<String>,
    event: AutomationEvent,
) -> ApiResult<Json<WebhookResponse>> {
    if user_id.trim().is_empty() {
        return Err(JourneyError::UnrecognizedEvent("userId must not be empty".to_string()).into());
    }
    let event_id = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(body_event_id)
        .filter(|id| !id.is_empty())
        .map(EventId::new);

    let receipt = state
        .engine
        .apply_event(&UserId::new(user_id), event_id.as_ref(), &event)
        .await?;
    Ok(Json(receipt.into()))
}
