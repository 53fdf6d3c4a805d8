use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::auth::Identity;
use crate::cohort::cohort;
use crate::endpoints::stream::{paced_body, StreamPacer};
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{AppState, AppStateData};
use crate::rate_limit::Admission;

pub const STREAM_FRAME_COUNT: u32 = 5;
pub const STREAM_FRAME_INTERVAL: Duration = Duration::from_secs(1);

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingPayload {
    pub message: String,
    pub cohort: u8,
    pub rate_limit_remaining: u32,
    pub stream_sequence: u32,
}

impl GreetingPayload {
    pub fn new(identity: &Identity, visit_number: u32, rate_limit_remaining: u32) -> Self {
        Self {
            // The ordinal is rendered without its leading zeros
            message: format!(
                "Welcome USER_{}, this is your visit #{visit_number}",
                identity.ordinal()
            ),
            cohort: cohort(identity.ordinal()),
            rate_limit_remaining,
            stream_sequence: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    SingleShot,
    Streaming,
}

impl DeliveryMode {
    /// Streaming only when the first `stream` query parameter is exactly `true`.
    pub fn from_query(query: Option<&str>) -> Self {
        let stream = query.and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "stream")
                .map(|(_, value)| value)
        });
        match stream.as_deref() {
            Some("true") => DeliveryMode::Streaming,
            _ => DeliveryMode::SingleShot,
        }
    }
}

/// Handler for every authenticated and admitted request, whatever its method or path
#[instrument(name = "greeting", skip_all, fields(user = %identity))]
pub async fn greeting_handler(
    State(app_state): AppState,
    Extension(identity): Extension<Identity>,
    Extension(admission): Extension<Admission>,
    uri: Uri,
) -> Result<Response, Error> {
    let payload = compose_greeting(&app_state, &identity, admission);
    match DeliveryMode::from_query(uri.query()) {
        DeliveryMode::SingleShot => single_shot_response(&payload),
        DeliveryMode::Streaming => Ok(streaming_response(&app_state, payload)),
    }
}

/// Record the visit and build the payload for this request
pub fn compose_greeting(
    app_state: &AppStateData,
    identity: &Identity,
    admission: Admission,
) -> GreetingPayload {
    let visit_number = app_state.visits.record_visit(identity) + 1;
    let payload = GreetingPayload::new(identity, visit_number, admission.remaining);
    debug!(
        visit = visit_number,
        cohort = payload.cohort,
        remaining = payload.rate_limit_remaining,
        "Composed greeting"
    );
    payload
}

fn single_shot_response(payload: &GreetingPayload) -> Result<Response, Error> {
    let body = serde_json::to_vec(payload).map_err(|e| {
        Error::new(ErrorDetails::Serialization {
            message: format!("Failed to serialize greeting: {e}"),
        })
    })?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
        body,
    )
        .into_response())
}

fn streaming_response(app_state: &AppStateData, payload: GreetingPayload) -> Response {
    let body = paced_body(
        StreamPacer::new(payload, STREAM_FRAME_COUNT),
        app_state.stream_frame_interval,
        app_state.metrics.clone(),
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, JSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
