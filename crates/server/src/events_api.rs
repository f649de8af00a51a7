use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use beerbot_slack::events::{EventContext, EventsApiRequest, HandlerResult};
use beerbot_slack::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use beerbot_slack::{decode_request, EventDispatcher, SignatureVerifier};
use chrono::Utc;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const RETRY_NUM_HEADER: &str = "x-slack-retry-num";
const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

#[derive(Clone)]
pub struct EventsState {
    verifier: Arc<SignatureVerifier>,
    dispatcher: Arc<EventDispatcher>,
    in_flight: Arc<InFlight>,
}

impl EventsState {
    pub fn new(verifier: SignatureVerifier, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            verifier: Arc::new(verifier),
            dispatcher,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }
}

/// Counts dispatch tasks still running after their request was acknowledged.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn drained(&self) {
        loop {
            let idle = self.idle.notified();
            if self.is_empty() {
                return;
            }
            idle.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub fn router(state: EventsState) -> Router {
    Router::new().route("/slack/events", post(receive)).with_state(state)
}

pub async fn receive(State(state): State<EventsState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(error) = state.verifier.verify(
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
        &body,
        Utc::now().timestamp(),
    ) {
        warn!(
            event_name = "ingress.slack.signature_rejected",
            correlation_id = "unknown",
            error = %error,
            "rejecting unsigned or stale slack request"
        );
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(error) => {
            warn!(
                event_name = "ingress.slack.payload_invalid",
                correlation_id = "unknown",
                error = %error,
                "slack payload is not valid json"
            );
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match request {
        EventsApiRequest::UrlVerification { challenge } => {
            info!(
                event_name = "ingress.slack.url_verification",
                correlation_id = "url_verification",
                "answering slack url verification"
            );
            Json(json!({ "challenge": challenge })).into_response()
        }
        EventsApiRequest::EventCallback(callback) => {
            if let Some(retry_num) = header(&headers, RETRY_NUM_HEADER) {
                info!(
                    event_name = "ingress.slack.retry_dropped",
                    correlation_id = %callback.event_id,
                    retry_num,
                    retry_reason = header(&headers, RETRY_REASON_HEADER).unwrap_or("unknown"),
                    "acknowledging slack redelivery without processing"
                );
                return StatusCode::OK.into_response();
            }

            let envelope = callback.into_envelope();
            let ctx = EventContext::for_envelope(&envelope);
            info!(
                event_name = "ingress.slack.event_received",
                correlation_id = %ctx.correlation_id,
                event_type = ?envelope.event.event_type(),
                "slack event accepted"
            );

            let guard = state.in_flight.enter();
            let dispatcher = Arc::clone(&state.dispatcher);
            tokio::spawn(async move {
                let _guard = guard;
                match dispatcher.dispatch(&envelope, &ctx).await {
                    Ok(HandlerResult::Processed(outcome)) => debug!(
                        event_name = "ingress.slack.event_processed",
                        correlation_id = %ctx.correlation_id,
                        intent = outcome.intent,
                        "slack event processed"
                    ),
                    Ok(HandlerResult::Ignored) => {}
                    Err(error) => error!(
                        event_name = "ingress.slack.event_failed",
                        correlation_id = %ctx.correlation_id,
                        error = %error,
                        "slack event handling failed"
                    ),
                }
            });

            StatusCode::OK.into_response()
        }
        EventsApiRequest::Unsupported => StatusCode::OK.into_response(),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
