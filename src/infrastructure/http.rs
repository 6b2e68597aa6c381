//! HTTP surfaces of the producer and consumer processes.

use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use log::{info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::{
    consumer::{ConsumerStats, MemberState},
    dto::*,
    use_cases::{QueryInboxUseCase, SendNotificationUseCase},
};
use crate::domain::errors::{DomainError, LogError};
use crate::domain::value_objects::UserId;

/// A failed request, rendered as `{"message": ...}` with a matching status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let status = match &err {
            DomainError::Validation(_) | DomainError::InvalidTopicName(_) => {
                StatusCode::BAD_REQUEST
            }
            DomainError::UserNotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Publish(LogError::RecordTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            DomainError::Publish(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

#[derive(Clone)]
struct ProducerState {
    send: Arc<SendNotificationUseCase>,
}

pub fn producer_router(send: Arc<SendNotificationUseCase>) -> Router {
    Router::new()
        .route("/send", post(handle_send))
        .with_state(ProducerState { send })
}

async fn handle_send(
    State(state): State<ProducerState>,
    request: Request,
) -> Result<Json<SendNotificationResponse>, ApiError> {
    let form = read_send_form(request).await?;
    let from_id = UserId::parse("fromId", &form.from_id)?;
    let to_id = UserId::parse("toId", &form.to_id)?;

    let ack = state.send.execute(from_id, to_id, form.message).await.map_err(|e| {
        warn!("Send {} -> {} rejected: {}", from_id, to_id, e);
        ApiError::from(e)
    })?;
    Ok(Json(ack.into()))
}

/// JSON when the client says so, form-encoded otherwise
async fn read_send_form(request: Request) -> Result<SendNotificationForm, ApiError> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if is_json {
        let Json(form) = Json::<SendNotificationForm>::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(form)
    } else {
        let Form(form) = Form::<SendNotificationForm>::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(form)
    }
}

#[derive(Clone)]
struct ConsumerState {
    inbox: Arc<QueryInboxUseCase>,
    member: watch::Receiver<MemberState>,
    stats: Arc<ConsumerStats>,
}

pub fn consumer_router(
    inbox: Arc<QueryInboxUseCase>,
    member: watch::Receiver<MemberState>,
    stats: Arc<ConsumerStats>,
) -> Router {
    Router::new()
        .route("/notifications/{user_id}", get(handle_inbox))
        .route("/health", get(handle_health))
        .with_state(ConsumerState {
            inbox,
            member,
            stats,
        })
}

async fn handle_inbox(
    State(state): State<ConsumerState>,
    Path(user_id): Path<String>,
) -> Result<Json<InboxResponse>, ApiError> {
    let recipient = UserId::parse("userId", &user_id)?;
    Ok(Json(InboxResponse {
        notifications: state.inbox.execute(recipient),
    }))
}

async fn handle_health(State(state): State<ConsumerState>) -> impl IntoResponse {
    let member = state.member.borrow().clone();
    let status = if member == MemberState::Stopped {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = HealthResponse {
        status: if status.is_success() { "ok" } else { "stopped" }.to_string(),
        state: member.name().to_string(),
        partitions: member.partitions().iter().map(|p| p.value()).collect(),
        applied: state.stats.applied(),
        skipped: state.stats.skipped(),
        rebalances: state.stats.rebalances(),
    };
    (status, Json(body))
}

/// Serve `app` until `shutdown` fires, letting in-flight requests finish
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("HTTP listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
