use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{
    accounts::AccountRequest, commissions::CommissionRequest, earnings::EarningsRequest,
    invitations::InvitationRequest, withdrawals::WithdrawalRequest, ServiceError,
};

mod accounts;
mod commissions;
mod withdrawals;

#[derive(Clone)]
pub struct AppState {
    pub account_channel: mpsc::Sender<AccountRequest>,
    pub invitation_channel: mpsc::Sender<InvitationRequest>,
    pub commission_channel: mpsc::Sender<CommissionRequest>,
    pub withdrawal_channel: mpsc::Sender<WithdrawalRequest>,
    pub earnings_channel: mpsc::Sender<EarningsRequest>,
}

type Reply = (StatusCode, Json<Value>);

/// Sends a request into a service loop and waits for its answer.
async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("HTTP".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("HTTP".to_string(), e.to_string()))?
}

fn reply<T: Serialize>(success: StatusCode, result: Result<T, ServiceError>) -> Reply {
    match result {
        Ok(body) => (success, Json(json!(body))),
        Err(service_error) => error_reply(service_error),
    }
}

fn error_reply(service_error: ServiceError) -> Reply {
    let status = status_for(&service_error);
    if status.is_server_error() {
        log::error!("Request failed: {}", service_error);
    }

    (
        status,
        Json(json!({
            "error": service_error.kind(),
            "details": service_error.to_string()
        })),
    )
}

fn status_for(service_error: &ServiceError) -> StatusCode {
    match service_error {
        ServiceError::NotFound(..) => StatusCode::NOT_FOUND,
        ServiceError::AccountExists(_)
        | ServiceError::AlreadyBound(_)
        | ServiceError::AlreadyProcessed(_)
        | ServiceError::DuplicateTask(_) => StatusCode::CONFLICT,
        ServiceError::SelfInvite(_)
        | ServiceError::NotBound { .. }
        | ServiceError::AmountOutOfRange { .. }
        | ServiceError::InvalidAmount(_)
        | ServiceError::InvalidMethod(_) => StatusCode::BAD_REQUEST,
        ServiceError::InsufficientFunds(_)
        | ServiceError::AccountInactive(_)
        | ServiceError::Overflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::Repository(..)
        | ServiceError::Communication(..)
        | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/accounts", post(accounts::register))
        .route("/accounts/{id}", get(accounts::get_account))
        .route("/accounts/{id}/deactivate", post(accounts::deactivate))
        .route("/accounts/{id}/invitees", get(accounts::list_bound_invitees))
        .route("/accounts/{id}/team", get(accounts::team_members))
        .route("/accounts/{id}/earnings", get(accounts::earnings_summary))
        .route("/accounts/{id}/commissions", get(commissions::history))
        .route("/accounts/{id}/commissions/total", get(commissions::total))
        .route("/accounts/{id}/commissions/feed", get(commissions::feed))
        .route("/accounts/{id}/task-earnings", get(commissions::task_earnings))
        .route("/accounts/{id}/withdrawals", get(withdrawals::list_for_user))
        .route("/invitations", post(accounts::bind))
        .route("/tasks/settle", post(commissions::settle_task))
        .route("/withdrawals", post(withdrawals::request_withdrawal))
        .route("/withdrawals/pending", get(withdrawals::list_pending))
        .route("/withdrawals/{id}", get(withdrawals::get_withdrawal))
        .route("/withdrawals/{id}/approve", post(withdrawals::approve))
        .route("/withdrawals/{id}/reject", post(withdrawals::reject))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(state: AppState, listen: &str) -> Result<(), anyhow::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_client_statuses() {
        assert_eq!(
            status_for(&ServiceError::NotFound("Account", "x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ServiceError::AlreadyProcessed("w".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ServiceError::AmountOutOfRange {
                amount: 5,
                min: 1_000,
                max: 100_000
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ServiceError::InsufficientFunds("c".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ServiceError::Overflow("alice".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ServiceError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_body_carries_kind_and_details() {
        let (status, Json(body)) = error_reply(ServiceError::SelfInvite("alice".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "self_invite");
        assert_eq!(body["details"], "Account cannot invite itself: alice");
    }
}
