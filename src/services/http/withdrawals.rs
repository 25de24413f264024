use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{dispatch, reply, AppState};
use crate::{
    models::withdrawals::{NewWithdrawal, RejectWithdrawal},
    services::withdrawals::WithdrawalRequest,
};

pub async fn request_withdrawal(
    State(state): State<AppState>,
    Json(payload): Json<NewWithdrawal>,
) -> impl IntoResponse {
    let withdrawal = dispatch(&state.withdrawal_channel, |response| {
        WithdrawalRequest::RequestWithdrawal {
            user_id: payload.user_id,
            amount_in_cents: payload.amount_in_cents,
            method: payload.method,
            response,
        }
    })
    .await;

    reply(StatusCode::CREATED, withdrawal)
}

pub async fn get_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let withdrawal = dispatch(&state.withdrawal_channel, |response| {
        WithdrawalRequest::GetWithdrawal { id, response }
    })
    .await;

    reply(StatusCode::OK, withdrawal)
}

pub async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let withdrawals = dispatch(&state.withdrawal_channel, |response| {
        WithdrawalRequest::ListByUser { user_id, response }
    })
    .await;

    reply(StatusCode::OK, withdrawals)
}

pub async fn list_pending(State(state): State<AppState>) -> impl IntoResponse {
    let withdrawals = dispatch(&state.withdrawal_channel, |response| {
        WithdrawalRequest::ListPending { response }
    })
    .await;

    reply(StatusCode::OK, withdrawals)
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let withdrawal = dispatch(&state.withdrawal_channel, |response| {
        WithdrawalRequest::Approve { id, response }
    })
    .await;

    reply(StatusCode::OK, withdrawal)
}

/// The body is optional; an empty POST rejects without a reason.
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<RejectWithdrawal>>,
) -> impl IntoResponse {
    let reason = payload.and_then(|Json(payload)| payload.reason);
    let withdrawal = dispatch(&state.withdrawal_channel, |response| {
        WithdrawalRequest::Reject {
            id,
            reason,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, withdrawal)
}
