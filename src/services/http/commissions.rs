use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{dispatch, reply, AppState};
use crate::{
    models::commissions::{CommissionFilter, SettleTask},
    services::{commissions::CommissionRequest, earnings::EarningsRequest},
};

#[derive(Debug, Default, Deserialize)]
pub struct TotalQuery {
    since: Option<chrono::NaiveDateTime>,
}

pub async fn history(
    State(state): State<AppState>,
    Path(inviter_id): Path<String>,
    Query(filter): Query<CommissionFilter>,
) -> impl IntoResponse {
    let history = dispatch(&state.commission_channel, |response| {
        CommissionRequest::GetHistory {
            inviter_id,
            filter,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, history)
}

pub async fn total(
    State(state): State<AppState>,
    Path(inviter_id): Path<String>,
    Query(query): Query<TotalQuery>,
) -> impl IntoResponse {
    let total = dispatch(&state.commission_channel, |response| {
        CommissionRequest::GetTotal {
            inviter_id: inviter_id.clone(),
            since: query.since,
            response,
        }
    })
    .await
    .map(|total_in_cents| {
        json!({
            "inviter_id": inviter_id,
            "total_in_cents": total_in_cents
        })
    });

    reply(StatusCode::OK, total)
}

pub async fn feed(
    State(state): State<AppState>,
    Path(inviter_id): Path<String>,
) -> impl IntoResponse {
    let feed = dispatch(&state.earnings_channel, |response| EarningsRequest::GetFeed {
        inviter_id,
        response,
    })
    .await;

    reply(StatusCode::OK, feed)
}

pub async fn settle_task(
    State(state): State<AppState>,
    Json(payload): Json<SettleTask>,
) -> impl IntoResponse {
    let settlement = dispatch(&state.commission_channel, |response| {
        CommissionRequest::SettleTask {
            user_id: payload.user_id,
            task_id: payload.task_id,
            task_name: payload.task_name,
            earning_in_cents: payload.earning_in_cents,
            response,
        }
    })
    .await;

    reply(StatusCode::CREATED, settlement)
}

pub async fn task_earnings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let earnings = dispatch(&state.commission_channel, |response| {
        CommissionRequest::GetTaskEarnings { user_id, response }
    })
    .await;

    reply(StatusCode::OK, earnings)
}
