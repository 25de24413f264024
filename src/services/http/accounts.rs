use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{dispatch, reply, AppState};
use crate::{
    models::{accounts::NewAccount, invitations::NewBinding},
    services::{
        accounts::AccountRequest, earnings::EarningsRequest, invitations::InvitationRequest,
    },
};

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewAccount>,
) -> impl IntoResponse {
    let registration = dispatch(&state.invitation_channel, |response| {
        InvitationRequest::Register {
            user_id: payload.user_id,
            invite_code: payload.referral_code,
            response,
        }
    })
    .await;

    reply(StatusCode::CREATED, registration)
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let account = dispatch(&state.account_channel, |response| {
        AccountRequest::GetAccount { user_id, response }
    })
    .await;

    reply(StatusCode::OK, account)
}

pub async fn deactivate(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let account = dispatch(&state.account_channel, |response| {
        AccountRequest::Deactivate { user_id, response }
    })
    .await;

    reply(StatusCode::OK, account)
}

pub async fn bind(
    State(state): State<AppState>,
    Json(payload): Json<NewBinding>,
) -> impl IntoResponse {
    let invitation = dispatch(&state.invitation_channel, |response| {
        InvitationRequest::Bind {
            inviter_id: payload.inviter_id,
            invitee_id: payload.invitee_id,
            response,
        }
    })
    .await;

    reply(StatusCode::CREATED, invitation)
}

pub async fn list_bound_invitees(
    State(state): State<AppState>,
    Path(inviter_id): Path<String>,
) -> impl IntoResponse {
    let invitees = dispatch(&state.invitation_channel, |response| {
        InvitationRequest::ListBoundInvitees {
            inviter_id,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, invitees)
}

pub async fn team_members(
    State(state): State<AppState>,
    Path(inviter_id): Path<String>,
) -> impl IntoResponse {
    let team = dispatch(&state.earnings_channel, |response| EarningsRequest::GetTeam {
        inviter_id,
        response,
    })
    .await;

    reply(StatusCode::OK, team)
}

pub async fn earnings_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let summary = dispatch(&state.earnings_channel, |response| {
        EarningsRequest::GetSummary { user_id, response }
    })
    .await;

    reply(StatusCode::OK, summary)
}
