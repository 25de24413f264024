use serde::{Deserialize, Serialize};

use super::accounts::Account;
use crate::utils;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "invitation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Bound,
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: String,
    pub inviter_id: String,
    pub invitee_id: String,
    pub status: InvitationStatus,
    pub created_at: chrono::NaiveDateTime,
    pub bound_at: Option<chrono::NaiveDateTime>,
}

impl Invitation {
    pub fn pending(inviter_id: &str, invitee_id: &str) -> Self {
        Invitation {
            id: utils::new_id(),
            inviter_id: inviter_id.to_string(),
            invitee_id: invitee_id.to_string(),
            status: InvitationStatus::Pending,
            created_at: utils::now(),
            bound_at: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.status == InvitationStatus::Bound
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "reward_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RewardType {
    Register,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "reward_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Pending,
    Completed,
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct InviteReward {
    pub id: String,
    pub invitation_id: String,
    pub reward_type: RewardType,
    pub amount_in_cents: i64,
    pub status: RewardStatus,
    pub issued_at: Option<chrono::NaiveDateTime>,
}

impl InviteReward {
    pub fn register(invitation_id: &str, amount_in_cents: i64) -> Self {
        InviteReward {
            id: utils::new_id(),
            invitation_id: invitation_id.to_string(),
            reward_type: RewardType::Register,
            amount_in_cents,
            status: RewardStatus::Pending,
            issued_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RewardStatus::Completed
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewBinding {
    pub inviter_id: String,
    pub invitee_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    pub account: Account,
    pub invitation: Option<Invitation>,
}
