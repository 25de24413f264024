use serde::{Deserialize, Serialize};

use crate::utils;

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Account {
    pub user_id: String,
    pub available_in_cents: i64,
    pub frozen_in_cents: i64,
    pub invite_code: String,
    pub referrer_id: Option<String>,
    pub active: bool,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

impl Account {
    pub fn new(user_id: &str, invite_code: String, referrer_id: Option<String>) -> Self {
        let now = utils::now();

        Account {
            user_id: user_id.to_string(),
            available_in_cents: 0,
            frozen_in_cents: 0,
            invite_code,
            referrer_id,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Available plus frozen. `None` if the sum does not fit.
    pub fn total_in_cents(&self) -> Option<i64> {
        self.available_in_cents.checked_add(self.frozen_in_cents)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewAccount {
    pub user_id: String,
    pub referral_code: Option<String>,
}
