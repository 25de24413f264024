use serde::{Deserialize, Serialize};

use crate::utils;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: String,
    pub user_id: String,
    pub amount_in_cents: i64,
    pub fee_in_cents: i64,
    pub method: String,
    pub status: WithdrawalStatus,
    pub reason: Option<String>,
    /// Whether amount plus fee was frozen when the request was made.
    pub reserved: bool,
    pub requested_at: chrono::NaiveDateTime,
    pub processed_at: Option<chrono::NaiveDateTime>,
}

impl Withdrawal {
    pub fn pending(
        user_id: &str,
        amount_in_cents: i64,
        fee_in_cents: i64,
        method: &str,
        reserved: bool,
    ) -> Self {
        Withdrawal {
            id: utils::new_id(),
            user_id: user_id.to_string(),
            amount_in_cents,
            fee_in_cents,
            method: method.trim().to_string(),
            status: WithdrawalStatus::Pending,
            reason: None,
            reserved,
            requested_at: utils::now(),
            processed_at: None,
        }
    }

    pub fn total_in_cents(&self) -> i64 {
        self.amount_in_cents + self.fee_in_cents
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewWithdrawal {
    pub user_id: String,
    pub amount_in_cents: i64,
    pub method: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RejectWithdrawal {
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_open() {
        assert!(!WithdrawalStatus::Pending.is_terminal());
        assert!(WithdrawalStatus::Approved.is_terminal());
        assert!(WithdrawalStatus::Rejected.is_terminal());
    }

    #[test]
    fn total_includes_fee() {
        let withdrawal = Withdrawal::pending("d", 5_000, 50, " alipay ", true);
        assert_eq!(withdrawal.total_in_cents(), 5_050);
        assert_eq!(withdrawal.method, "alipay");
        assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
    }
}
