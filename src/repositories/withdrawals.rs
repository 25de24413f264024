use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;

use crate::models::withdrawals::{Withdrawal, WithdrawalStatus};

#[async_trait]
pub trait WithdrawalRepository: Send + Sync + 'static {
    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), anyhow::Error>;

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, anyhow::Error>;

    /// Moves a pending withdrawal into `status`. Returns `None` if it was not pending.
    async fn transition(
        &self,
        id: &str,
        status: WithdrawalStatus,
        reason: Option<&str>,
        processed_at: chrono::NaiveDateTime,
    ) -> Result<Option<Withdrawal>, anyhow::Error>;

    /// Newest first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>, anyhow::Error>;

    /// Oldest first.
    async fn list_pending(&self) -> Result<Vec<Withdrawal>, anyhow::Error>;
}

#[derive(Clone)]
pub struct PgWithdrawalRepository {
    conn: PgPool,
}

impl PgWithdrawalRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl WithdrawalRepository for PgWithdrawalRepository {
    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
                INSERT INTO withdrawals
                (id, user_id, amount_in_cents, fee_in_cents, method, status, reason, reserved, requested_at, processed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&withdrawal.id)
        .bind(&withdrawal.user_id)
        .bind(withdrawal.amount_in_cents)
        .bind(withdrawal.fee_in_cents)
        .bind(&withdrawal.method)
        .bind(withdrawal.status)
        .bind(&withdrawal.reason)
        .bind(withdrawal.reserved)
        .bind(withdrawal.requested_at)
        .bind(withdrawal.processed_at)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, anyhow::Error> {
        let withdrawal =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(withdrawal)
    }

    async fn transition(
        &self,
        id: &str,
        status: WithdrawalStatus,
        reason: Option<&str>,
        processed_at: chrono::NaiveDateTime,
    ) -> Result<Option<Withdrawal>, anyhow::Error> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
                UPDATE withdrawals SET status = $2, reason = $3, processed_at = $4
                WHERE id = $1 AND status = $5
                RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(reason)
        .bind(processed_at)
        .bind(WithdrawalStatus::Pending)
        .fetch_optional(&self.conn)
        .await?;

        Ok(withdrawal)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE user_id = $1 ORDER BY seq DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(withdrawals)
    }

    async fn list_pending(&self) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE status = $1 ORDER BY seq ASC",
        )
        .bind(WithdrawalStatus::Pending)
        .fetch_all(&self.conn)
        .await?;

        Ok(withdrawals)
    }
}

#[derive(Clone, Default)]
pub struct MemoryWithdrawalRepository {
    withdrawals: Arc<DashMap<String, (u64, Withdrawal)>>,
    by_user: Arc<DashMap<String, Vec<String>>>,
    sequence: Arc<AtomicU64>,
}

impl MemoryWithdrawalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WithdrawalRepository for MemoryWithdrawalRepository {
    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), anyhow::Error> {
        if self.withdrawals.contains_key(&withdrawal.id) {
            anyhow::bail!("Duplicate withdrawal id {}", withdrawal.id);
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.withdrawals
            .insert(withdrawal.id.clone(), (seq, withdrawal.clone()));
        self.by_user
            .entry(withdrawal.user_id.clone())
            .or_default()
            .push(withdrawal.id.clone());
        Ok(())
    }

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, anyhow::Error> {
        Ok(self.withdrawals.get(id).map(|entry| entry.value().1.clone()))
    }

    async fn transition(
        &self,
        id: &str,
        status: WithdrawalStatus,
        reason: Option<&str>,
        processed_at: chrono::NaiveDateTime,
    ) -> Result<Option<Withdrawal>, anyhow::Error> {
        let Some(mut entry) = self.withdrawals.get_mut(id) else {
            return Ok(None);
        };
        let withdrawal = &mut entry.value_mut().1;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Ok(None);
        }

        withdrawal.status = status;
        withdrawal.reason = reason.map(str::to_string);
        withdrawal.processed_at = Some(processed_at);
        Ok(Some(withdrawal.clone()))
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let ids = match self.by_user.get(user_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(Vec::new()),
        };

        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| self.withdrawals.get(id).map(|entry| entry.value().1.clone()))
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let mut pending: Vec<(u64, Withdrawal)> = self
            .withdrawals
            .iter()
            .filter(|entry| entry.value().1.status == WithdrawalStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|(seq, _)| *seq);

        Ok(pending.into_iter().map(|(_, withdrawal)| withdrawal).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    #[tokio::test]
    async fn transition_only_leaves_pending_once() {
        let repository = MemoryWithdrawalRepository::new();
        let withdrawal = Withdrawal::pending("dave", 5_000, 50, "alipay", true);
        repository.insert_withdrawal(&withdrawal).await.unwrap();

        let approved = repository
            .transition(&withdrawal.id, WithdrawalStatus::Approved, None, utils::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, WithdrawalStatus::Approved);
        assert!(approved.processed_at.is_some());

        assert!(repository
            .transition(
                &withdrawal.id,
                WithdrawalStatus::Rejected,
                Some("late"),
                utils::now()
            )
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn pending_queue_is_oldest_first() {
        let repository = MemoryWithdrawalRepository::new();
        let first = Withdrawal::pending("dave", 1_000, 10, "wechat", true);
        let second = Withdrawal::pending("erin", 2_000, 20, "wechat", true);
        let third = Withdrawal::pending("dave", 3_000, 30, "alipay", true);
        for withdrawal in [&first, &second, &third] {
            repository.insert_withdrawal(withdrawal).await.unwrap();
        }
        repository
            .transition(&second.id, WithdrawalStatus::Rejected, None, utils::now())
            .await
            .unwrap();

        let pending: Vec<String> = repository
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(pending, vec![first.id.clone(), third.id.clone()]);

        let mine: Vec<String> = repository
            .list_by_user("dave")
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(mine, vec![third.id, first.id]);
    }
}
