use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use sqlx::PgPool;

use crate::models::commissions::{CommissionFilter, CommissionRecord, TaskEarning};

#[async_trait]
pub trait CommissionRepository: Send + Sync + 'static {
    /// Returns `false` when a record for the same member and task exists.
    async fn insert_commission(&self, record: &CommissionRecord) -> Result<bool, anyhow::Error>;

    /// Matching records for `inviter_id`, newest first.
    async fn list_commissions(
        &self,
        inviter_id: &str,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionRecord>, anyhow::Error>;

    /// Returns `false` when the user already has an earning for the task.
    async fn insert_task_earning(&self, earning: &TaskEarning) -> Result<bool, anyhow::Error>;

    /// Earnings for `user_id`, oldest first.
    async fn list_task_earnings(&self, user_id: &str) -> Result<Vec<TaskEarning>, anyhow::Error>;

    /// Drops a record whose credit could not be applied, freeing its (member, task) slot.
    async fn remove_commission(&self, record: &CommissionRecord) -> Result<(), anyhow::Error>;

    /// Drops an earning whose credit could not be applied, freeing its (user, task) slot.
    async fn remove_task_earning(&self, earning: &TaskEarning) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct PgCommissionRepository {
    conn: PgPool,
}

impl PgCommissionRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CommissionRepository for PgCommissionRepository {
    async fn insert_commission(&self, record: &CommissionRecord) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
                INSERT INTO commission_records
                (id, inviter_id, member_id, task_id, task_name, task_earning_in_cents, commission_in_cents, date, kind)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (member_id, task_id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.inviter_id)
        .bind(&record.member_id)
        .bind(&record.task_id)
        .bind(&record.task_name)
        .bind(record.task_earning_in_cents)
        .bind(record.commission_in_cents)
        .bind(record.date)
        .bind(record.kind)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_commissions(
        &self,
        inviter_id: &str,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionRecord>, anyhow::Error> {
        let records = sqlx::query_as::<_, CommissionRecord>(
            r#"
                SELECT * FROM commission_records
                WHERE inviter_id = $1
                  AND ($2::timestamp IS NULL OR date >= $2)
                  AND ($3::timestamp IS NULL OR date <= $3)
                  AND ($4::commission_kind IS NULL OR kind = $4)
                ORDER BY seq DESC
            "#,
        )
        .bind(inviter_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.kind)
        .fetch_all(&self.conn)
        .await?;

        Ok(records)
    }

    async fn insert_task_earning(&self, earning: &TaskEarning) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
                INSERT INTO task_earnings (id, user_id, task_id, task_name, amount_in_cents, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, task_id) DO NOTHING
            "#,
        )
        .bind(&earning.id)
        .bind(&earning.user_id)
        .bind(&earning.task_id)
        .bind(&earning.task_name)
        .bind(earning.amount_in_cents)
        .bind(earning.created_at)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_task_earnings(&self, user_id: &str) -> Result<Vec<TaskEarning>, anyhow::Error> {
        let earnings = sqlx::query_as::<_, TaskEarning>(
            "SELECT * FROM task_earnings WHERE user_id = $1 ORDER BY seq ASC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(earnings)
    }

    async fn remove_commission(&self, record: &CommissionRecord) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM commission_records WHERE id = $1")
            .bind(&record.id)
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    async fn remove_task_earning(&self, earning: &TaskEarning) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM task_earnings WHERE id = $1")
            .bind(&earning.id)
            .execute(&self.conn)
            .await?;

        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryCommissionRepository {
    records: Arc<DashMap<String, Vec<CommissionRecord>>>,
    settled_commissions: Arc<DashSet<(String, String)>>,
    earnings: Arc<DashMap<String, Vec<TaskEarning>>>,
    settled_earnings: Arc<DashSet<(String, String)>>,
}

impl MemoryCommissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommissionRepository for MemoryCommissionRepository {
    async fn insert_commission(&self, record: &CommissionRecord) -> Result<bool, anyhow::Error> {
        let key = (record.member_id.clone(), record.task_id.clone());
        if !self.settled_commissions.insert(key) {
            return Ok(false);
        }

        self.records
            .entry(record.inviter_id.clone())
            .or_default()
            .push(record.clone());
        Ok(true)
    }

    async fn list_commissions(
        &self,
        inviter_id: &str,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionRecord>, anyhow::Error> {
        Ok(self
            .records
            .get(inviter_id)
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .rev()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_task_earning(&self, earning: &TaskEarning) -> Result<bool, anyhow::Error> {
        let key = (earning.user_id.clone(), earning.task_id.clone());
        if !self.settled_earnings.insert(key) {
            return Ok(false);
        }

        self.earnings
            .entry(earning.user_id.clone())
            .or_default()
            .push(earning.clone());
        Ok(true)
    }

    async fn list_task_earnings(&self, user_id: &str) -> Result<Vec<TaskEarning>, anyhow::Error> {
        Ok(self
            .earnings
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn remove_commission(&self, record: &CommissionRecord) -> Result<(), anyhow::Error> {
        if let Some(mut records) = self.records.get_mut(&record.inviter_id) {
            records.retain(|stored| stored.id != record.id);
        }
        self.settled_commissions
            .remove(&(record.member_id.clone(), record.task_id.clone()));

        Ok(())
    }

    async fn remove_task_earning(&self, earning: &TaskEarning) -> Result<(), anyhow::Error> {
        if let Some(mut earnings) = self.earnings.get_mut(&earning.user_id) {
            earnings.retain(|stored| stored.id != earning.id);
        }
        self.settled_earnings
            .remove(&(earning.user_id.clone(), earning.task_id.clone()));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::commissions::CommissionKind;

    #[tokio::test]
    async fn commissions_are_unique_per_member_task() {
        let repository = MemoryCommissionRepository::new();
        let first = CommissionRecord::task("alice", "bob", "t1", "review", 350, 18);
        let replay = CommissionRecord::task("alice", "bob", "t1", "review", 350, 18);

        assert!(repository.insert_commission(&first).await.unwrap());
        assert!(!repository.insert_commission(&replay).await.unwrap());

        let records = repository
            .list_commissions("alice", &CommissionFilter::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filtered() {
        let repository = MemoryCommissionRepository::new();
        for task_id in ["t1", "t2", "t3"] {
            let record = CommissionRecord::task("alice", "bob", task_id, "review", 100, 5);
            repository.insert_commission(&record).await.unwrap();
        }

        let records = repository
            .list_commissions("alice", &CommissionFilter::default())
            .await
            .unwrap();
        let order: Vec<&str> = records.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(order, vec!["t3", "t2", "t1"]);

        let registers = repository
            .list_commissions(
                "alice",
                &CommissionFilter {
                    kind: Some(CommissionKind::Register),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(registers.is_empty());
    }

    #[tokio::test]
    async fn earnings_are_unique_per_user_task() {
        let repository = MemoryCommissionRepository::new();
        let earning = TaskEarning::new("bob", "t1", "review", 350);

        assert!(repository.insert_task_earning(&earning).await.unwrap());
        assert!(!repository
            .insert_task_earning(&TaskEarning::new("bob", "t1", "review", 350))
            .await
            .unwrap());
        assert!(repository
            .insert_task_earning(&TaskEarning::new("carol", "t1", "review", 350))
            .await
            .unwrap());
        assert_eq!(repository.list_task_earnings("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removed_rows_free_their_slot() {
        let repository = MemoryCommissionRepository::new();
        let record = CommissionRecord::task("alice", "bob", "t1", "review", 350, 18);
        let earning = TaskEarning::new("bob", "t1", "review", 350);
        repository.insert_commission(&record).await.unwrap();
        repository.insert_task_earning(&earning).await.unwrap();

        repository.remove_commission(&record).await.unwrap();
        repository.remove_task_earning(&earning).await.unwrap();
        assert!(repository
            .list_commissions("alice", &CommissionFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(repository.list_task_earnings("bob").await.unwrap().is_empty());

        let retry = CommissionRecord::task("alice", "bob", "t1", "review", 350, 18);
        assert!(repository.insert_commission(&retry).await.unwrap());
        assert!(repository
            .insert_task_earning(&TaskEarning::new("bob", "t1", "review", 350))
            .await
            .unwrap());
    }
}
