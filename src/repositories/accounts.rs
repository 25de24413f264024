use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::PgPool;

use crate::{models::accounts::Account, utils};

#[async_trait]
pub trait AccountRepository: Send + Sync + 'static {
    /// Returns `false` when the user id or the invite code is already taken.
    async fn insert_account(&self, account: &Account) -> Result<bool, anyhow::Error>;

    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, anyhow::Error>;

    async fn get_account_by_invite_code(
        &self,
        invite_code: &str,
    ) -> Result<Option<Account>, anyhow::Error>;

    /// Applies both deltas in one step. Returns `None` if the account is missing
    /// or either balance would drop below zero, leaving the row untouched.
    async fn adjust_balances(
        &self,
        user_id: &str,
        available_delta: i64,
        frozen_delta: i64,
    ) -> Result<Option<Account>, anyhow::Error>;

    async fn set_active(
        &self,
        user_id: &str,
        active: bool,
    ) -> Result<Option<Account>, anyhow::Error>;

    /// Sets the referrer if none is recorded yet. Returns `None` if the account
    /// is missing or already has a different referrer.
    async fn set_referrer(
        &self,
        user_id: &str,
        referrer_id: &str,
    ) -> Result<Option<Account>, anyhow::Error>;
}

#[derive(Clone)]
pub struct PgAccountRepository {
    conn: PgPool,
}

impl PgAccountRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn insert_account(&self, account: &Account) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
                INSERT INTO accounts
                (user_id, available_in_cents, frozen_in_cents, invite_code, referrer_id, active, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&account.user_id)
        .bind(account.available_in_cents)
        .bind(account.frozen_in_cents)
        .bind(&account.invite_code)
        .bind(&account.referrer_id)
        .bind(account.active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, anyhow::Error> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(account)
    }

    async fn get_account_by_invite_code(
        &self,
        invite_code: &str,
    ) -> Result<Option<Account>, anyhow::Error> {
        let account =
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE invite_code = $1")
                .bind(invite_code)
                .fetch_optional(&self.conn)
                .await?;

        Ok(account)
    }

    async fn adjust_balances(
        &self,
        user_id: &str,
        available_delta: i64,
        frozen_delta: i64,
    ) -> Result<Option<Account>, anyhow::Error> {
        let account = sqlx::query_as::<_, Account>(
            r#"
                UPDATE accounts
                SET available_in_cents = available_in_cents + $2,
                    frozen_in_cents = frozen_in_cents + $3,
                    updated_at = $4
                WHERE user_id = $1
                  AND available_in_cents + $2 >= 0
                  AND frozen_in_cents + $3 >= 0
                RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(available_delta)
        .bind(frozen_delta)
        .bind(utils::now())
        .fetch_optional(&self.conn)
        .await?;

        Ok(account)
    }

    async fn set_active(
        &self,
        user_id: &str,
        active: bool,
    ) -> Result<Option<Account>, anyhow::Error> {
        let account = sqlx::query_as::<_, Account>(
            "UPDATE accounts SET active = $2, updated_at = $3 WHERE user_id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(active)
        .bind(utils::now())
        .fetch_optional(&self.conn)
        .await?;

        Ok(account)
    }

    async fn set_referrer(
        &self,
        user_id: &str,
        referrer_id: &str,
    ) -> Result<Option<Account>, anyhow::Error> {
        let account = sqlx::query_as::<_, Account>(
            r#"
                UPDATE accounts SET referrer_id = $2, updated_at = $3
                WHERE user_id = $1 AND (referrer_id IS NULL OR referrer_id = $2)
                RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(referrer_id)
        .bind(utils::now())
        .fetch_optional(&self.conn)
        .await?;

        Ok(account)
    }
}

#[derive(Clone, Default)]
pub struct MemoryAccountRepository {
    accounts: Arc<DashMap<String, Account>>,
    invite_codes: Arc<DashMap<String, String>>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn insert_account(&self, account: &Account) -> Result<bool, anyhow::Error> {
        // Lock order is always accounts then invite_codes.
        match self.accounts.entry(account.user_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => match self.invite_codes.entry(account.invite_code.clone()) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(code) => {
                    code.insert(account.user_id.clone());
                    slot.insert(account.clone());
                    Ok(true)
                }
            },
        }
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, anyhow::Error> {
        Ok(self.accounts.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn get_account_by_invite_code(
        &self,
        invite_code: &str,
    ) -> Result<Option<Account>, anyhow::Error> {
        let user_id = match self.invite_codes.get(invite_code) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        self.get_account(&user_id).await
    }

    async fn adjust_balances(
        &self,
        user_id: &str,
        available_delta: i64,
        frozen_delta: i64,
    ) -> Result<Option<Account>, anyhow::Error> {
        let Some(mut account) = self.accounts.get_mut(user_id) else {
            return Ok(None);
        };

        let available = account.available_in_cents.checked_add(available_delta);
        let frozen = account.frozen_in_cents.checked_add(frozen_delta);
        match (available, frozen) {
            (Some(available), Some(frozen)) if available >= 0 && frozen >= 0 => {
                account.available_in_cents = available;
                account.frozen_in_cents = frozen;
                account.updated_at = utils::now();
                Ok(Some(account.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_active(
        &self,
        user_id: &str,
        active: bool,
    ) -> Result<Option<Account>, anyhow::Error> {
        Ok(self.accounts.get_mut(user_id).map(|mut account| {
            account.active = active;
            account.updated_at = utils::now();
            account.clone()
        }))
    }

    async fn set_referrer(
        &self,
        user_id: &str,
        referrer_id: &str,
    ) -> Result<Option<Account>, anyhow::Error> {
        let Some(mut account) = self.accounts.get_mut(user_id) else {
            return Ok(None);
        };

        match account.referrer_id.as_deref() {
            Some(existing) if existing != referrer_id => Ok(None),
            _ => {
                account.referrer_id = Some(referrer_id.to_string());
                account.updated_at = utils::now();
                Ok(Some(account.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_refuses_duplicate_user_and_code() {
        let repository = MemoryAccountRepository::new();
        let alice = Account::new("alice", "CM0000A".to_string(), None);
        assert!(repository.insert_account(&alice).await.unwrap());
        assert!(!repository.insert_account(&alice).await.unwrap());

        let same_code = Account::new("bob", "CM0000A".to_string(), None);
        assert!(!repository.insert_account(&same_code).await.unwrap());
        assert!(repository.get_account("bob").await.unwrap().is_none());

        let found = repository
            .get_account_by_invite_code("CM0000A")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, "alice");
    }

    #[tokio::test]
    async fn adjust_never_goes_negative() {
        let repository = MemoryAccountRepository::new();
        let account = Account::new("carol", "CM0000C".to_string(), None);
        repository.insert_account(&account).await.unwrap();

        let credited = repository.adjust_balances("carol", 800, 0).await.unwrap();
        assert_eq!(credited.unwrap().available_in_cents, 800);

        assert!(repository
            .adjust_balances("carol", -1_000, 0)
            .await
            .unwrap()
            .is_none());
        assert!(repository
            .adjust_balances("carol", 0, -1)
            .await
            .unwrap()
            .is_none());

        let frozen = repository
            .adjust_balances("carol", -300, 300)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frozen.available_in_cents, 500);
        assert_eq!(frozen.frozen_in_cents, 300);
    }

    #[tokio::test]
    async fn adjust_on_missing_account_is_refused() {
        let repository = MemoryAccountRepository::new();
        assert!(repository
            .adjust_balances("ghost", 100, 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn referrer_is_set_once() {
        let repository = MemoryAccountRepository::new();
        let bob = Account::new("bob", "CM0000B".to_string(), None);
        repository.insert_account(&bob).await.unwrap();

        let set = repository.set_referrer("bob", "alice").await.unwrap().unwrap();
        assert_eq!(set.referrer_id.as_deref(), Some("alice"));
        assert!(repository.set_referrer("bob", "alice").await.unwrap().is_some());
        assert!(repository.set_referrer("bob", "carol").await.unwrap().is_none());
        assert!(repository.set_referrer("ghost", "alice").await.unwrap().is_none());

        let stored = repository.get_account("bob").await.unwrap().unwrap();
        assert_eq!(stored.referrer_id.as_deref(), Some("alice"));
    }
}
