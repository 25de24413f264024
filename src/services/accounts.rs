use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard};

use super::{RequestHandler, Service, ServiceError};
use crate::{models::accounts::Account, repositories::accounts::AccountRepository, utils};

const INVITE_CODE_ATTEMPTS: usize = 8;

pub enum AccountRequest {
    GetAccount {
        user_id: String,
        response: oneshot::Sender<Result<Account, ServiceError>>,
    },
    Deactivate {
        user_id: String,
        response: oneshot::Sender<Result<Account, ServiceError>>,
    },
}

/// Proof that the holder is the single writer for one account.
pub struct AccountGuard {
    user_id: String,
    _lock: OwnedMutexGuard<()>,
}

impl AccountGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[derive(Clone)]
pub struct AccountStore {
    repository: Arc<dyn AccountRepository>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AccountStore {
    pub fn new(repository: Arc<dyn AccountRepository>) -> Self {
        AccountStore {
            repository,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits for exclusive write access to `user_id`'s balances.
    ///
    /// Accounts are never removed, so one lock entry exists at most per opened account.
    pub async fn lock(&self, user_id: &str) -> Result<AccountGuard, ServiceError> {
        self.get_account(user_id).await?;
        let lock = self.locks.entry(user_id.to_string()).or_default().clone();

        Ok(AccountGuard {
            user_id: user_id.to_string(),
            _lock: lock.lock_owned().await,
        })
    }

    pub async fn open_account(
        &self,
        user_id: &str,
        referrer_id: Option<String>,
    ) -> Result<Account, ServiceError> {
        for _ in 0..INVITE_CODE_ATTEMPTS {
            let account = Account::new(user_id, utils::generate_invite_code(), referrer_id.clone());
            let inserted = self
                .repository
                .insert_account(&account)
                .await
                .map_err(ServiceError::repository("AccountStore"))?;
            if inserted {
                log::info!(
                    "Opened account: user_id={}, invite_code={}, referrer={:?}",
                    account.user_id,
                    account.invite_code,
                    account.referrer_id
                );
                return Ok(account);
            }

            if self.find_account(user_id).await?.is_some() {
                return Err(ServiceError::AccountExists(user_id.to_string()));
            }
            log::debug!("Invite code collision for {}, retrying.", user_id);
        }

        Err(ServiceError::Internal(format!(
            "Could not allocate an invite code for {}.",
            user_id
        )))
    }

    pub async fn get_account(&self, user_id: &str) -> Result<Account, ServiceError> {
        self.find_account(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Account", user_id.to_string()))
    }

    pub async fn find_by_invite_code(&self, invite_code: &str) -> Result<Account, ServiceError> {
        self.repository
            .get_account_by_invite_code(invite_code)
            .await
            .map_err(ServiceError::repository("AccountStore"))?
            .ok_or_else(|| ServiceError::NotFound("Invite code", invite_code.to_string()))
    }

    pub async fn credit(&self, user_id: &str, amount_in_cents: i64) -> Result<Account, ServiceError> {
        if amount_in_cents <= 0 {
            return Err(ServiceError::InvalidAmount(amount_in_cents));
        }

        let guard = self.lock(user_id).await?;
        self.credit_with(&guard, amount_in_cents).await
    }

    pub async fn debit(&self, user_id: &str, amount_in_cents: i64) -> Result<Account, ServiceError> {
        if amount_in_cents <= 0 {
            return Err(ServiceError::InvalidAmount(amount_in_cents));
        }

        let guard = self.lock(user_id).await?;
        self.adjust(&guard, -amount_in_cents, 0).await
    }

    pub async fn deactivate(&self, user_id: &str) -> Result<Account, ServiceError> {
        let _guard = self.lock(user_id).await?;
        let account = self
            .repository
            .set_active(user_id, false)
            .await
            .map_err(ServiceError::repository("AccountStore"))?
            .ok_or_else(|| ServiceError::NotFound("Account", user_id.to_string()))?;

        log::info!("Deactivated account {}", user_id);
        Ok(account)
    }

    /// Records `referrer_id` on an account that has none, or confirms a matching one.
    pub(crate) async fn set_referrer(
        &self,
        user_id: &str,
        referrer_id: &str,
    ) -> Result<Account, ServiceError> {
        let updated = self
            .repository
            .set_referrer(user_id, referrer_id)
            .await
            .map_err(ServiceError::repository("AccountStore"))?;

        match updated {
            Some(account) => Ok(account),
            None => {
                self.get_account(user_id).await?;
                Err(ServiceError::AlreadyBound(user_id.to_string()))
            }
        }
    }

    /// Fails the way `credit_with` would, without moving any money.
    pub(crate) async fn check_credit(
        &self,
        guard: &AccountGuard,
        amount_in_cents: i64,
    ) -> Result<(), ServiceError> {
        if amount_in_cents <= 0 {
            return Err(ServiceError::InvalidAmount(amount_in_cents));
        }

        let account = self.get_account(guard.user_id()).await?;
        if account.available_in_cents.checked_add(amount_in_cents).is_none() {
            return Err(ServiceError::InvalidAmount(amount_in_cents));
        }

        Ok(())
    }

    pub(crate) async fn credit_with(
        &self,
        guard: &AccountGuard,
        amount_in_cents: i64,
    ) -> Result<Account, ServiceError> {
        if amount_in_cents <= 0 {
            return Err(ServiceError::InvalidAmount(amount_in_cents));
        }

        self.adjust(guard, amount_in_cents, 0).await
    }

    /// Moves funds from available to frozen.
    pub(crate) async fn freeze(
        &self,
        guard: &AccountGuard,
        amount_in_cents: i64,
    ) -> Result<Account, ServiceError> {
        self.adjust(guard, -amount_in_cents, amount_in_cents).await
    }

    /// Moves funds from frozen back to available.
    pub(crate) async fn release(
        &self,
        guard: &AccountGuard,
        amount_in_cents: i64,
    ) -> Result<Account, ServiceError> {
        self.adjust(guard, amount_in_cents, -amount_in_cents).await
    }

    /// Removes frozen funds that have left the platform.
    pub(crate) async fn settle(
        &self,
        guard: &AccountGuard,
        amount_in_cents: i64,
    ) -> Result<Account, ServiceError> {
        self.adjust(guard, 0, -amount_in_cents).await
    }

    pub(crate) async fn adjust(
        &self,
        guard: &AccountGuard,
        available_delta: i64,
        frozen_delta: i64,
    ) -> Result<Account, ServiceError> {
        let updated = self
            .repository
            .adjust_balances(guard.user_id(), available_delta, frozen_delta)
            .await
            .map_err(ServiceError::repository("AccountStore"))?;

        match updated {
            Some(account) => {
                log::debug!(
                    "Adjusted {}: available {:+}, frozen {:+} -> available={}, frozen={}",
                    account.user_id,
                    available_delta,
                    frozen_delta,
                    account.available_in_cents,
                    account.frozen_in_cents
                );
                Ok(account)
            }
            None => {
                let account = self.get_account(guard.user_id()).await?;
                log::warn!(
                    "Refused balance change on {}: available {:+}, frozen {:+}",
                    guard.user_id(),
                    available_delta,
                    frozen_delta
                );

                if account.available_in_cents.checked_add(available_delta).is_none() {
                    return Err(ServiceError::InvalidAmount(available_delta));
                }
                if account.frozen_in_cents.checked_add(frozen_delta).is_none() {
                    return Err(ServiceError::InvalidAmount(frozen_delta));
                }
                Err(ServiceError::InsufficientFunds(guard.user_id().to_string()))
            }
        }
    }

    async fn find_account(&self, user_id: &str) -> Result<Option<Account>, ServiceError> {
        self.repository
            .get_account(user_id)
            .await
            .map_err(ServiceError::repository("AccountStore"))
    }
}

#[async_trait]
impl RequestHandler<AccountRequest> for AccountStore {
    async fn handle_request(&self, request: AccountRequest) {
        match request {
            AccountRequest::GetAccount { user_id, response } => {
                let account = self.get_account(&user_id).await;
                let _ = response.send(account);
            }
            AccountRequest::Deactivate { user_id, response } => {
                let account = self.deactivate(&user_id).await;
                let _ = response.send(account);
            }
        }
    }
}

pub struct AccountService;

impl AccountService {
    pub fn new() -> Self {
        AccountService {}
    }
}

#[async_trait]
impl Service<AccountRequest, AccountStore> for AccountService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::accounts::MemoryAccountRepository;

    fn store() -> AccountStore {
        AccountStore::new(Arc::new(MemoryAccountRepository::new()))
    }

    #[tokio::test]
    async fn open_account_rejects_duplicates() {
        let store = store();
        let account = store.open_account("alice", None).await.unwrap();
        assert_eq!(account.available_in_cents, 0);
        assert!(account.active);

        let err = store.open_account("alice", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::AccountExists(_)));

        let by_code = store.find_by_invite_code(&account.invite_code).await.unwrap();
        assert_eq!(by_code.user_id, "alice");
    }

    #[tokio::test]
    async fn credit_requires_a_positive_amount() {
        let store = store();
        store.open_account("alice", None).await.unwrap();

        assert!(matches!(
            store.credit("alice", 0).await.unwrap_err(),
            ServiceError::InvalidAmount(0)
        ));
        assert!(matches!(
            store.credit("ghost", 100).await.unwrap_err(),
            ServiceError::NotFound(..)
        ));
        assert_eq!(store.credit("alice", 250).await.unwrap().available_in_cents, 250);
    }

    #[tokio::test]
    async fn debit_refuses_overdraft() {
        let store = store();
        store.open_account("carol", None).await.unwrap();
        store.credit("carol", 800).await.unwrap();

        assert!(matches!(
            store.debit("carol", 1_000).await.unwrap_err(),
            ServiceError::InsufficientFunds(_)
        ));
        assert_eq!(store.debit("carol", 300).await.unwrap().available_in_cents, 500);
    }

    #[tokio::test]
    async fn freeze_release_and_settle_move_between_buckets() {
        let store = store();
        store.open_account("dave", None).await.unwrap();
        store.credit("dave", 10_000).await.unwrap();

        let guard = store.lock("dave").await.unwrap();
        let frozen = store.freeze(&guard, 5_050).await.unwrap();
        assert_eq!((frozen.available_in_cents, frozen.frozen_in_cents), (4_950, 5_050));

        let released = store.release(&guard, 1_000).await.unwrap();
        assert_eq!((released.available_in_cents, released.frozen_in_cents), (5_950, 4_050));

        let settled = store.settle(&guard, 4_050).await.unwrap();
        assert_eq!((settled.available_in_cents, settled.frozen_in_cents), (5_950, 0));

        assert!(store.settle(&guard, 1).await.is_err());
    }

    #[tokio::test]
    async fn deactivate_keeps_the_record() {
        let store = store();
        store.open_account("erin", None).await.unwrap();

        let account = store.deactivate("erin").await.unwrap();
        assert!(!account.active);
        assert!(!store.get_account("erin").await.unwrap().active);
    }

    #[tokio::test]
    async fn unknown_ids_leave_no_lock_behind() {
        let store = store();
        store.open_account("alice", None).await.unwrap();

        for n in 0..1_000 {
            let err = store.credit(&format!("ghost-{}", n), 100).await.unwrap_err();
            assert!(matches!(err, ServiceError::NotFound(..)));
        }
        assert!(store.debit("ghost", 100).await.is_err());
        assert!(store.deactivate("ghost").await.is_err());
        assert!(store.lock("ghost").await.is_err());
        assert_eq!(store.locks.len(), 0);

        store.credit("alice", 100).await.unwrap();
        assert_eq!(store.locks.len(), 1);
    }

    #[tokio::test]
    async fn overflowing_credit_is_an_invalid_amount() {
        let store = store();
        store.open_account("frank", None).await.unwrap();
        store.credit("frank", i64::MAX - 10).await.unwrap();

        let guard = store.lock("frank").await.unwrap();
        assert!(matches!(
            store.check_credit(&guard, 11).await.unwrap_err(),
            ServiceError::InvalidAmount(11)
        ));
        assert!(store.check_credit(&guard, 10).await.is_ok());
        drop(guard);

        assert!(matches!(
            store.credit("frank", 11).await.unwrap_err(),
            ServiceError::InvalidAmount(11)
        ));
        assert_eq!(store.get_account("frank").await.unwrap().available_in_cents, i64::MAX - 10);
    }
}
