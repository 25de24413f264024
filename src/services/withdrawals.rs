use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{
    accounts::{AccountGuard, AccountStore},
    RequestHandler, Service, ServiceError,
};
use crate::{
    models::withdrawals::{Withdrawal, WithdrawalStatus},
    repositories::withdrawals::WithdrawalRepository,
    settings::WithdrawalPolicy,
    utils,
};

pub enum WithdrawalRequest {
    RequestWithdrawal {
        user_id: String,
        amount_in_cents: i64,
        method: String,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    Approve {
        id: String,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    Reject {
        id: String,
        reason: Option<String>,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    GetWithdrawal {
        id: String,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    ListByUser {
        user_id: String,
        response: oneshot::Sender<Result<Vec<Withdrawal>, ServiceError>>,
    },
    ListPending {
        response: oneshot::Sender<Result<Vec<Withdrawal>, ServiceError>>,
    },
}

/// Withdrawal lifecycle: pending, then exactly one of approved or rejected.
///
/// Every transition runs under the owner's [`AccountGuard`], so the status check
/// and the balance movement cannot interleave with another transition.
#[derive(Clone)]
pub struct WithdrawalProcessor {
    accounts: AccountStore,
    repository: Arc<dyn WithdrawalRepository>,
    policy: WithdrawalPolicy,
}

impl WithdrawalProcessor {
    pub fn new(
        accounts: AccountStore,
        repository: Arc<dyn WithdrawalRepository>,
        policy: WithdrawalPolicy,
    ) -> Self {
        WithdrawalProcessor {
            accounts,
            repository,
            policy,
        }
    }

    pub fn fee_for(&self, amount_in_cents: i64) -> i64 {
        utils::apply_rate_bps(amount_in_cents, self.policy.fee_bps)
    }

    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        amount_in_cents: i64,
        method: &str,
    ) -> Result<Withdrawal, ServiceError> {
        let (min, max) = (
            self.policy.min_amount_in_cents,
            self.policy.max_amount_in_cents,
        );
        if amount_in_cents < min || amount_in_cents > max {
            return Err(ServiceError::AmountOutOfRange {
                amount: amount_in_cents,
                min,
                max,
            });
        }
        if method.trim().is_empty() {
            return Err(ServiceError::InvalidMethod(method.to_string()));
        }

        let fee_in_cents = self.fee_for(amount_in_cents);
        let reserved = self.policy.reserve_on_request;

        let guard = self.accounts.lock(user_id).await?;
        let account = self.accounts.get_account(user_id).await?;
        if !account.active {
            return Err(ServiceError::AccountInactive(user_id.to_string()));
        }

        let withdrawal = Withdrawal::pending(user_id, amount_in_cents, fee_in_cents, method, reserved);
        if reserved {
            self.accounts
                .freeze(&guard, withdrawal.total_in_cents())
                .await?;
        } else if account.available_in_cents < amount_in_cents {
            log::warn!(
                "Refused withdrawal of {} cents for {}: available {}",
                amount_in_cents,
                user_id,
                account.available_in_cents
            );
            return Err(ServiceError::InsufficientFunds(user_id.to_string()));
        }

        if let Err(e) = self.repository.insert_withdrawal(&withdrawal).await {
            if reserved {
                self.accounts
                    .release(&guard, withdrawal.total_in_cents())
                    .await?;
            }
            return Err(ServiceError::repository("WithdrawalProcessor")(e));
        }

        log::info!(
            "Withdrawal {} requested by {}: amount={}, fee={}, method={}, reserved={}",
            withdrawal.id,
            user_id,
            withdrawal.amount_in_cents,
            withdrawal.fee_in_cents,
            withdrawal.method,
            reserved
        );
        Ok(withdrawal)
    }

    pub async fn approve(&self, id: &str) -> Result<Withdrawal, ServiceError> {
        let (guard, withdrawal) = self.lock_pending(id).await?;
        let total = withdrawal.total_in_cents();

        if withdrawal.reserved {
            self.accounts.settle(&guard, total).await?;
        } else {
            // Balance may have moved since the request; failing here leaves it pending.
            self.accounts.adjust(&guard, -total, 0).await?;
        }

        let transitioned = self
            .repository
            .transition(id, WithdrawalStatus::Approved, None, utils::now())
            .await;
        let approved = match transitioned {
            Ok(Some(approved)) => approved,
            Ok(None) => {
                self.restore_after_approval(&guard, &withdrawal).await?;
                return Err(ServiceError::AlreadyProcessed(id.to_string()));
            }
            Err(e) => {
                self.restore_after_approval(&guard, &withdrawal).await?;
                return Err(ServiceError::repository("WithdrawalProcessor")(e));
            }
        };

        log::info!(
            "Approved withdrawal {} for {}: debited {} cents",
            id,
            approved.user_id,
            total
        );
        Ok(approved)
    }

    pub async fn reject(&self, id: &str, reason: Option<&str>) -> Result<Withdrawal, ServiceError> {
        let (guard, withdrawal) = self.lock_pending(id).await?;

        let rejected = self
            .repository
            .transition(id, WithdrawalStatus::Rejected, reason, utils::now())
            .await
            .map_err(ServiceError::repository("WithdrawalProcessor"))?
            .ok_or_else(|| ServiceError::AlreadyProcessed(id.to_string()))?;

        if rejected.reserved {
            self.accounts
                .release(&guard, withdrawal.total_in_cents())
                .await?;
        }

        log::info!(
            "Rejected withdrawal {} for {}: reason={:?}",
            id,
            rejected.user_id,
            rejected.reason
        );
        Ok(rejected)
    }

    pub async fn get_withdrawal(&self, id: &str) -> Result<Withdrawal, ServiceError> {
        self.repository
            .get_withdrawal(id)
            .await
            .map_err(ServiceError::repository("WithdrawalProcessor"))?
            .ok_or_else(|| ServiceError::NotFound("Withdrawal", id.to_string()))
    }

    pub async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>, ServiceError> {
        self.repository
            .list_by_user(user_id)
            .await
            .map_err(ServiceError::repository("WithdrawalProcessor"))
    }

    pub async fn list_pending(&self) -> Result<Vec<Withdrawal>, ServiceError> {
        self.repository
            .list_pending()
            .await
            .map_err(ServiceError::repository("WithdrawalProcessor"))
    }

    /// Takes the owner's guard and re-reads the withdrawal under it.
    async fn lock_pending(&self, id: &str) -> Result<(AccountGuard, Withdrawal), ServiceError> {
        let user_id = self.get_withdrawal(id).await?.user_id;
        let guard = self.accounts.lock(&user_id).await?;

        let withdrawal = self.get_withdrawal(id).await?;
        if withdrawal.status.is_terminal() {
            log::warn!(
                "Refused transition of withdrawal {}: already {:?}",
                id,
                withdrawal.status
            );
            return Err(ServiceError::AlreadyProcessed(id.to_string()));
        }

        Ok((guard, withdrawal))
    }

    async fn restore_after_approval(
        &self,
        guard: &AccountGuard,
        withdrawal: &Withdrawal,
    ) -> Result<(), ServiceError> {
        let total = withdrawal.total_in_cents();
        if withdrawal.reserved {
            self.accounts.adjust(guard, 0, total).await?;
        } else {
            self.accounts.adjust(guard, total, 0).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl RequestHandler<WithdrawalRequest> for WithdrawalProcessor {
    async fn handle_request(&self, request: WithdrawalRequest) {
        match request {
            WithdrawalRequest::RequestWithdrawal {
                user_id,
                amount_in_cents,
                method,
                response,
            } => {
                let withdrawal = self
                    .request_withdrawal(&user_id, amount_in_cents, &method)
                    .await;
                let _ = response.send(withdrawal);
            }
            WithdrawalRequest::Approve { id, response } => {
                let withdrawal = self.approve(&id).await;
                let _ = response.send(withdrawal);
            }
            WithdrawalRequest::Reject {
                id,
                reason,
                response,
            } => {
                let withdrawal = self.reject(&id, reason.as_deref()).await;
                let _ = response.send(withdrawal);
            }
            WithdrawalRequest::GetWithdrawal { id, response } => {
                let withdrawal = self.get_withdrawal(&id).await;
                let _ = response.send(withdrawal);
            }
            WithdrawalRequest::ListByUser { user_id, response } => {
                let withdrawals = self.list_withdrawals(&user_id).await;
                let _ = response.send(withdrawals);
            }
            WithdrawalRequest::ListPending { response } => {
                let withdrawals = self.list_pending().await;
                let _ = response.send(withdrawals);
            }
        }
    }
}

pub struct WithdrawalService;

impl WithdrawalService {
    pub fn new() -> Self {
        WithdrawalService {}
    }
}

#[async_trait]
impl Service<WithdrawalRequest, WithdrawalProcessor> for WithdrawalService {}
