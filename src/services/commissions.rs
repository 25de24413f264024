use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{accounts::AccountStore, RequestHandler, Service, ServiceError};
use crate::{
    models::commissions::{CommissionFilter, CommissionRecord, TaskEarning, TaskSettlement},
    repositories::{commissions::CommissionRepository, invitations::InvitationRepository},
    utils,
};

pub enum CommissionRequest {
    SettleTask {
        user_id: String,
        task_id: String,
        task_name: String,
        earning_in_cents: i64,
        response: oneshot::Sender<Result<TaskSettlement, ServiceError>>,
    },
    GetHistory {
        inviter_id: String,
        filter: CommissionFilter,
        response: oneshot::Sender<Result<Vec<CommissionRecord>, ServiceError>>,
    },
    GetTotal {
        inviter_id: String,
        since: Option<chrono::NaiveDateTime>,
        response: oneshot::Sender<Result<i64, ServiceError>>,
    },
    GetTaskEarnings {
        user_id: String,
        response: oneshot::Sender<Result<Vec<TaskEarning>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct CommissionLedger {
    accounts: AccountStore,
    invitations: Arc<dyn InvitationRepository>,
    repository: Arc<dyn CommissionRepository>,
    commission_rate_bps: u32,
}

impl CommissionLedger {
    pub fn new(
        accounts: AccountStore,
        invitations: Arc<dyn InvitationRepository>,
        repository: Arc<dyn CommissionRepository>,
        commission_rate_bps: u32,
    ) -> Self {
        CommissionLedger {
            accounts,
            invitations,
            repository,
            commission_rate_bps,
        }
    }

    pub fn commission_for(&self, task_earning_in_cents: i64) -> i64 {
        utils::apply_rate_bps(task_earning_in_cents, self.commission_rate_bps)
    }

    pub async fn record_task_commission(
        &self,
        inviter_id: &str,
        member_id: &str,
        task_id: &str,
        task_earning_in_cents: i64,
    ) -> Result<CommissionRecord, ServiceError> {
        self.append_commission(inviter_id, member_id, task_id, "", task_earning_in_cents)
            .await
    }

    /// Pays a worker for a completed task and, if the worker is bound, their inviter's commission.
    ///
    /// The worker's payout is kept even if the commission leg fails; the failure is
    /// reported in `commission_error`.
    pub async fn settle_task(
        &self,
        user_id: &str,
        task_id: &str,
        task_name: &str,
        earning_in_cents: i64,
    ) -> Result<TaskSettlement, ServiceError> {
        if earning_in_cents <= 0 {
            return Err(ServiceError::InvalidAmount(earning_in_cents));
        }

        let earning = TaskEarning::new(user_id, task_id, task_name, earning_in_cents);
        {
            let guard = self.accounts.lock(user_id).await?;
            self.accounts.check_credit(&guard, earning_in_cents).await?;

            let inserted = self
                .repository
                .insert_task_earning(&earning)
                .await
                .map_err(ServiceError::repository("CommissionLedger"))?;
            if !inserted {
                log::warn!("Task {} already settled for {}", task_id, user_id);
                return Err(ServiceError::DuplicateTask(task_id.to_string()));
            }

            if let Err(e) = self.accounts.credit_with(&guard, earning_in_cents).await {
                log::error!(
                    "Credit for task {} of {} failed, removing earning: {}",
                    task_id,
                    user_id,
                    e
                );
                self.repository
                    .remove_task_earning(&earning)
                    .await
                    .map_err(ServiceError::repository("CommissionLedger"))?;
                return Err(e);
            }
        }
        log::info!(
            "Settled task {} for {}: {} cents",
            task_id,
            user_id,
            earning_in_cents
        );

        let invitation = self
            .invitations
            .get_invitation_by_invitee(user_id)
            .await
            .map_err(ServiceError::repository("CommissionLedger"))?
            .filter(|invitation| invitation.is_bound());

        let mut settlement = TaskSettlement {
            earning,
            commission: None,
            commission_error: None,
        };
        if let Some(invitation) = invitation {
            let recorded = self
                .append_commission(
                    &invitation.inviter_id,
                    user_id,
                    task_id,
                    task_name,
                    earning_in_cents,
                )
                .await;
            match recorded {
                Ok(record) => settlement.commission = Some(record),
                Err(ServiceError::DuplicateTask(_)) => {}
                Err(e) => {
                    log::error!(
                        "Commission for task {} of {} to {} not recorded: {}",
                        task_id,
                        user_id,
                        invitation.inviter_id,
                        e
                    );
                    settlement.commission_error = Some(e.to_string());
                }
            }
        }

        Ok(settlement)
    }

    /// Newest first.
    pub async fn get_commission_history(
        &self,
        inviter_id: &str,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionRecord>, ServiceError> {
        self.repository
            .list_commissions(inviter_id, filter)
            .await
            .map_err(ServiceError::repository("CommissionLedger"))
    }

    pub async fn total_commission(
        &self,
        inviter_id: &str,
        since: Option<chrono::NaiveDateTime>,
    ) -> Result<i64, ServiceError> {
        let records = self
            .get_commission_history(inviter_id, &CommissionFilter::since(since))
            .await?;

        utils::sum_cents(records.iter().map(|record| record.commission_in_cents))
            .ok_or_else(|| ServiceError::Overflow(inviter_id.to_string()))
    }

    /// Oldest first.
    pub async fn task_earnings(&self, user_id: &str) -> Result<Vec<TaskEarning>, ServiceError> {
        self.accounts.get_account(user_id).await?;
        self.repository
            .list_task_earnings(user_id)
            .await
            .map_err(ServiceError::repository("CommissionLedger"))
    }

    async fn append_commission(
        &self,
        inviter_id: &str,
        member_id: &str,
        task_id: &str,
        task_name: &str,
        task_earning_in_cents: i64,
    ) -> Result<CommissionRecord, ServiceError> {
        if task_earning_in_cents < 0 {
            return Err(ServiceError::InvalidAmount(task_earning_in_cents));
        }

        let bound = self
            .invitations
            .get_invitation_by_invitee(member_id)
            .await
            .map_err(ServiceError::repository("CommissionLedger"))?
            .is_some_and(|invitation| invitation.is_bound() && invitation.inviter_id == inviter_id);
        if !bound {
            log::warn!("Refused commission for {} -> {}: not bound", inviter_id, member_id);
            return Err(ServiceError::NotBound {
                inviter: inviter_id.to_string(),
                member: member_id.to_string(),
            });
        }

        let commission_in_cents = self.commission_for(task_earning_in_cents);
        let record = CommissionRecord::task(
            inviter_id,
            member_id,
            task_id,
            task_name,
            task_earning_in_cents,
            commission_in_cents,
        );

        let guard = self.accounts.lock(inviter_id).await?;
        if commission_in_cents > 0 {
            self.accounts.check_credit(&guard, commission_in_cents).await?;
        }

        let inserted = self
            .repository
            .insert_commission(&record)
            .await
            .map_err(ServiceError::repository("CommissionLedger"))?;
        if !inserted {
            log::warn!("Commission for task {} of {} already recorded", task_id, member_id);
            return Err(ServiceError::DuplicateTask(task_id.to_string()));
        }

        if commission_in_cents > 0 {
            if let Err(e) = self.accounts.credit_with(&guard, commission_in_cents).await {
                log::error!(
                    "Credit of commission {} to {} failed, removing record: {}",
                    record.id,
                    inviter_id,
                    e
                );
                self.repository
                    .remove_commission(&record)
                    .await
                    .map_err(ServiceError::repository("CommissionLedger"))?;
                return Err(e);
            }
        }
        log::info!(
            "Recorded commission of {} cents for {} from {}'s task {}",
            commission_in_cents,
            inviter_id,
            member_id,
            task_id
        );

        Ok(record)
    }
}

#[async_trait]
impl RequestHandler<CommissionRequest> for CommissionLedger {
    async fn handle_request(&self, request: CommissionRequest) {
        match request {
            CommissionRequest::SettleTask {
                user_id,
                task_id,
                task_name,
                earning_in_cents,
                response,
            } => {
                let settlement = self
                    .settle_task(&user_id, &task_id, &task_name, earning_in_cents)
                    .await;
                let _ = response.send(settlement);
            }
            CommissionRequest::GetHistory {
                inviter_id,
                filter,
                response,
            } => {
                let history = self.get_commission_history(&inviter_id, &filter).await;
                let _ = response.send(history);
            }
            CommissionRequest::GetTotal {
                inviter_id,
                since,
                response,
            } => {
                let total = self.total_commission(&inviter_id, since).await;
                let _ = response.send(total);
            }
            CommissionRequest::GetTaskEarnings { user_id, response } => {
                let earnings = self.task_earnings(&user_id).await;
                let _ = response.send(earnings);
            }
        }
    }
}

pub struct CommissionService;

impl CommissionService {
    pub fn new() -> Self {
        CommissionService {}
    }
}

#[async_trait]
impl Service<CommissionRequest, CommissionLedger> for CommissionService {}
