use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{accounts::AccountStore, RequestHandler, Service, ServiceError};
use crate::{
    models::invitations::{Invitation, InviteReward, Registration, RewardType},
    repositories::invitations::InvitationRepository,
    utils,
};

pub enum InvitationRequest {
    Register {
        user_id: String,
        invite_code: Option<String>,
        response: oneshot::Sender<Result<Registration, ServiceError>>,
    },
    Bind {
        inviter_id: String,
        invitee_id: String,
        response: oneshot::Sender<Result<Invitation, ServiceError>>,
    },
    ListBoundInvitees {
        inviter_id: String,
        response: oneshot::Sender<Result<Vec<Invitation>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct InvitationLedger {
    accounts: AccountStore,
    repository: Arc<dyn InvitationRepository>,
    register_reward_in_cents: i64,
}

impl InvitationLedger {
    pub fn new(
        accounts: AccountStore,
        repository: Arc<dyn InvitationRepository>,
        register_reward_in_cents: i64,
    ) -> Self {
        InvitationLedger {
            accounts,
            repository,
            register_reward_in_cents,
        }
    }

    /// Opens an account for `user_id`, binding it to the owner of `invite_code` if given.
    pub async fn register(
        &self,
        user_id: &str,
        invite_code: Option<&str>,
    ) -> Result<Registration, ServiceError> {
        let invite_code = invite_code.map(str::trim).filter(|code| !code.is_empty());
        let inviter = match invite_code {
            Some(code) => Some(self.accounts.find_by_invite_code(code).await?),
            None => None,
        };

        let referrer_id = inviter.map(|inviter| inviter.user_id);
        let account = self
            .accounts
            .open_account(user_id, referrer_id.clone())
            .await?;

        let invitation = match referrer_id {
            Some(inviter_id) => Some(self.bind(&inviter_id, &account.user_id).await?),
            None => None,
        };

        Ok(Registration {
            account,
            invitation,
        })
    }

    pub async fn bind(&self, inviter_id: &str, invitee_id: &str) -> Result<Invitation, ServiceError> {
        if inviter_id == invitee_id {
            return Err(ServiceError::SelfInvite(inviter_id.to_string()));
        }
        self.accounts.get_account(inviter_id).await?;
        let invitee = self.accounts.get_account(invitee_id).await?;
        if invitee
            .referrer_id
            .as_deref()
            .is_some_and(|referrer| referrer != inviter_id)
        {
            log::warn!(
                "Refused bind {} -> {}: registered with referrer {:?}",
                inviter_id,
                invitee_id,
                invitee.referrer_id
            );
            return Err(ServiceError::AlreadyBound(invitee_id.to_string()));
        }

        let candidate = Invitation::pending(inviter_id, invitee_id);
        let inserted = self
            .repository
            .insert_invitation(&candidate)
            .await
            .map_err(ServiceError::repository("InvitationLedger"))?;

        let invitation = if inserted {
            candidate
        } else {
            let existing = self.invitation_of(invitee_id).await?;
            if existing.is_bound() && existing.inviter_id == inviter_id {
                // Finishes a reward left pending by an interrupted bind; no-op otherwise.
                self.issue_register_reward(&existing).await?;
            }
            if existing.is_bound() || existing.inviter_id != inviter_id {
                log::warn!(
                    "Refused bind {} -> {}: already invited by {}",
                    inviter_id,
                    invitee_id,
                    existing.inviter_id
                );
                return Err(ServiceError::AlreadyBound(invitee_id.to_string()));
            }
            existing
        };

        self.accounts.set_referrer(invitee_id, inviter_id).await?;
        let bound = self
            .repository
            .mark_bound(&invitation.id, utils::now())
            .await
            .map_err(ServiceError::repository("InvitationLedger"))?
            .ok_or_else(|| ServiceError::AlreadyBound(invitee_id.to_string()))?;

        log::info!(
            "Bound invitee {} to inviter {} (invitation {})",
            bound.invitee_id,
            bound.inviter_id,
            bound.id
        );
        self.issue_register_reward(&bound).await?;

        Ok(bound)
    }

    pub async fn list_bound_invitees(&self, inviter_id: &str) -> Result<Vec<Invitation>, ServiceError> {
        let invitations = self
            .repository
            .list_by_inviter(inviter_id)
            .await
            .map_err(ServiceError::repository("InvitationLedger"))?;

        Ok(invitations
            .into_iter()
            .filter(Invitation::is_bound)
            .collect())
    }

    pub async fn reward_for(&self, invitation_id: &str) -> Result<Option<InviteReward>, ServiceError> {
        self.repository
            .get_reward(invitation_id, RewardType::Register)
            .await
            .map_err(ServiceError::repository("InvitationLedger"))
    }

    pub async fn rewards_for_inviter(&self, inviter_id: &str) -> Result<Vec<InviteReward>, ServiceError> {
        self.repository
            .list_rewards_by_inviter(inviter_id)
            .await
            .map_err(ServiceError::repository("InvitationLedger"))
    }

    pub async fn invitation_of(&self, invitee_id: &str) -> Result<Invitation, ServiceError> {
        self.repository
            .get_invitation_by_invitee(invitee_id)
            .await
            .map_err(ServiceError::repository("InvitationLedger"))?
            .ok_or_else(|| ServiceError::NotFound("Invitation", invitee_id.to_string()))
    }

    async fn issue_register_reward(&self, invitation: &Invitation) -> Result<InviteReward, ServiceError> {
        let reward = self
            .repository
            .insert_reward(&InviteReward::register(
                &invitation.id,
                self.register_reward_in_cents,
            ))
            .await
            .map_err(ServiceError::repository("InvitationLedger"))?;
        if reward.is_completed() {
            return Ok(reward);
        }

        let guard = self.accounts.lock(&invitation.inviter_id).await?;
        let amount_in_cents = reward.amount_in_cents;
        if amount_in_cents > 0 {
            self.accounts.check_credit(&guard, amount_in_cents).await?;
        }

        // Completing before crediting means a retry can never pay twice.
        let completed = self
            .repository
            .complete_reward(&reward.id, utils::now())
            .await
            .map_err(ServiceError::repository("InvitationLedger"))?;
        let Some(completed) = completed else {
            return self.reward_for(&invitation.id).await?.ok_or_else(|| {
                ServiceError::Internal(format!("Reward for {} disappeared.", invitation.id))
            });
        };

        if amount_in_cents > 0 {
            if let Err(e) = self.accounts.credit_with(&guard, amount_in_cents).await {
                log::error!(
                    "Credit of register reward {} to {} failed, reopening it: {}",
                    completed.id,
                    invitation.inviter_id,
                    e
                );
                self.repository
                    .reopen_reward(&completed.id)
                    .await
                    .map_err(ServiceError::repository("InvitationLedger"))?;
                return Err(e);
            }
        }
        log::info!(
            "Issued register reward of {} cents to {} for invitation {}",
            amount_in_cents,
            invitation.inviter_id,
            invitation.id
        );

        Ok(completed)
    }
}

#[async_trait]
impl RequestHandler<InvitationRequest> for InvitationLedger {
    async fn handle_request(&self, request: InvitationRequest) {
        match request {
            InvitationRequest::Register {
                user_id,
                invite_code,
                response,
            } => {
                let registration = self.register(&user_id, invite_code.as_deref()).await;
                let _ = response.send(registration);
            }
            InvitationRequest::Bind {
                inviter_id,
                invitee_id,
                response,
            } => {
                let invitation = self.bind(&inviter_id, &invitee_id).await;
                let _ = response.send(invitation);
            }
            InvitationRequest::ListBoundInvitees {
                inviter_id,
                response,
            } => {
                let invitees = self.list_bound_invitees(&inviter_id).await;
                let _ = response.send(invitees);
            }
        }
    }
}

pub struct InvitationService;

impl InvitationService {
    pub fn new() -> Self {
        InvitationService {}
    }
}

#[async_trait]
impl Service<InvitationRequest, InvitationLedger> for InvitationService {}
