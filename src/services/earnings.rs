use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::oneshot;

use super::{
    accounts::AccountStore, commissions::CommissionLedger, invitations::InvitationLedger,
    RequestHandler, Service, ServiceError,
};
use crate::models::{
    commissions::{CommissionFilter, CommissionKind, CommissionRecord},
    earnings::{EarningsSummary, TaskEarningsReport, TeamMember},
};
use crate::utils;

const REGISTER_REWARD_TASK_NAME: &str = "register reward";

pub enum EarningsRequest {
    GetSummary {
        user_id: String,
        response: oneshot::Sender<Result<EarningsSummary, ServiceError>>,
    },
    GetTeam {
        inviter_id: String,
        response: oneshot::Sender<Result<Vec<TeamMember>, ServiceError>>,
    },
    GetFeed {
        inviter_id: String,
        response: oneshot::Sender<Result<Vec<CommissionRecord>, ServiceError>>,
    },
}

/// Read-side views recomputed from the ledgers on every call.
#[derive(Clone)]
pub struct EarningsQuery {
    accounts: AccountStore,
    invitations: InvitationLedger,
    commissions: CommissionLedger,
}

impl EarningsQuery {
    pub fn new(
        accounts: AccountStore,
        invitations: InvitationLedger,
        commissions: CommissionLedger,
    ) -> Self {
        EarningsQuery {
            accounts,
            invitations,
            commissions,
        }
    }

    pub async fn my_earnings_summary(&self, user_id: &str) -> Result<EarningsSummary, ServiceError> {
        self.earnings_summary_on(user_id, utils::now().date()).await
    }

    /// Summary with task periods counted back from `today`.
    pub async fn earnings_summary_on(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<EarningsSummary, ServiceError> {
        let overflow = || ServiceError::Overflow(user_id.to_string());

        let account = self.accounts.get_account(user_id).await?;
        let commission_in_cents = self.commissions.total_commission(user_id, None).await?;
        let rewards = self.invitations.rewards_for_inviter(user_id).await?;
        let register_rewards_in_cents = utils::sum_cents(
            rewards
                .iter()
                .filter(|reward| reward.is_completed())
                .map(|reward| reward.amount_in_cents),
        )
        .ok_or_else(overflow)?;
        let earnings = self.commissions.task_earnings(user_id).await?;
        let tasks = TaskEarningsReport::from_earnings(&earnings, today).ok_or_else(overflow)?;

        Ok(EarningsSummary {
            commission_in_cents,
            register_rewards_in_cents,
            total_in_cents: commission_in_cents
                .checked_add(register_rewards_in_cents)
                .ok_or_else(overflow)?,
            available_in_cents: account.available_in_cents,
            frozen_in_cents: account.frozen_in_cents,
            balance_in_cents: account.total_in_cents().ok_or_else(overflow)?,
            user_id: account.user_id,
            tasks,
        })
    }

    pub async fn team_members(&self, inviter_id: &str) -> Result<Vec<TeamMember>, ServiceError> {
        let overflow = || ServiceError::Overflow(inviter_id.to_string());

        let invitees = self.invitations.list_bound_invitees(inviter_id).await?;
        let history = self
            .commissions
            .get_commission_history(inviter_id, &CommissionFilter::default())
            .await?;

        let mut commission_by_member: HashMap<&str, i64> = HashMap::new();
        for record in &history {
            let total = commission_by_member.entry(record.member_id.as_str()).or_default();
            *total = total
                .checked_add(record.commission_in_cents)
                .ok_or_else(overflow)?;
        }

        let mut members = Vec::with_capacity(invitees.len());
        for invitation in invitees {
            let earnings = self.commissions.task_earnings(&invitation.invitee_id).await?;
            let total_earnings_in_cents =
                utils::sum_cents(earnings.iter().map(|earning| earning.amount_in_cents))
                    .ok_or_else(overflow)?;
            members.push(TeamMember {
                completed_tasks: earnings.len(),
                total_earnings_in_cents,
                my_commission_in_cents: commission_by_member
                    .get(invitation.invitee_id.as_str())
                    .copied()
                    .unwrap_or_default(),
                member_id: invitation.invitee_id,
                bound_at: invitation.bound_at,
            });
        }

        Ok(members)
    }

    /// Task commissions merged with completed register rewards, newest first.
    pub async fn commission_feed(&self, inviter_id: &str) -> Result<Vec<CommissionRecord>, ServiceError> {
        let mut feed = self
            .commissions
            .get_commission_history(inviter_id, &CommissionFilter::default())
            .await?;

        let invitees: HashMap<String, String> = self
            .invitations
            .list_bound_invitees(inviter_id)
            .await?
            .into_iter()
            .map(|invitation| (invitation.id, invitation.invitee_id))
            .collect();

        for reward in self.invitations.rewards_for_inviter(inviter_id).await? {
            let Some(issued_at) = reward.issued_at.filter(|_| reward.is_completed()) else {
                continue;
            };
            feed.push(CommissionRecord {
                id: reward.id,
                inviter_id: inviter_id.to_string(),
                member_id: invitees
                    .get(&reward.invitation_id)
                    .cloned()
                    .unwrap_or_default(),
                task_id: String::new(),
                task_name: REGISTER_REWARD_TASK_NAME.to_string(),
                task_earning_in_cents: 0,
                commission_in_cents: reward.amount_in_cents,
                date: issued_at,
                kind: CommissionKind::Register,
            });
        }

        // Stable sort keeps ledger order among equal timestamps.
        feed.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(feed)
    }
}

#[async_trait]
impl RequestHandler<EarningsRequest> for EarningsQuery {
    async fn handle_request(&self, request: EarningsRequest) {
        match request {
            EarningsRequest::GetSummary { user_id, response } => {
                let summary = self.my_earnings_summary(&user_id).await;
                let _ = response.send(summary);
            }
            EarningsRequest::GetTeam {
                inviter_id,
                response,
            } => {
                let team = self.team_members(&inviter_id).await;
                let _ = response.send(team);
            }
            EarningsRequest::GetFeed {
                inviter_id,
                response,
            } => {
                let feed = self.commission_feed(&inviter_id).await;
                let _ = response.send(feed);
            }
        }
    }
}

pub struct EarningsService;

impl EarningsService {
    pub fn new() -> Self {
        EarningsService {}
    }
}

#[async_trait]
impl Service<EarningsRequest, EarningsQuery> for EarningsService {}
