use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::PgPool;

use crate::models::invitations::{
    Invitation, InvitationStatus, InviteReward, RewardStatus, RewardType,
};

#[async_trait]
pub trait InvitationRepository: Send + Sync + 'static {
    /// Returns `false` when the invitee already has an invitation.
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<bool, anyhow::Error>;

    async fn get_invitation_by_invitee(
        &self,
        invitee_id: &str,
    ) -> Result<Option<Invitation>, anyhow::Error>;

    /// Moves a pending invitation to bound. Returns `None` if it was not pending.
    async fn mark_bound(
        &self,
        invitation_id: &str,
        bound_at: chrono::NaiveDateTime,
    ) -> Result<Option<Invitation>, anyhow::Error>;

    /// All invitations issued by `inviter_id`, in insertion order.
    async fn list_by_inviter(&self, inviter_id: &str) -> Result<Vec<Invitation>, anyhow::Error>;

    /// Inserts the reward unless one of the same type exists for the invitation,
    /// and returns whichever is stored.
    async fn insert_reward(&self, reward: &InviteReward) -> Result<InviteReward, anyhow::Error>;

    async fn get_reward(
        &self,
        invitation_id: &str,
        reward_type: RewardType,
    ) -> Result<Option<InviteReward>, anyhow::Error>;

    /// Moves a pending reward to completed. Returns `None` if it was not pending.
    async fn complete_reward(
        &self,
        reward_id: &str,
        issued_at: chrono::NaiveDateTime,
    ) -> Result<Option<InviteReward>, anyhow::Error>;

    /// Moves a completed reward back to pending. Returns `None` if it was not completed.
    async fn reopen_reward(&self, reward_id: &str) -> Result<Option<InviteReward>, anyhow::Error>;

    async fn list_rewards_by_inviter(
        &self,
        inviter_id: &str,
    ) -> Result<Vec<InviteReward>, anyhow::Error>;
}

#[derive(Clone)]
pub struct PgInvitationRepository {
    conn: PgPool,
}

impl PgInvitationRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl InvitationRepository for PgInvitationRepository {
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
                INSERT INTO invitations (id, inviter_id, invitee_id, status, created_at, bound_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (invitee_id) DO NOTHING
            "#,
        )
        .bind(&invitation.id)
        .bind(&invitation.inviter_id)
        .bind(&invitation.invitee_id)
        .bind(invitation.status)
        .bind(invitation.created_at)
        .bind(invitation.bound_at)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_invitation_by_invitee(
        &self,
        invitee_id: &str,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let invitation =
            sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE invitee_id = $1")
                .bind(invitee_id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(invitation)
    }

    async fn mark_bound(
        &self,
        invitation_id: &str,
        bound_at: chrono::NaiveDateTime,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let invitation = sqlx::query_as::<_, Invitation>(
            r#"
                UPDATE invitations SET status = $2, bound_at = $3
                WHERE id = $1 AND status = $4
                RETURNING *
            "#,
        )
        .bind(invitation_id)
        .bind(InvitationStatus::Bound)
        .bind(bound_at)
        .bind(InvitationStatus::Pending)
        .fetch_optional(&self.conn)
        .await?;

        Ok(invitation)
    }

    async fn list_by_inviter(&self, inviter_id: &str) -> Result<Vec<Invitation>, anyhow::Error> {
        let invitations = sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE inviter_id = $1 ORDER BY seq ASC",
        )
        .bind(inviter_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(invitations)
    }

    async fn insert_reward(&self, reward: &InviteReward) -> Result<InviteReward, anyhow::Error> {
        sqlx::query(
            r#"
                INSERT INTO invite_rewards (id, invitation_id, reward_type, amount_in_cents, status, issued_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (invitation_id, reward_type) DO NOTHING
            "#,
        )
        .bind(&reward.id)
        .bind(&reward.invitation_id)
        .bind(reward.reward_type)
        .bind(reward.amount_in_cents)
        .bind(reward.status)
        .bind(reward.issued_at)
        .execute(&self.conn)
        .await?;

        match self
            .get_reward(&reward.invitation_id, reward.reward_type)
            .await?
        {
            Some(stored) => Ok(stored),
            None => anyhow::bail!("Reward for invitation {} vanished", reward.invitation_id),
        }
    }

    async fn get_reward(
        &self,
        invitation_id: &str,
        reward_type: RewardType,
    ) -> Result<Option<InviteReward>, anyhow::Error> {
        let reward = sqlx::query_as::<_, InviteReward>(
            "SELECT * FROM invite_rewards WHERE invitation_id = $1 AND reward_type = $2",
        )
        .bind(invitation_id)
        .bind(reward_type)
        .fetch_optional(&self.conn)
        .await?;

        Ok(reward)
    }

    async fn complete_reward(
        &self,
        reward_id: &str,
        issued_at: chrono::NaiveDateTime,
    ) -> Result<Option<InviteReward>, anyhow::Error> {
        let reward = sqlx::query_as::<_, InviteReward>(
            r#"
                UPDATE invite_rewards SET status = $2, issued_at = $3
                WHERE id = $1 AND status = $4
                RETURNING *
            "#,
        )
        .bind(reward_id)
        .bind(RewardStatus::Completed)
        .bind(issued_at)
        .bind(RewardStatus::Pending)
        .fetch_optional(&self.conn)
        .await?;

        Ok(reward)
    }

    async fn reopen_reward(&self, reward_id: &str) -> Result<Option<InviteReward>, anyhow::Error> {
        let reward = sqlx::query_as::<_, InviteReward>(
            r#"
                UPDATE invite_rewards SET status = $2, issued_at = NULL
                WHERE id = $1 AND status = $3
                RETURNING *
            "#,
        )
        .bind(reward_id)
        .bind(RewardStatus::Pending)
        .bind(RewardStatus::Completed)
        .fetch_optional(&self.conn)
        .await?;

        Ok(reward)
    }

    async fn list_rewards_by_inviter(
        &self,
        inviter_id: &str,
    ) -> Result<Vec<InviteReward>, anyhow::Error> {
        let rewards = sqlx::query_as::<_, InviteReward>(
            r#"
                SELECT r.* FROM invite_rewards r
                JOIN invitations i ON i.id = r.invitation_id
                WHERE i.inviter_id = $1
                ORDER BY i.seq ASC
            "#,
        )
        .bind(inviter_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(rewards)
    }
}

#[derive(Clone, Default)]
pub struct MemoryInvitationRepository {
    invitations: Arc<DashMap<String, Invitation>>,
    by_invitee: Arc<DashMap<String, String>>,
    by_inviter: Arc<DashMap<String, Vec<String>>>,
    rewards: Arc<DashMap<(String, RewardType), InviteReward>>,
    reward_keys: Arc<DashMap<String, (String, RewardType)>>,
}

impl MemoryInvitationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvitationRepository for MemoryInvitationRepository {
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<bool, anyhow::Error> {
        match self.by_invitee.entry(invitation.invitee_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                self.invitations
                    .insert(invitation.id.clone(), invitation.clone());
                self.by_inviter
                    .entry(invitation.inviter_id.clone())
                    .or_default()
                    .push(invitation.id.clone());
                slot.insert(invitation.id.clone());
                Ok(true)
            }
        }
    }

    async fn get_invitation_by_invitee(
        &self,
        invitee_id: &str,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let invitation_id = match self.by_invitee.get(invitee_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        Ok(self
            .invitations
            .get(&invitation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn mark_bound(
        &self,
        invitation_id: &str,
        bound_at: chrono::NaiveDateTime,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let Some(mut invitation) = self.invitations.get_mut(invitation_id) else {
            return Ok(None);
        };
        if invitation.status != InvitationStatus::Pending {
            return Ok(None);
        }

        invitation.status = InvitationStatus::Bound;
        invitation.bound_at = Some(bound_at);
        Ok(Some(invitation.clone()))
    }

    async fn list_by_inviter(&self, inviter_id: &str) -> Result<Vec<Invitation>, anyhow::Error> {
        let ids = match self.by_inviter.get(inviter_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(Vec::new()),
        };

        Ok(ids
            .iter()
            .filter_map(|id| self.invitations.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn insert_reward(&self, reward: &InviteReward) -> Result<InviteReward, anyhow::Error> {
        let key = (reward.invitation_id.clone(), reward.reward_type);
        let stored = self
            .rewards
            .entry(key.clone())
            .or_insert_with(|| {
                self.reward_keys.insert(reward.id.clone(), key);
                reward.clone()
            })
            .value()
            .clone();

        Ok(stored)
    }

    async fn get_reward(
        &self,
        invitation_id: &str,
        reward_type: RewardType,
    ) -> Result<Option<InviteReward>, anyhow::Error> {
        Ok(self
            .rewards
            .get(&(invitation_id.to_string(), reward_type))
            .map(|entry| entry.value().clone()))
    }

    async fn complete_reward(
        &self,
        reward_id: &str,
        issued_at: chrono::NaiveDateTime,
    ) -> Result<Option<InviteReward>, anyhow::Error> {
        let key = match self.reward_keys.get(reward_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        let Some(mut reward) = self.rewards.get_mut(&key) else {
            return Ok(None);
        };
        if reward.status != RewardStatus::Pending {
            return Ok(None);
        }

        reward.status = RewardStatus::Completed;
        reward.issued_at = Some(issued_at);
        Ok(Some(reward.clone()))
    }

    async fn reopen_reward(&self, reward_id: &str) -> Result<Option<InviteReward>, anyhow::Error> {
        let key = match self.reward_keys.get(reward_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        let Some(mut reward) = self.rewards.get_mut(&key) else {
            return Ok(None);
        };
        if reward.status != RewardStatus::Completed {
            return Ok(None);
        }

        reward.status = RewardStatus::Pending;
        reward.issued_at = None;
        Ok(Some(reward.clone()))
    }

    async fn list_rewards_by_inviter(
        &self,
        inviter_id: &str,
    ) -> Result<Vec<InviteReward>, anyhow::Error> {
        let invitations = self.list_by_inviter(inviter_id).await?;

        Ok(invitations
            .iter()
            .filter_map(|invitation| {
                self.rewards
                    .get(&(invitation.id.clone(), RewardType::Register))
                    .map(|entry| entry.value().clone())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    #[tokio::test]
    async fn one_invitation_per_invitee() {
        let repository = MemoryInvitationRepository::new();
        let first = Invitation::pending("alice", "bob");
        let second = Invitation::pending("carol", "bob");

        assert!(repository.insert_invitation(&first).await.unwrap());
        assert!(!repository.insert_invitation(&second).await.unwrap());

        let stored = repository
            .get_invitation_by_invitee("bob")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.inviter_id, "alice");
        assert!(repository.list_by_inviter("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_bound_happens_once() {
        let repository = MemoryInvitationRepository::new();
        let invitation = Invitation::pending("alice", "bob");
        repository.insert_invitation(&invitation).await.unwrap();

        let bound = repository
            .mark_bound(&invitation.id, utils::now())
            .await
            .unwrap();
        assert!(bound.unwrap().is_bound());
        assert!(repository
            .mark_bound(&invitation.id, utils::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reward_insert_keeps_the_first() {
        let repository = MemoryInvitationRepository::new();
        let first = InviteReward::register("inv-1", 500);
        let second = InviteReward::register("inv-1", 900);

        let stored = repository.insert_reward(&first).await.unwrap();
        let again = repository.insert_reward(&second).await.unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(again.id, first.id);
        assert_eq!(again.amount_in_cents, 500);

        assert!(repository
            .complete_reward(&first.id, utils::now())
            .await
            .unwrap()
            .is_some());
        assert!(repository
            .complete_reward(&first.id, utils::now())
            .await
            .unwrap()
            .is_none());
        assert!(repository
            .complete_reward(&second.id, utils::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reopened_reward_can_complete_again() {
        let repository = MemoryInvitationRepository::new();
        let reward = InviteReward::register("inv-1", 500);
        repository.insert_reward(&reward).await.unwrap();

        assert!(repository.reopen_reward(&reward.id).await.unwrap().is_none());
        repository
            .complete_reward(&reward.id, utils::now())
            .await
            .unwrap()
            .unwrap();

        let reopened = repository.reopen_reward(&reward.id).await.unwrap().unwrap();
        assert!(!reopened.is_completed());
        assert!(reopened.issued_at.is_none());
        assert!(repository
            .complete_reward(&reward.id, utils::now())
            .await
            .unwrap()
            .is_some());
    }
}
